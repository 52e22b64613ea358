//! Talking to the token endpoint, and the browser sign-in built on top of it.

mod code;
mod loopback;
mod pkce;

pub use code::{AuthorizationCodeFlow, AuthorizationRequest};
pub use loopback::{LoopbackListener, RedirectParams};
pub use pkce::{PKCE_METHOD, PkceChallenge, random_urlsafe};

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::provider::Provider;
use crate::token::{Token, TokenGrant, TokenRefusal};

/// Connect timeout for token endpoint calls.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Whole-request timeout for token endpoint calls.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A registered public client: its id, redirect and identity provider.
///
/// Desktop apps cannot keep a secret, so there is none; PKCE protects the
/// code exchange instead.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    /// Application (client) id.
    pub client_id: String,
    /// Fixed redirect URI. Without one the loopback listener picks a port.
    pub redirect_uri: Option<String>,
    /// Endpoints and scopes.
    pub provider: Provider,
    request_timeout: Duration,
    http: Client,
}

impl OAuthClient {
    /// A client with the default timeouts.
    #[must_use]
    pub fn new(client_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: None,
            provider,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            http: http_client(DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Pins the redirect URI registered for the application.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }

    /// Overrides the token endpoint timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.http = http_client(connect);
        self.request_timeout = request;
        self
    }

    /// Trades `token`'s refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRefreshToken` without a network call if `token`
    /// cannot be renewed, `Error::Rejected` if the platform refuses, and
    /// `Error::Http` if the endpoint is unreachable.
    pub async fn refresh(&self, token: &Token) -> Result<Token> {
        let refresh_token = token.require_refresh_token()?;
        let scope = self.provider.scope_param();
        debug!(endpoint = %self.provider.token_endpoint, "Refreshing access token");
        let grant = self
            .redeem(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("scope", scope.as_str()),
            ])
            .await?;
        token.renewed(grant, Utc::now())
    }

    /// Posts a form to the token endpoint.
    async fn redeem(&self, form: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .http
            .post(self.provider.token_endpoint.clone())
            .timeout(self.request_timeout)
            .form(form)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json::<TokenGrant>().await?)
        } else {
            Err(response.json::<TokenRefusal>().await?.into())
        }
    }
}

fn http_client(connect_timeout: Duration) -> Client {
    Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}
