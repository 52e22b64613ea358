//! Browser sign-in: the authorization URL and the code exchange.

use chrono::Utc;
use url::Url;

use super::{OAuthClient, PKCE_METHOD, PkceChallenge, random_urlsafe};
use crate::error::Result;
use crate::token::Token;

/// Where to send the browser, and the `state` the redirect must echo.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Consent page URL.
    pub url: Url,
    /// Anti-forgery value.
    pub state: String,
}

/// One sign-in attempt. Holds the PKCE verifier between the two legs.
#[derive(Debug)]
pub struct AuthorizationCodeFlow {
    client: OAuthClient,
    pkce: PkceChallenge,
}

impl AuthorizationCodeFlow {
    /// Starts an attempt with a fresh verifier.
    #[must_use]
    pub fn new(client: OAuthClient) -> Self {
        Self {
            client,
            pkce: PkceChallenge::generate(),
        }
    }

    /// Uses the redirect URI the loopback listener actually bound.
    #[must_use]
    pub fn with_redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.client.redirect_uri = Some(uri.into());
        self
    }

    /// Consent page URL; `login_hint` preselects an account.
    ///
    /// Every call draws a new `state`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the provider endpoints are unusable.
    pub fn authorization_request(&self, login_hint: Option<&str>) -> Result<AuthorizationRequest> {
        let provider = &self.client.provider;
        provider.validate()?;

        let state = random_urlsafe(16);
        let mut url = provider.authorize_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client.client_id)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("scope", &provider.scope_param())
            .append_pair("state", &state)
            .append_pair("code_challenge", self.pkce.challenge())
            .append_pair("code_challenge_method", PKCE_METHOD)
            .append_pair("prompt", "select_account");
        if let Some(uri) = &self.client.redirect_uri {
            url.query_pairs_mut().append_pair("redirect_uri", uri);
        }
        if let Some(hint) = login_hint {
            url.query_pairs_mut().append_pair("login_hint", hint);
        }

        Ok(AuthorizationRequest { url, state })
    }

    /// Redeems the code the redirect delivered.
    ///
    /// # Errors
    ///
    /// Returns `Error::Rejected` if the platform refuses the code and
    /// `Error::Http` if the endpoint is unreachable.
    pub async fn exchange_code(&self, code: &str) -> Result<Token> {
        let scope = self.client.provider.scope_param();
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.client.client_id.as_str()),
            ("scope", scope.as_str()),
            ("code_verifier", self.pkce.verifier()),
        ];
        if let Some(uri) = &self.client.redirect_uri {
            form.push(("redirect_uri", uri.as_str()));
        }
        let grant = self.client.redeem(&form).await?;
        Token::from_grant(grant, Utc::now())
    }
}
