//! Identity platform endpoints and the delegated scopes the remote backend needs.

use url::Url;

use crate::error::{Error, Result};

/// Public-cloud sign-in authority.
pub const PUBLIC_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Delegated Graph permissions for mail, calendar, tasks and people.
pub const GRAPH_SCOPES: &[&str] = &[
    "https://graph.microsoft.com/User.Read",
    "https://graph.microsoft.com/Mail.ReadWrite",
    "https://graph.microsoft.com/Mail.Send",
    "https://graph.microsoft.com/Calendars.Read",
    "https://graph.microsoft.com/Tasks.ReadWrite",
    "https://graph.microsoft.com/People.Read",
    "https://graph.microsoft.com/MailboxSettings.Read",
    "offline_access",
];

/// Where the user signs in and where codes and refresh tokens are redeemed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provider {
    /// Directory tenant: `common`, `organizations`, `consumers` or a GUID.
    pub tenant: String,
    /// Authorization endpoint.
    pub authorize_endpoint: Url,
    /// Token endpoint.
    pub token_endpoint: Url,
    /// Scopes requested at sign-in and on refresh.
    pub scopes: Vec<String>,
}

impl Provider {
    /// Public-cloud endpoints for `tenant` with [`GRAPH_SCOPES`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for an empty or malformed tenant.
    pub fn microsoft(tenant: &str) -> Result<Self> {
        Self::at_authority(PUBLIC_AUTHORITY, tenant)
    }

    /// Endpoints for `tenant` under another authority host.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` for a bad tenant and `Error::Url` for a
    /// bad authority.
    pub fn at_authority(authority: &str, tenant: &str) -> Result<Self> {
        let tenant = tenant.trim();
        if tenant.is_empty() || tenant.contains(['/', '?', '#', ' ']) {
            return Err(Error::InvalidConfig(format!("invalid tenant: {tenant:?}")));
        }
        let mut base = Url::parse(authority)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            tenant: tenant.to_string(),
            authorize_endpoint: base.join(&format!("{tenant}/oauth2/v2.0/authorize"))?,
            token_endpoint: base.join(&format!("{tenant}/oauth2/v2.0/token"))?,
            scopes: GRAPH_SCOPES.iter().map(ToString::to_string).collect(),
        })
    }

    /// Replaces the requested scopes.
    #[must_use]
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// Space-separated `scope` parameter.
    #[must_use]
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Checks the endpoints before a browser is opened.
    ///
    /// Plain HTTP is only allowed against a loopback host.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` describing the problem.
    pub fn validate(&self) -> Result<()> {
        if self.scopes.is_empty() {
            return Err(Error::InvalidConfig("no scopes requested".into()));
        }
        for endpoint in [&self.authorize_endpoint, &self.token_endpoint] {
            if !is_secure(endpoint) {
                return Err(Error::InvalidConfig(format!(
                    "endpoint must use https: {endpoint}"
                )));
            }
        }
        Ok(())
    }
}

fn is_secure(url: &Url) -> bool {
    match url.scheme() {
        "https" => true,
        "http" => matches!(url.host_str(), Some("localhost" | "127.0.0.1" | "[::1]")),
        _ => false,
    }
}
