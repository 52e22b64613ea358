//! Access tokens and the token endpoint's wire format.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A token this many seconds from expiry is renewed before use.
const RENEW_MARGIN_SECS: i64 = 60;

/// A bearer token plus what is needed to renew it.
///
/// Serialized as is into the session cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Bearer value for the `Authorization` header.
    pub access_token: String,
    /// Usually `Bearer`.
    pub token_type: String,
    /// Absent means the endpoint did not say; such tokens are used until rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Long-lived renewal secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Scopes actually granted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Signed-in address, learned from the first profile lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl Token {
    /// A token with no expiry and no renewal secret.
    #[must_use]
    pub fn new(access_token: impl Into<String>, token_type: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: token_type.into(),
            expires_at: None,
            refresh_token: None,
            scope: None,
            account: None,
        }
    }

    /// Builds a token from a fresh grant received at `now`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidResponse` if the grant has no access token.
    pub fn from_grant(grant: TokenGrant, now: DateTime<Utc>) -> Result<Self> {
        if grant.access_token.trim().is_empty() {
            return Err(Error::InvalidResponse("grant without access_token".into()));
        }
        Ok(Self {
            access_token: grant.access_token,
            token_type: grant.token_type,
            expires_at: grant
                .expires_in
                .map(|secs| now + Duration::seconds(i64::from(secs))),
            refresh_token: grant.refresh_token,
            scope: grant.scope,
            account: None,
        })
    }

    /// The token that replaces `self` after a refresh grant.
    ///
    /// The platform may omit the refresh token on renewal, in which case the
    /// old one stays valid. The signed-in account carries over.
    ///
    /// # Errors
    ///
    /// See [`Token::from_grant`].
    pub fn renewed(&self, grant: TokenGrant, now: DateTime<Utc>) -> Result<Self> {
        let mut next = Self::from_grant(grant, now)?;
        if next.refresh_token.is_none() {
            next.refresh_token.clone_from(&self.refresh_token);
        }
        next.account.clone_from(&self.account);
        Ok(next)
    }

    /// True if the token expires within the renewal margin of `now`.
    #[must_use]
    pub fn needs_renewal_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now + Duration::seconds(RENEW_MARGIN_SECS) >= exp)
    }

    /// True if the token can be sent as is.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.needs_renewal_at(Utc::now())
    }

    /// Sets the renewal secret.
    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// The renewal secret.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoRefreshToken` if none was granted.
    pub fn require_refresh_token(&self) -> Result<&str> {
        self.refresh_token.as_deref().ok_or(Error::NoRefreshToken)
    }
}

/// Successful token endpoint body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    /// Bearer value.
    pub access_token: String,
    /// Usually `Bearer`.
    pub token_type: String,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u32>,
    /// Renewal secret, possibly rotated.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Failed token endpoint body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefusal {
    /// Protocol error code.
    pub error: String,
    /// Explanation, when sent.
    #[serde(default)]
    pub error_description: String,
}

impl From<TokenRefusal> for Error {
    fn from(refusal: TokenRefusal) -> Self {
        Self::rejected(refusal.error, refusal.error_description)
    }
}
