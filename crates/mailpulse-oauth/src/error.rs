//! Sign-in and token errors.

use std::io;
use std::time::Duration;

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between the browser, the loopback listener,
/// the token endpoint and the cache file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Token cache or listener I/O.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport failure talking to the token endpoint.
    #[error("Token endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Malformed token response or cache file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad endpoint or redirect URL.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The identity platform refused the request.
    #[error("Sign-in rejected ({code}): {description}")]
    Rejected {
        /// Protocol error code such as `invalid_grant`.
        code: String,
        /// Text the platform sent along.
        description: String,
    },

    /// The cached sign-in cannot be renewed without the user.
    #[error("No refresh token cached")]
    NoRefreshToken,

    /// The endpoint answered 2xx with something that is not a token.
    #[error("Unusable token response: {0}")]
    InvalidResponse(String),

    /// The browser redirect never arrived.
    #[error("Sign-in timed out after {}s", .0.as_secs())]
    LoginTimeout(Duration),

    /// The user cancelled on the consent page.
    #[error("Sign-in cancelled by the user")]
    AccessDenied,

    /// The redirect echoed a `state` this session did not send.
    #[error("Redirect state does not match the sign-in request")]
    StateMismatch,

    /// Tenant, client id or endpoint settings are unusable.
    #[error("Invalid sign-in configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// A refusal from the identity platform.
    #[must_use]
    pub fn rejected(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            description: description.into(),
        }
    }

    /// True when the token endpoint could not be reached at all.
    ///
    /// Callers treat this as "offline" and keep the cached sign-in.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// True when the cached sign-in is dead and should be forgotten.
    #[must_use]
    pub fn ends_session(&self) -> bool {
        match self {
            Self::Rejected { code, .. } => {
                code == "invalid_grant" || code == "interaction_required"
            }
            Self::NoRefreshToken => true,
            _ => false,
        }
    }
}
