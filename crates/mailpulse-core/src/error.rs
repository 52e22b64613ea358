//! Error types for the core library.

use thiserror::Error;

use crate::local::AutomationError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The remote service could not be reached (DNS, refused, timed out).
    #[error("Remote service unreachable: {0}")]
    Connectivity(String),

    /// The remote service answered with a 4xx/5xx status.
    #[error("Remote API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the response body, if any.
        message: String,
    },

    /// Local automation call failed.
    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    /// Interactive sign-in failed.
    #[error("Authentication error: {0}")]
    Auth(#[from] mailpulse_oauth::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    /// Classifies a transport-level HTTP failure.
    ///
    /// Anything that never produced a response is treated as an outage.
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::Api {
                status: status.as_u16(),
                message: err.to_string(),
            };
        }
        if err.is_decode() || err.is_body() {
            return Self::Api {
                status: 0,
                message: err.to_string(),
            };
        }
        Self::Connectivity(err.to_string())
    }

    /// True for "backend offline", as opposed to "no data".
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
