//! # mailpulse-oauth
//!
//! `OAuth2` sign-in for the Microsoft Graph mail, calendar and task backend.
//!
//! ## Features
//!
//! - **Authorization Code Flow** with PKCE and a loopback redirect listener
//! - **Token management**: expiration checking and refresh
//! - **Provider configuration** for the Microsoft identity platform
//! - **`AuthSession`**: an explicitly constructed token session backed by a
//!   cache file, with silent acquisition for routine polling and interactive
//!   login for user-initiated sign-in
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailpulse_oauth::{AuthSession, OAuthClient, Provider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = Provider::microsoft("common")?;
//!     let client = OAuthClient::new("your_client_id", provider)
//!         .with_redirect_uri("http://localhost:53682");
//!
//!     let session = Arc::new(AuthSession::new(client, "/tmp/token.json"));
//!
//!     // Opens the browser and waits for the redirect.
//!     session.login_interactive().await?;
//!
//!     // Every later call refreshes quietly, or returns None when offline.
//!     if let Some(token) = session.acquire_token_silent().await {
//!         println!("Bearer {token}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
pub mod flow;
pub mod provider;
pub mod session;
pub mod token;

pub use error::{Error, Result};
pub use flow::{AuthorizationCodeFlow, OAuthClient, PkceChallenge};
pub use provider::Provider;
pub use session::AuthSession;
pub use token::Token;
