//! # mailpulse-core
//!
//! One normalized mail, calendar and task view over two backends.
//!
//! This crate provides:
//! - **Data model** - messages, events and tasks with origin-tagged references
//! - **Local backend** - drives a desktop mail client's automation model with
//!   locale-safe restrictions and column projection
//! - **Remote backend** - Microsoft Graph over HTTPS with explicit timeouts
//! - **Hybrid router** - splits reads by account, merges and sorts results,
//!   and routes per-item actions to the owning backend
//! - **Retry policy** - one bounded policy shared by both backends

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(windows), forbid(unsafe_code))]
#![cfg_attr(windows, deny(unsafe_code))]

pub mod backend;
pub mod config;
mod error;
pub mod hybrid;
pub mod local;
pub mod model;
pub mod remote;
pub mod retry;

pub use backend::{InboxPage, InboxQuery, MailBackend};
pub use config::{AccountSettings, EnabledAccounts, RemoteSettings, Settings};
pub use error::{Error, Result};
pub use hybrid::{HybridClient, LOCAL_ID_MIN_LEN};
pub use local::{AutomationError, LocalBackend};
pub use remote::{GraphClient, RemoteBackend};
pub use retry::{Classify, RetryPolicy};
