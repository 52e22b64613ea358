//! Settings consumed by the core.
//!
//! The surrounding application owns how these are edited; the core only reads
//! the enabled-accounts map, the poll interval, the due filters and the
//! remote service settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::DueBucket;

const APP_DIR: &str = "mailpulse";

/// Per-account feature switches and folder subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Include this account's mail.
    #[serde(default = "enabled")]
    pub email: bool,
    /// Include this account's calendar.
    #[serde(default = "enabled")]
    pub calendar: bool,
    /// Folder paths to read instead of the inbox.
    #[serde(default)]
    pub folders: Vec<String>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            email: true,
            calendar: true,
            folders: Vec::new(),
        }
    }
}

const fn enabled() -> bool {
    true
}

/// Enabled accounts keyed by display name.
pub type EnabledAccounts = BTreeMap<String, AccountSettings>;

/// Remote service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Application (client) id registered with the identity platform.
    pub client_id: String,
    /// Directory tenant.
    pub tenant: String,
    /// API base URL.
    pub base_url: String,
    /// Loopback port for the sign-in redirect (0 picks a free port).
    pub redirect_port: u16,
    /// TCP connect timeout.
    pub connect_timeout_secs: u64,
    /// Read timeout for a whole request.
    pub read_timeout_secs: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            tenant: "common".to_string(),
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            redirect_port: 0,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }
}

impl RemoteSettings {
    /// TCP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Everything the core consumes from its host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enabled accounts.
    pub accounts: EnabledAccounts,
    /// Seconds between polls.
    pub poll_interval_secs: u64,
    /// Due buckets for the reminders feature.
    pub reminder_filters: Vec<DueBucket>,
    /// Due buckets for the tasks feature.
    pub task_filters: Vec<DueBucket>,
    /// Show only flagged mail.
    pub only_flagged: bool,
    /// Inbox page size.
    pub inbox_count: usize,
    /// Remote service settings.
    pub remote: RemoteSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accounts: EnabledAccounts::new(),
            poll_interval_secs: 60,
            reminder_filters: vec![DueBucket::Overdue, DueBucket::Today],
            task_filters: vec![DueBucket::Overdue, DueBucket::Today, DueBucket::Tomorrow],
            only_flagged: false,
            inbox_count: 20,
            remote: RemoteSettings::default(),
        }
    }
}

impl Settings {
    /// Default settings file: `<config dir>/mailpulse/settings.json`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("settings.json")
    }

    /// Default token cache file: `<cache dir>/mailpulse/token.json`.
    #[must_use]
    pub fn token_cache_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("token.json")
    }

    /// Loads settings from `path`; a missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the parsed settings are invalid.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        let settings: Self = serde_json::from_str(&contents)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".into()));
        }
        if self.inbox_count == 0 {
            return Err(Error::Config("inbox_count must be positive".into()));
        }
        if self.remote.connect_timeout_secs == 0 || self.remote.read_timeout_secs == 0 {
            return Err(Error::Config("remote timeouts must be positive".into()));
        }
        if url::Url::parse(&self.remote.base_url).is_err() {
            return Err(Error::Config(format!(
                "invalid remote base_url: {}",
                self.remote.base_url
            )));
        }
        Ok(())
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
