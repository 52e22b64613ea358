//! Accounts, item references, and small shared records.

use serde::{Deserialize, Serialize};

/// Which backend a record or account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Desktop mail client driven through its automation object model.
    Local,
    /// Cloud REST service.
    Remote,
}

impl BackendKind {
    /// Short name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of an item in its originating backend.
///
/// Records produced by a backend are always tagged with their origin, so
/// routing a mutating call is a field lookup. Callers that only hold a bare
/// identifier build an untagged reference and the router falls back to
/// guessing from the identifier's shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemReference {
    /// Originating backend, if known.
    pub origin: Option<BackendKind>,
    /// Backend-native identifier.
    pub id: String,
    /// Backend-native scope: store id locally, task-list id remotely.
    pub scope: Option<String>,
}

impl ItemReference {
    /// Reference to a local item.
    #[must_use]
    pub fn local(id: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            origin: Some(BackendKind::Local),
            id: id.into(),
            scope,
        }
    }

    /// Reference to a remote item.
    #[must_use]
    pub fn remote(id: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            origin: Some(BackendKind::Remote),
            id: id.into(),
            scope,
        }
    }

    /// Reference built from a bare identifier supplied by a caller.
    #[must_use]
    pub fn untagged(id: impl Into<String>, scope: Option<String>) -> Self {
        Self {
            origin: None,
            id: id.into(),
            scope,
        }
    }

    /// Same id and scope, tagged with `origin`.
    #[must_use]
    pub fn tagged(&self, origin: BackendKind) -> Self {
        Self {
            origin: Some(origin),
            ..self.clone()
        }
    }
}

/// A mail account known to one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name, as used in the enabled-accounts configuration.
    pub name: String,
    /// Owning backend.
    pub kind: BackendKind,
    /// Folder subset configured for this account (empty means the inbox).
    #[serde(default)]
    pub folders: Vec<String>,
}

impl Account {
    /// Creates an account with no folder subset.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            folders: Vec::new(),
        }
    }
}

/// A mail folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Folder display name.
    pub name: String,
    /// Path from the account root, `/`-separated.
    pub path: String,
    /// Unread count when the backend reports it.
    pub unread: Option<u32>,
}

/// A contact search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Display name (may be empty).
    pub name: String,
    /// Email address.
    pub email: String,
}

impl Contact {
    /// Returns "Name <email>", or just the address when there is no name.
    #[must_use]
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }
}

/// Category color as one of the 25 shared presets.
///
/// Both backends number the same palette; the desktop client counts from 1
/// with 0 meaning "no color", the REST service names them `preset0`..`preset24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CategoryColor {
    /// No color assigned.
    #[default]
    None,
    /// Preset index, 0..=24.
    Preset(u8),
}

impl CategoryColor {
    /// Maps the desktop client's color constant.
    #[must_use]
    pub fn from_local(value: i64) -> Self {
        match u8::try_from(value) {
            Ok(n @ 1..=25) => Self::Preset(n - 1),
            _ => Self::None,
        }
    }

    /// Maps the REST service's `presetN` string.
    #[must_use]
    pub fn from_remote(value: &str) -> Self {
        value
            .strip_prefix("preset")
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n <= 24)
            .map_or(Self::None, Self::Preset)
    }
}
