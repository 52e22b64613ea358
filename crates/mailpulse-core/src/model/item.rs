//! Normalized message, event and task records.

use std::path::PathBuf;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DueBucket, ItemReference};

/// Converts a UTC instant to the local wall-clock time used for merging.
#[must_use]
pub fn local_naive(instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&Local).naive_local()
}

/// Follow-up flag state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlagStatus {
    /// Not flagged.
    #[default]
    None = 0,
    /// Flagged for follow-up.
    Marked = 1,
    /// Flag completed.
    Complete = 2,
}

impl FlagStatus {
    /// Maps the desktop client's constant (0 none, 1 complete, 2 marked).
    #[must_use]
    pub const fn from_local(value: i64) -> Self {
        match value {
            1 => Self::Complete,
            2 => Self::Marked,
            _ => Self::None,
        }
    }

    /// The desktop client's constant for this state.
    #[must_use]
    pub const fn to_local(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Complete => 1,
            Self::Marked => 2,
        }
    }

    /// Maps the REST service's `flag.flagStatus` string.
    #[must_use]
    pub fn from_remote(value: Option<&str>) -> Self {
        match value {
            Some("flagged") => Self::Marked,
            Some("complete" | "completed") => Self::Complete,
            _ => Self::None,
        }
    }

    /// The REST service's string for this state.
    #[must_use]
    pub const fn to_remote(self) -> &'static str {
        match self {
            Self::None => "notFlagged",
            Self::Marked => "flagged",
            Self::Complete => "complete",
        }
    }

    /// State after a toggle: marked clears, anything else becomes marked.
    ///
    /// Toggling twice restores `None` and `Marked`. A completed flag is
    /// reopened as `Marked` and does not come back as `Complete`.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Marked => Self::None,
            Self::None | Self::Complete => Self::Marked,
        }
    }
}

/// Item importance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Importance {
    /// Low importance.
    Low = 0,
    /// Normal importance.
    #[default]
    Normal = 1,
    /// High importance.
    High = 2,
}

impl Importance {
    /// Maps the desktop client's constant (0 low, 1 normal, 2 high).
    #[must_use]
    pub const fn from_local(value: i64) -> Self {
        match value {
            0 => Self::Low,
            2 => Self::High,
            _ => Self::Normal,
        }
    }

    /// Maps the REST service's importance string.
    #[must_use]
    pub fn from_remote(value: Option<&str>) -> Self {
        match value {
            Some("low") => Self::Low,
            Some("high") => Self::High,
            _ => Self::Normal,
        }
    }
}

/// The user's response to a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// No response recorded.
    #[default]
    None,
    /// The user organized the meeting.
    Organizer,
    /// Tentatively accepted.
    Tentative,
    /// Accepted.
    Accepted,
    /// Declined.
    Declined,
    /// Invitation not yet answered.
    NotResponded,
}

impl ResponseStatus {
    /// Maps the desktop client's constant.
    #[must_use]
    pub const fn from_local(value: i64) -> Self {
        match value {
            1 => Self::Organizer,
            2 => Self::Tentative,
            3 => Self::Accepted,
            4 => Self::Declined,
            5 => Self::NotResponded,
            _ => Self::None,
        }
    }

    /// Maps the REST service's `responseStatus.response` string.
    #[must_use]
    pub fn from_remote(value: Option<&str>) -> Self {
        match value {
            Some("organizer") => Self::Organizer,
            Some("tentativelyAccepted") => Self::Tentative,
            Some("accepted") => Self::Accepted,
            Some("declined") => Self::Declined,
            Some("notResponded") => Self::NotResponded,
            _ => Self::None,
        }
    }
}

/// A mail item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Where the item lives.
    pub reference: ItemReference,
    /// Account the item was read from.
    pub account: String,
    /// Subject line.
    pub subject: String,
    /// Sender display name.
    pub sender_name: String,
    /// Sender address.
    pub sender_address: String,
    /// Received time, local wall clock.
    pub received: NaiveDateTime,
    /// Whether the item has been read.
    pub is_read: bool,
    /// Follow-up flag state.
    pub flag_status: FlagStatus,
    /// Due date of the follow-up flag, if any.
    pub flag_due: Option<NaiveDateTime>,
    /// Importance.
    pub importance: Importance,
    /// Whether the item carries attachments.
    pub has_attachments: bool,
    /// Assigned categories.
    pub categories: Vec<String>,
    /// Body preview, when the backend provides one.
    pub preview: Option<String>,
    /// Backend-specific link that opens the item.
    pub link: Option<String>,
}

/// A calendar item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Where the item lives.
    pub reference: ItemReference,
    /// Account the item was read from.
    pub account: String,
    /// Subject line.
    pub subject: String,
    /// Start, local wall clock.
    pub start: NaiveDateTime,
    /// End, local wall clock.
    pub end: NaiveDateTime,
    /// Location text.
    pub location: Option<String>,
    /// The user's response.
    pub response_status: ResponseStatus,
    /// Whether this is an occurrence of a recurring series.
    pub is_recurring: bool,
    /// All-day event.
    pub is_all_day: bool,
}

/// A task or to-do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedTask {
    /// Where the item lives.
    pub reference: ItemReference,
    /// Account the item was read from.
    pub account: String,
    /// Subject line.
    pub subject: String,
    /// Due time, local wall clock.
    pub due: Option<NaiveDateTime>,
    /// Importance.
    pub importance: Importance,
    /// Completion state.
    pub is_complete: bool,
    /// Whether a reminder is set.
    pub has_reminder: bool,
    /// Due bucket, computed when the task was read.
    pub bucket: DueBucket,
}

/// Kind of item a compose window is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewItemKind {
    /// New mail.
    Email,
    /// New meeting request.
    Meeting,
    /// New task.
    Task,
    /// New contact.
    Contact,
}

/// A message to send directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMail {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// File to attach.
    pub attachment: Option<PathBuf>,
}
