//! REST resources and their conversion to normalized records.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::model::{
    Contact, DueBucket, FlagStatus, Folder, Importance, ItemReference, NormalizedEvent,
    NormalizedMessage, NormalizedTask, ResponseStatus, local_naive,
};

/// `$select` for message lists.
pub const MESSAGE_FIELDS: &str =
    "id,subject,from,receivedDateTime,isRead,flag,importance,hasAttachments,categories,bodyPreview,webLink";

/// `$select` for calendar views.
pub const EVENT_FIELDS: &str = "id,subject,start,end,location,responseStatus,type,isAllDay";

/// One page of a collection.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Absolute link to the next page.
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Date-time with a named zone.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeTimeZone {
    /// Wall-clock value, e.g. `2024-03-05T09:00:00.0000000`.
    pub date_time: String,
    /// Zone name; UTC when the timezone preference header was honored.
    pub time_zone: Option<String>,
}

impl DateTimeTimeZone {
    fn wall_clock(&self) -> Option<NaiveDateTime> {
        let raw = self.date_time.trim_end_matches('Z');
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
            .ok()
    }

    /// The instant as local wall-clock time.
    ///
    /// Values in zones other than UTC are taken as already local.
    #[must_use]
    pub fn to_local(&self) -> Option<NaiveDateTime> {
        let value = self.wall_clock()?;
        match self.time_zone.as_deref() {
            None | Some("UTC" | "Etc/UTC" | "Coordinated Universal Time") => {
                Some(local_naive(value.and_utc()))
            }
            Some(_) => Some(value),
        }
    }

    /// The calendar date, ignoring zones.
    ///
    /// Due dates are whole days stored at midnight; shifting them into the
    /// local zone would move them to the previous day west of UTC.
    #[must_use]
    pub fn to_date(&self) -> Option<NaiveDateTime> {
        self.wall_clock()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    #[serde(default)]
    email_address: EmailAddress,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FollowupFlag {
    flag_status: Option<String>,
    due_date_time: Option<DateTimeTimeZone>,
}

/// A message resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMessage {
    id: String,
    subject: Option<String>,
    from: Option<Recipient>,
    received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    is_read: bool,
    flag: Option<FollowupFlag>,
    importance: Option<String>,
    #[serde(default)]
    has_attachments: bool,
    #[serde(default)]
    categories: Vec<String>,
    body_preview: Option<String>,
    web_link: Option<String>,
}

impl GraphMessage {
    /// Converts to a normalized message owned by `account`.
    #[must_use]
    pub fn normalize(self, account: &str) -> NormalizedMessage {
        let from = self.from.unwrap_or_default().email_address;
        let flag = self.flag.unwrap_or_default();
        NormalizedMessage {
            reference: ItemReference::remote(self.id, None),
            account: account.to_string(),
            subject: self.subject.unwrap_or_default(),
            sender_name: from.name.unwrap_or_default(),
            sender_address: from.address.unwrap_or_default(),
            received: self
                .received_date_time
                .map_or(NaiveDateTime::MIN, local_naive),
            is_read: self.is_read,
            flag_status: FlagStatus::from_remote(flag.flag_status.as_deref()),
            flag_due: flag.due_date_time.as_ref().and_then(DateTimeTimeZone::to_date),
            importance: Importance::from_remote(self.importance.as_deref()),
            has_attachments: self.has_attachments,
            categories: self.categories,
            preview: self.body_preview.filter(|p| !p.trim().is_empty()),
            link: self.web_link,
        }
    }

    /// Flag state alone.
    #[must_use]
    pub fn flag_status(&self) -> FlagStatus {
        FlagStatus::from_remote(self.flag.as_ref().and_then(|f| f.flag_status.as_deref()))
    }

    /// Web link alone.
    #[must_use]
    pub fn web_link(&self) -> Option<&str> {
        self.web_link.as_deref()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EventResponse {
    response: Option<String>,
}

/// An event resource.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEvent {
    id: String,
    subject: Option<String>,
    start: Option<DateTimeTimeZone>,
    end: Option<DateTimeTimeZone>,
    location: Option<Location>,
    response_status: Option<EventResponse>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    is_all_day: bool,
    web_link: Option<String>,
}

impl GraphEvent {
    /// Converts to a normalized event; `None` without start and end.
    #[must_use]
    pub fn normalize(self, account: &str) -> Option<NormalizedEvent> {
        let (start, end) = if self.is_all_day {
            (self.start?.to_date()?, self.end?.to_date()?)
        } else {
            (self.start?.to_local()?, self.end?.to_local()?)
        };
        Some(NormalizedEvent {
            reference: ItemReference::remote(self.id, None),
            account: account.to_string(),
            subject: self.subject.unwrap_or_default(),
            start,
            end,
            location: self
                .location
                .and_then(|l| l.display_name)
                .filter(|l| !l.is_empty()),
            response_status: ResponseStatus::from_remote(
                self.response_status.and_then(|r| r.response).as_deref(),
            ),
            is_recurring: self
                .kind
                .as_deref()
                .is_some_and(|k| k != "singleInstance"),
            is_all_day: self.is_all_day,
        })
    }

    /// Web link alone.
    #[must_use]
    pub fn web_link(&self) -> Option<&str> {
        self.web_link.as_deref()
    }
}

/// A to-do task list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoList {
    /// List id; the scope token of its tasks.
    pub id: String,
    /// Display name.
    pub display_name: Option<String>,
}

/// A to-do task.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoTask {
    id: String,
    title: Option<String>,
    status: Option<String>,
    importance: Option<String>,
    due_date_time: Option<DateTimeTimeZone>,
    #[serde(default)]
    is_reminder_on: bool,
}

impl TodoTask {
    /// Converts to a normalized task in `list`, bucketed against `today`.
    #[must_use]
    pub fn normalize(self, account: &str, list: &str, today: NaiveDate) -> NormalizedTask {
        let due = self.due_date_time.as_ref().and_then(DateTimeTimeZone::to_date);
        NormalizedTask {
            reference: ItemReference::remote(self.id, Some(list.to_string())),
            account: account.to_string(),
            subject: self.title.unwrap_or_default(),
            due,
            importance: Importance::from_remote(self.importance.as_deref()),
            is_complete: self.status.as_deref() == Some("completed"),
            has_reminder: self.is_reminder_on,
            bucket: DueBucket::classify(due, today),
        }
    }
}

/// A mail folder.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailFolder {
    /// Folder id.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: String,
    /// Number of direct children.
    #[serde(default)]
    pub child_folder_count: u32,
    /// Unread items.
    pub unread_item_count: Option<u32>,
}

impl MailFolder {
    /// As a normalized folder at `path`.
    #[must_use]
    pub fn to_folder(&self, path: String) -> Folder {
        Folder {
            name: self.display_name.clone(),
            path,
            unread: self.unread_item_count,
        }
    }
}

/// A master category.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Category name.
    pub display_name: String,
    /// `presetN` or `none`.
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ScoredAddress {
    address: Option<String>,
}

/// A people-search result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    display_name: Option<String>,
    #[serde(default)]
    scored_email_addresses: Vec<ScoredAddress>,
}

impl Person {
    /// The person's best address as a contact; `None` without one.
    #[must_use]
    pub fn into_contact(self) -> Option<Contact> {
        let email = self
            .scored_email_addresses
            .into_iter()
            .find_map(|a| a.address.filter(|a| !a.is_empty()))?;
        Some(Contact {
            name: self.display_name.unwrap_or_else(|| email.clone()),
            email,
        })
    }
}

/// The signed-in user.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Me {
    display_name: Option<String>,
    mail: Option<String>,
    user_principal_name: Option<String>,
}

impl Me {
    /// Account name: primary address, else sign-in name, else display name.
    #[must_use]
    pub fn account_name(self) -> Option<String> {
        self.mail
            .filter(|m| !m.is_empty())
            .or(self.user_principal_name)
            .or(self.display_name)
    }
}
