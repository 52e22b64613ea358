//! The desktop mail client's automation object model, as the backend sees it.
//!
//! Implementations translate these calls into the client's native object
//! model. Everything is synchronous: automation calls are blocking
//! cross-process calls and must be made from one thread.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDateTime};

use super::restriction::Restriction;
use crate::model::{Contact, FlagStatus, NewItemKind, OutgoingMail};

/// Failure of an automation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AutomationError {
    /// No desktop client can be driven on this host.
    #[error("automation unavailable: {0}")]
    Unavailable(String),

    /// No session is open.
    #[error("automation session is disconnected")]
    Disconnected,

    /// The session stopped answering (client restarted, RPC server gone).
    #[error("automation session is stale: {0}")]
    Stale(String),

    /// Item, folder or store not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other failed call.
    #[error("automation call failed: {0}")]
    Call(String),
}

impl crate::retry::Classify for AutomationError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Stale(_) | Self::Call(_))
    }
}

/// A mail store (one per configured account in the desktop client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Store id.
    pub id: String,
    /// Display name; matches the account name in settings.
    pub display_name: String,
}

/// A folder in a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderHandle {
    /// Owning store id.
    pub store_id: String,
    /// Folder entry id.
    pub entry_id: String,
    /// Folder display name.
    pub name: String,
}

/// Well-known folders every store has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultFolder {
    /// Inbox.
    Inbox,
    /// Calendar.
    Calendar,
    /// Tasks.
    Tasks,
    /// Deleted items.
    DeletedItems,
}

/// Columns a table query can project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    /// Item entry id.
    EntryId,
    /// Subject.
    Subject,
    /// Sender display name.
    SenderName,
    /// Sender address.
    SenderEmailAddress,
    /// Received time.
    ReceivedTime,
    /// Unread flag.
    UnRead,
    /// Follow-up flag state (client constant).
    FlagStatus,
    /// Follow-up due date of a mail item.
    TaskDueDate,
    /// Importance (client constant).
    Importance,
    /// Comma-separated category names.
    Categories,
    /// Attachment presence.
    HasAttachments,
    /// Body preview; only some store types expose it.
    BodyPreview,
    /// Appointment start.
    Start,
    /// Appointment end.
    End,
    /// Appointment location.
    Location,
    /// Meeting response (client constant).
    ResponseStatus,
    /// Occurrence of a recurring series.
    IsRecurring,
    /// All-day appointment.
    AllDayEvent,
    /// Task due date.
    DueDate,
    /// Task completion.
    Complete,
    /// Reminder set.
    ReminderSet,
}

impl Column {
    /// Name used when adding the column to a native table.
    ///
    /// Properties without a friendly name use their schema name.
    #[must_use]
    pub const fn native_name(self) -> &'static str {
        match self {
            Self::EntryId => "EntryID",
            Self::Subject => "Subject",
            Self::SenderName => "SenderName",
            Self::SenderEmailAddress => "SenderEmailAddress",
            Self::ReceivedTime => "ReceivedTime",
            Self::UnRead => "UnRead",
            Self::FlagStatus => "FlagStatus",
            Self::TaskDueDate => "TaskDueDate",
            Self::Importance => "Importance",
            Self::Categories => "Categories",
            Self::HasAttachments => "http://schemas.microsoft.com/mapi/proptag/0x0E1B000B",
            Self::BodyPreview => "http://schemas.microsoft.com/mapi/proptag/0x3FD9001F",
            Self::Start => "Start",
            Self::End => "End",
            Self::Location => "Location",
            Self::ResponseStatus => "ResponseStatus",
            Self::IsRecurring => "IsRecurring",
            Self::AllDayEvent => "AllDayEvent",
            Self::DueDate => "DueDate",
            Self::Complete => "Complete",
            Self::ReminderSet => "ReminderSet",
        }
    }
}

/// A property value read from a table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Text.
    Text(String),
    /// Boolean.
    Bool(bool),
    /// Integer or enum constant.
    Int(i64),
    /// Local wall-clock date.
    Date(NaiveDateTime),
}

/// The client stores "no date" as this year.
const NO_DATE_YEAR: i32 = 4501;

impl Value {
    /// Text content.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean, accepting integer 0/1.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Integer, accepting booleans.
    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Date, treating the client's "no date" sentinel as absent.
    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(d) if d.year() < NO_DATE_YEAR => Some(*d),
            _ => None,
        }
    }
}

/// One cell of a projected row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Property has a value.
    Value(Value),
    /// Property is supported but empty for this item.
    Empty,
    /// This store does not support the property.
    Unsupported,
}

/// A projected table row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: BTreeMap<Column, Cell>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value.
    #[must_use]
    pub fn with(mut self, column: Column, value: Value) -> Self {
        self.cells.insert(column, Cell::Value(value));
        self
    }

    /// Sets a cell explicitly.
    #[must_use]
    pub fn with_cell(mut self, column: Column, cell: Cell) -> Self {
        self.cells.insert(column, cell);
        self
    }

    /// The cell for `column`; columns never projected read as unsupported.
    #[must_use]
    pub fn cell(&self, column: Column) -> &Cell {
        self.cells.get(&column).unwrap_or(&Cell::Unsupported)
    }

    fn value(&self, column: Column) -> Option<&Value> {
        match self.cell(column) {
            Cell::Value(v) => Some(v),
            Cell::Empty | Cell::Unsupported => None,
        }
    }

    /// Text value of `column`.
    #[must_use]
    pub fn text(&self, column: Column) -> Option<&str> {
        self.value(column).and_then(Value::as_text)
    }

    /// Boolean value of `column`.
    #[must_use]
    pub fn bool(&self, column: Column) -> Option<bool> {
        self.value(column).and_then(Value::as_bool)
    }

    /// Integer value of `column`.
    #[must_use]
    pub fn int(&self, column: Column) -> Option<i64> {
        self.value(column).and_then(Value::as_int)
    }

    /// Date value of `column`.
    #[must_use]
    pub fn date(&self, column: Column) -> Option<NaiveDateTime> {
        self.value(column).and_then(Value::as_date)
    }
}

/// A projected, filtered read of one folder.
#[derive(Debug, Clone, PartialEq)]
pub struct TableQuery {
    /// Restriction applied by the client.
    pub filter: Option<Restriction>,
    /// Exactly the columns to project.
    pub columns: Vec<Column>,
    /// Sort column and direction (`true` = descending).
    pub sort: Option<(Column, bool)>,
    /// Expand recurring appointments into occurrences.
    pub expand_recurrences: bool,
    /// Maximum rows to return.
    pub limit: Option<usize>,
}

impl TableQuery {
    /// Query projecting `columns` with no filter.
    #[must_use]
    pub fn new(columns: &[Column]) -> Self {
        Self {
            filter: None,
            columns: columns.to_vec(),
            sort: None,
            expand_recurrences: false,
            limit: None,
        }
    }

    /// Sets the restriction.
    #[must_use]
    pub fn filtered(mut self, filter: Option<Restriction>) -> Self {
        self.filter = filter;
        self
    }

    /// Sorts by `column`.
    #[must_use]
    pub const fn sorted(mut self, column: Column, descending: bool) -> Self {
        self.sort = Some((column, descending));
        self
    }

    /// Expands recurring appointments.
    #[must_use]
    pub const fn with_recurrences(mut self) -> Self {
        self.expand_recurrences = true;
        self
    }

    /// Caps the row count.
    #[must_use]
    pub const fn limited(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Mutating action on a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemAction {
    /// Clear the unread flag.
    MarkRead,
    /// Set the follow-up flag state.
    SetFlag(FlagStatus),
    /// Move to deleted items.
    Delete,
    /// Move to another folder.
    MoveTo(FolderHandle),
    /// Show the item in the client.
    Display,
    /// Open a reply window.
    DisplayReply {
        /// Reply to all recipients.
        reply_all: bool,
    },
    /// Mark a task complete.
    MarkComplete,
}

/// An open automation session.
pub trait Automation: Send {
    /// Cheap property read proving the session is alive.
    ///
    /// # Errors
    ///
    /// Returns `Stale` or `Disconnected` when the client stopped answering.
    fn probe(&mut self) -> Result<(), AutomationError>;

    /// All stores in the profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn stores(&mut self) -> Result<Vec<StoreInfo>, AutomationError>;

    /// Root folder of a store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown store.
    fn root_folder(&mut self, store_id: &str) -> Result<FolderHandle, AutomationError>;

    /// Well-known folder of a store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store has no such folder.
    fn default_folder(
        &mut self,
        store_id: &str,
        kind: DefaultFolder,
    ) -> Result<FolderHandle, AutomationError>;

    /// Direct children of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn child_folders(
        &mut self,
        parent: &FolderHandle,
    ) -> Result<Vec<FolderHandle>, AutomationError>;

    /// Projected, filtered rows of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the restriction is rejected or the call fails.
    fn table(
        &mut self,
        folder: &FolderHandle,
        query: &TableQuery,
    ) -> Result<Vec<Row>, AutomationError>;

    /// Unread item count of a folder.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn unread_count(&mut self, folder: &FolderHandle) -> Result<u32, AutomationError>;

    /// Reads one property of one item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item is gone.
    fn item_value(
        &mut self,
        entry_id: &str,
        store_id: Option<&str>,
        column: Column,
    ) -> Result<Option<Value>, AutomationError>;

    /// Applies an action to one item.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the item is gone, or `Call` if the action fails.
    fn apply(
        &mut self,
        entry_id: &str,
        store_id: Option<&str>,
        action: &ItemAction,
    ) -> Result<(), AutomationError>;

    /// Opens a compose window for a new item.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn display_new(&mut self, kind: NewItemKind) -> Result<(), AutomationError>;

    /// Sends a message through the default account.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be sent.
    fn send(&mut self, mail: &OutgoingMail) -> Result<(), AutomationError>;

    /// Master category list as (name, client color constant).
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn categories(&mut self) -> Result<Vec<(String, i64)>, AutomationError>;

    /// Address-book lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    fn resolve_contacts(&mut self, query: &str) -> Result<Vec<Contact>, AutomationError>;
}

/// Opens automation sessions.
pub trait Connector: Send {
    /// Attaches to (or starts) the desktop client.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if no client can be driven.
    fn connect(&mut self) -> Result<Box<dyn Automation>, AutomationError>;
}

/// Connector for hosts without a scriptable desktop client.
#[derive(Debug, Clone, Default)]
pub struct Unsupported;

impl Connector for Unsupported {
    fn connect(&mut self) -> Result<Box<dyn Automation>, AutomationError> {
        Err(AutomationError::Unavailable(format!(
            "no desktop mail client automation on {}",
            std::env::consts::OS
        )))
    }
}
