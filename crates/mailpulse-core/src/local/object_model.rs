//! [`Automation`] over the desktop client's late-bound object model.
//!
//! The object model is reached through name-based dispatch: every object
//! exposes properties and methods by name, and values cross the boundary as
//! loosely typed variants. [`Dispatch`] is that surface. The platform binding
//! supplies it and everything above it is plain Rust.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tracing::{debug, warn};

use super::automation::{
    Automation, AutomationError, Cell, Column, Connector, DefaultFolder, FolderHandle, ItemAction,
    Row, StoreInfo, TableQuery, Value,
};
use crate::model::{Contact, NewItemKind, OutgoingMail};

/// A value passed to or returned from a dispatch call.
#[derive(Debug, Clone)]
pub enum Variant<D> {
    /// No value.
    Empty,
    /// Boolean.
    Bool(bool),
    /// Any integer type.
    Int(i64),
    /// String.
    Text(String),
    /// Local wall-clock date.
    Date(NaiveDateTime),
    /// Another dispatch object.
    Object(D),
}

impl<D> Variant<D> {
    /// The object, or a `Call` error naming `what` was expected.
    ///
    /// # Errors
    ///
    /// Returns `Call` if the value is not an object.
    pub fn into_object(self, what: &str) -> Result<D, AutomationError> {
        match self {
            Self::Object(object) => Ok(object),
            _ => Err(AutomationError::Call(format!("{what} is not an object"))),
        }
    }

    /// Text content; other scalars are rendered.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Date(d) => d.to_string(),
            Self::Empty | Self::Object(_) => String::new(),
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

    /// Boolean, accepting integer 0/1.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    fn into_cell(self) -> Cell {
        match self {
            Self::Empty | Self::Object(_) => Cell::Empty,
            Self::Bool(b) => Cell::Value(Value::Bool(b)),
            Self::Int(i) => Cell::Value(Value::Int(i)),
            Self::Text(s) => Cell::Value(Value::Text(s)),
            Self::Date(d) => Cell::Value(Value::Date(d)),
        }
    }
}

/// A late-bound object.
pub trait Dispatch: Clone + Send + Sized {
    /// Reads a property, with optional index arguments.
    ///
    /// # Errors
    ///
    /// Returns `Stale` if the server is gone, `Call` for any other failure.
    fn get(&self, name: &str, args: &[Variant<Self>]) -> Result<Variant<Self>, AutomationError>;

    /// Writes a property.
    ///
    /// # Errors
    ///
    /// Returns `Stale` if the server is gone, `Call` for any other failure.
    fn put(&self, name: &str, value: Variant<Self>) -> Result<(), AutomationError>;

    /// Invokes a method.
    ///
    /// # Errors
    ///
    /// Returns `Stale` if the server is gone, `Call` for any other failure.
    fn call(&self, name: &str, args: &[Variant<Self>]) -> Result<Variant<Self>, AutomationError>;
}

/// Starts or attaches to the client's application object.
pub trait Activator: Send {
    /// Object type handed out by this activator.
    type Object: Dispatch + 'static;

    /// The application object.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the client is not installed or refuses to start.
    fn application(&mut self) -> Result<Self::Object, AutomationError>;
}

/// [`Connector`] opening object-model sessions through an [`Activator`].
#[derive(Debug)]
pub struct ObjectModelConnector<A> {
    activator: A,
}

impl<A: Activator> ObjectModelConnector<A> {
    /// Wraps `activator`.
    #[must_use]
    pub const fn new(activator: A) -> Self {
        Self { activator }
    }
}

impl<A: Activator> Connector for ObjectModelConnector<A> {
    fn connect(&mut self) -> Result<Box<dyn Automation>, AutomationError> {
        let app = self.activator.application()?;
        let namespace = app
            .call("GetNamespace", &[Variant::Text("MAPI".into())])?
            .into_object("Namespace")?;
        Ok(Box::new(ObjectModelSession { app, namespace }))
    }
}

struct ObjectModelSession<D> {
    app: D,
    namespace: D,
}

/// Client constants.
const FOLDER_INBOX: i64 = 6;
const FOLDER_CALENDAR: i64 = 9;
const FOLDER_TASKS: i64 = 13;
const FOLDER_DELETED: i64 = 3;
const ITEM_MAIL: i64 = 0;
const ITEM_APPOINTMENT: i64 = 1;
const ITEM_CONTACT: i64 = 2;
const ITEM_TASK: i64 = 3;
const MEETING: i64 = 1;

fn not_found(err: AutomationError) -> AutomationError {
    match err {
        AutomationError::Call(message) => AutomationError::NotFound(message),
        other => other,
    }
}

fn object<D: Dispatch>(parent: &D, name: &str) -> Result<D, AutomationError> {
    parent.get(name, &[])?.into_object(name)
}

fn string<D: Dispatch>(parent: &D, name: &str) -> Result<String, AutomationError> {
    Ok(parent.get(name, &[])?.into_text())
}

/// Items of a one-based collection.
fn members<D: Dispatch>(collection: &D) -> Result<Vec<D>, AutomationError> {
    let count = collection.get("Count", &[])?.as_int().unwrap_or(0);
    (1..=count)
        .map(|i| collection.call("Item", &[Variant::Int(i)])?.into_object("Item"))
        .collect()
}

/// Table date columns come back in UTC.
const fn utc_in_tables(column: Column) -> bool {
    matches!(column, Column::ReceivedTime | Column::Start | Column::End)
}

impl<D: Dispatch> ObjectModelSession<D> {
    fn store(&self, store_id: &str) -> Result<D, AutomationError> {
        self.namespace
            .call("GetStoreFromID", &[Variant::Text(store_id.into())])
            .map_err(not_found)?
            .into_object("Store")
    }

    fn folder(&self, handle: &FolderHandle) -> Result<D, AutomationError> {
        self.namespace
            .call(
                "GetFolderFromID",
                &[
                    Variant::Text(handle.entry_id.clone()),
                    Variant::Text(handle.store_id.clone()),
                ],
            )
            .map_err(not_found)?
            .into_object("Folder")
    }

    fn item(&self, entry_id: &str, store_id: Option<&str>) -> Result<D, AutomationError> {
        let mut args = vec![Variant::Text(entry_id.into())];
        if let Some(store_id) = store_id {
            args.push(Variant::Text(store_id.into()));
        }
        self.namespace
            .call("GetItemFromID", &args)
            .map_err(not_found)?
            .into_object("Item")
    }

    fn create(&self, kind: i64) -> Result<D, AutomationError> {
        self.app
            .call("CreateItem", &[Variant::Int(kind)])?
            .into_object("CreateItem")
    }

    /// Tabular read: one round trip per row, only the projected columns.
    fn table_rows(&self, folder: &D, query: &TableQuery) -> Result<Vec<Row>, AutomationError> {
        let args: Vec<Variant<D>> = query
            .filter
            .as_ref()
            .map(|f| Variant::Text(f.render()))
            .into_iter()
            .collect();
        let table = folder.call("GetTable", &args)?.into_object("Table")?;

        let columns = object(&table, "Columns")?;
        columns.call("RemoveAll", &[])?;
        let mut supported = Vec::with_capacity(query.columns.len());
        for column in &query.columns {
            let name = column.native_name();
            match columns.call("Add", &[Variant::Text(name.into())]) {
                Ok(_) => supported.push(*column),
                Err(err @ AutomationError::Stale(_)) => return Err(err),
                Err(err) => debug!(column = name, %err, "Column not available in this store"),
            }
        }
        if let Some((column, descending)) = query.sort {
            table.call(
                "Sort",
                &[Variant::Text(column.native_name().into()), Variant::Bool(descending)],
            )?;
        }

        let mut rows = Vec::new();
        while !table.get("EndOfTable", &[])?.as_bool().unwrap_or(true) {
            if query.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            let raw = table.call("GetNextRow", &[])?.into_object("Row")?;
            let mut row = Row::new();
            for column in &query.columns {
                let cell = if supported.contains(column) {
                    let name = Variant::Text(column.native_name().into());
                    let method = if utc_in_tables(*column) { "UTCToLocalTime" } else { "Item" };
                    raw.call(method, &[name])?.into_cell()
                } else {
                    Cell::Unsupported
                };
                row = row.with_cell(*column, cell);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Item-by-item read; the only way to expand recurring appointments.
    fn expanded_rows(&self, folder: &D, query: &TableQuery) -> Result<Vec<Row>, AutomationError> {
        let all = object(folder, "Items")?;
        all.call("Sort", &[Variant::Text("[Start]".into()), Variant::Bool(false)])?;
        all.put("IncludeRecurrences", Variant::Bool(true))?;
        let items = match &query.filter {
            Some(filter) => all
                .call("Restrict", &[Variant::Text(filter.render())])?
                .into_object("Restrict")?,
            None => all,
        };

        let mut rows = Vec::new();
        let mut next = items.call("GetFirst", &[])?;
        while let Variant::Object(item) = next {
            if query.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
            let mut row = Row::new();
            for column in &query.columns {
                row = row.with_cell(*column, item_cell(&item, *column)?);
            }
            rows.push(row);
            next = items.call("GetNext", &[])?;
        }
        Ok(rows)
    }
}

/// One property of one item; schema names go through the property accessor.
fn item_cell<D: Dispatch>(item: &D, column: Column) -> Result<Cell, AutomationError> {
    let name = column.native_name();
    let read = if name.starts_with("http://") {
        object(item, "PropertyAccessor")
            .and_then(|accessor| accessor.call("GetProperty", &[Variant::Text(name.into())]))
    } else {
        item.get(name, &[])
    };
    match read {
        Ok(value) => Ok(value.into_cell()),
        Err(err @ AutomationError::Stale(_)) => Err(err),
        Err(_) => Ok(Cell::Unsupported),
    }
}

impl<D: Dispatch> Automation for ObjectModelSession<D> {
    fn probe(&mut self) -> Result<(), AutomationError> {
        match self.namespace.get("CurrentProfileName", &[]) {
            Ok(_) => Ok(()),
            Err(AutomationError::Call(message)) => Err(AutomationError::Stale(message)),
            Err(err) => Err(err),
        }
    }

    fn stores(&mut self) -> Result<Vec<StoreInfo>, AutomationError> {
        let mut stores = Vec::new();
        for store in members(&object(&self.namespace, "Stores")?)? {
            match (string(&store, "StoreID"), string(&store, "DisplayName")) {
                (Ok(id), Ok(display_name)) => stores.push(StoreInfo { id, display_name }),
                (Err(err), _) | (_, Err(err)) => {
                    if matches!(err, AutomationError::Stale(_)) {
                        return Err(err);
                    }
                    warn!(%err, "Skipping unreadable store");
                }
            }
        }
        Ok(stores)
    }

    fn root_folder(&mut self, store_id: &str) -> Result<FolderHandle, AutomationError> {
        let root = self.store(store_id)?.call("GetRootFolder", &[])?;
        handle(store_id, &root.into_object("GetRootFolder")?)
    }

    fn default_folder(
        &mut self,
        store_id: &str,
        kind: DefaultFolder,
    ) -> Result<FolderHandle, AutomationError> {
        let code = match kind {
            DefaultFolder::Inbox => FOLDER_INBOX,
            DefaultFolder::Calendar => FOLDER_CALENDAR,
            DefaultFolder::Tasks => FOLDER_TASKS,
            DefaultFolder::DeletedItems => FOLDER_DELETED,
        };
        let folder = self
            .store(store_id)?
            .call("GetDefaultFolder", &[Variant::Int(code)])
            .map_err(not_found)?
            .into_object("GetDefaultFolder")?;
        handle(store_id, &folder)
    }

    fn child_folders(
        &mut self,
        parent: &FolderHandle,
    ) -> Result<Vec<FolderHandle>, AutomationError> {
        let folders = object(&self.folder(parent)?, "Folders")?;
        members(&folders)?
            .iter()
            .map(|child| handle(&parent.store_id, child))
            .collect()
    }

    fn table(
        &mut self,
        folder: &FolderHandle,
        query: &TableQuery,
    ) -> Result<Vec<Row>, AutomationError> {
        let folder = self.folder(folder)?;
        if query.expand_recurrences {
            self.expanded_rows(&folder, query)
        } else {
            self.table_rows(&folder, query)
        }
    }

    fn unread_count(&mut self, folder: &FolderHandle) -> Result<u32, AutomationError> {
        let count = self.folder(folder)?.get("UnReadItemCount", &[])?;
        Ok(count
            .as_int()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0))
    }

    fn item_value(
        &mut self,
        entry_id: &str,
        store_id: Option<&str>,
        column: Column,
    ) -> Result<Option<Value>, AutomationError> {
        match item_cell(&self.item(entry_id, store_id)?, column)? {
            Cell::Value(value) => Ok(Some(value)),
            Cell::Empty | Cell::Unsupported => Ok(None),
        }
    }

    fn apply(
        &mut self,
        entry_id: &str,
        store_id: Option<&str>,
        action: &ItemAction,
    ) -> Result<(), AutomationError> {
        let item = self.item(entry_id, store_id)?;
        match action {
            ItemAction::MarkRead => {
                item.put("UnRead", Variant::Bool(false))?;
                item.call("Save", &[])?;
            }
            ItemAction::SetFlag(status) => {
                item.put("FlagStatus", Variant::Int(status.to_local()))?;
                item.call("Save", &[])?;
            }
            ItemAction::Delete => {
                item.call("Delete", &[])?;
            }
            ItemAction::MoveTo(target) => {
                let target = self.folder(target)?;
                item.call("Move", &[Variant::Object(target)])?;
            }
            ItemAction::Display => {
                item.call("Display", &[])?;
            }
            ItemAction::DisplayReply { reply_all } => {
                let method = if *reply_all { "ReplyAll" } else { "Reply" };
                item.call(method, &[])?.into_object(method)?.call("Display", &[])?;
            }
            ItemAction::MarkComplete => {
                item.call("MarkComplete", &[])?;
            }
        }
        Ok(())
    }

    fn display_new(&mut self, kind: NewItemKind) -> Result<(), AutomationError> {
        let item = match kind {
            NewItemKind::Email => self.create(ITEM_MAIL)?,
            NewItemKind::Meeting => {
                let item = self.create(ITEM_APPOINTMENT)?;
                item.put("MeetingStatus", Variant::Int(MEETING))?;
                item
            }
            NewItemKind::Task => self.create(ITEM_TASK)?,
            NewItemKind::Contact => self.create(ITEM_CONTACT)?,
        };
        item.call("Display", &[])?;
        Ok(())
    }

    fn send(&mut self, mail: &OutgoingMail) -> Result<(), AutomationError> {
        if let Some(path) = mail.attachment.as_ref().filter(|path| !path.is_file()) {
            return Err(AutomationError::NotFound(path.display().to_string()));
        }
        let item = self.create(ITEM_MAIL)?;
        item.put("To", Variant::Text(mail.to.join("; ")))?;
        item.put("Subject", Variant::Text(mail.subject.clone()))?;
        item.put("Body", Variant::Text(mail.body.clone()))?;
        if let Some(path) = &mail.attachment {
            object(&item, "Attachments")?
                .call("Add", &[Variant::Text(path.display().to_string())])?;
        }
        item.call("Send", &[])?;
        Ok(())
    }

    fn categories(&mut self) -> Result<Vec<(String, i64)>, AutomationError> {
        members(&object(&self.namespace, "Categories")?)?
            .iter()
            .map(|category| {
                let name = string(category, "Name")?;
                let color = category.get("Color", &[])?.as_int().unwrap_or(0);
                Ok((name, color))
            })
            .collect()
    }

    fn resolve_contacts(&mut self, query: &str) -> Result<Vec<Contact>, AutomationError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let recipient = self
            .namespace
            .call("CreateRecipient", &[Variant::Text(query.into())])?
            .into_object("CreateRecipient")?;
        if !recipient.call("Resolve", &[])?.as_bool().unwrap_or(false) {
            return Ok(Vec::new());
        }
        let entry = object(&recipient, "AddressEntry")?;
        let name = string(&entry, "Name")?;
        let email = if string(&entry, "Type")? == "EX" {
            match entry.call("GetExchangeUser", &[])? {
                Variant::Object(user) => string(&user, "PrimarySmtpAddress")?,
                _ => string(&entry, "Address")?,
            }
        } else {
            string(&entry, "Address")?
        };
        if email.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Contact { name, email }])
    }
}

fn handle<D: Dispatch>(store_id: &str, folder: &D) -> Result<FolderHandle, AutomationError> {
    Ok(FolderHandle {
        store_id: store_id.to_owned(),
        entry_id: string(folder, "EntryID")?,
        name: string(folder, "Name")?,
    })
}

/// Converts an automation date (days since 1899-12-30, time as the fraction).
#[must_use]
pub fn ole_date(value: f64) -> Option<NaiveDateTime> {
    if !value.is_finite() {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = value.trunc();
    // Negative dates still count the time of day forward.
    let millis = ((value - days).abs() * 86_400_000.0).round();
    #[allow(clippy::cast_possible_truncation)]
    let (days, millis) = (days as i64, millis as i64);
    base.checked_add_signed(TimeDelta::try_days(days)?)?
        .checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}
