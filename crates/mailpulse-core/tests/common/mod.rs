//! In-memory fakes shared by the integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};

use mailpulse_core::backend::{InboxPage, InboxQuery, MailBackend, wants_calendar, wants_mail};
use mailpulse_core::local::{
    Automation, AutomationError, Column, Connector, DefaultFolder, FolderHandle, ItemAction,
    Literal, Op, Property, Restriction, Row, StoreInfo, TableQuery, Value,
};
use mailpulse_core::model::{
    Account, BackendKind, CategoryColor, Contact, DueBucket, FlagStatus, Folder, Importance,
    ItemReference, NewItemKind, NormalizedEvent, NormalizedMessage, NormalizedTask, OutgoingMail,
    ResponseStatus,
};
use mailpulse_core::{EnabledAccounts, Error, Result};

// ---------------------------------------------------------------------------
// Automation fake
// ---------------------------------------------------------------------------

/// A folder in the fake object model.
#[derive(Debug, Clone)]
pub struct FakeFolder {
    pub handle: FolderHandle,
    pub parent: Option<String>,
    pub default: Option<DefaultFolder>,
    pub rows: Vec<Row>,
}

/// State shared between a test and the sessions it hands out.
#[derive(Debug, Default)]
pub struct FakeState {
    pub available: bool,
    pub stores: Vec<StoreInfo>,
    pub folders: Vec<FakeFolder>,
    /// Probes that fail with `Stale` before succeeding again.
    pub stale_probes: u32,
    /// Folder entry ids whose table reads fail.
    pub broken_folders: HashSet<String>,
    pub connects: u32,
    pub rendered_filters: Vec<String>,
    pub actions: Vec<(String, ItemAction)>,
    pub categories: Vec<(String, i64)>,
    pub contacts: Vec<Contact>,
    pub sent: Vec<OutgoingMail>,
}

pub type Shared = Arc<Mutex<FakeState>>;

impl FakeState {
    pub fn new() -> Shared {
        Arc::new(Mutex::new(Self {
            available: true,
            ..Self::default()
        }))
    }

    /// Adds a store with inbox, calendar, tasks and deleted-items folders.
    pub fn add_store(&mut self, id: &str, name: &str) {
        self.stores.push(StoreInfo {
            id: id.into(),
            display_name: name.into(),
        });
        self.folders.push(FakeFolder {
            handle: handle(id, &format!("{id}-root"), name),
            parent: None,
            default: None,
            rows: Vec::new(),
        });
        for (kind, folder_name) in [
            (DefaultFolder::Inbox, "Inbox"),
            (DefaultFolder::Calendar, "Calendar"),
            (DefaultFolder::Tasks, "Tasks"),
            (DefaultFolder::DeletedItems, "Deleted Items"),
        ] {
            self.folders.push(FakeFolder {
                handle: handle(id, &format!("{id}-{folder_name}"), folder_name),
                parent: Some(format!("{id}-root")),
                default: Some(kind),
                rows: Vec::new(),
            });
        }
    }

    /// Adds a subfolder under the folder with entry id `parent`.
    pub fn add_folder(&mut self, store: &str, parent: &str, name: &str) -> String {
        let entry_id = format!("{parent}/{name}");
        self.folders.push(FakeFolder {
            handle: handle(store, &entry_id, name),
            parent: Some(parent.into()),
            default: None,
            rows: Vec::new(),
        });
        entry_id
    }

    pub fn folder_mut(&mut self, entry_id: &str) -> &mut FakeFolder {
        self.folders
            .iter_mut()
            .find(|f| f.handle.entry_id == entry_id)
            .unwrap()
    }

    pub fn push_row(&mut self, folder_entry_id: &str, row: Row) {
        self.folder_mut(folder_entry_id).rows.push(row);
    }

    fn find_row(&mut self, entry_id: &str) -> Option<(usize, usize)> {
        for (fi, folder) in self.folders.iter().enumerate() {
            for (ri, row) in folder.rows.iter().enumerate() {
                if row.text(Column::EntryId) == Some(entry_id) {
                    return Some((fi, ri));
                }
            }
        }
        None
    }

    /// Current value of a column on an item.
    pub fn value(&mut self, entry_id: &str, column: Column) -> Option<Value> {
        let (fi, ri) = self.find_row(entry_id)?;
        let row = &self.folders[fi].rows[ri];
        match row.cell(column) {
            mailpulse_core::local::Cell::Value(v) => Some(v.clone()),
            _ => None,
        }
    }
}

pub fn handle(store: &str, entry_id: &str, name: &str) -> FolderHandle {
    FolderHandle {
        store_id: store.into(),
        entry_id: entry_id.into(),
        name: name.into(),
    }
}

/// Local entry id: 48 hex digits derived from `n`.
pub fn entry_id(n: u32) -> String {
    format!("00000000{n:040X}")
}

pub fn message_row(id: &str, subject: &str, received: NaiveDateTime) -> Row {
    Row::new()
        .with(Column::EntryId, Value::Text(id.into()))
        .with(Column::Subject, Value::Text(subject.into()))
        .with(Column::SenderName, Value::Text("Sender".into()))
        .with(Column::SenderEmailAddress, Value::Text("sender@example.com".into()))
        .with(Column::ReceivedTime, Value::Date(received))
        .with(Column::UnRead, Value::Bool(true))
        .with(Column::FlagStatus, Value::Int(0))
        .with(Column::Importance, Value::Int(1))
}

pub fn task_row(id: &str, subject: &str, due: Option<NaiveDateTime>) -> Row {
    let row = Row::new()
        .with(Column::EntryId, Value::Text(id.into()))
        .with(Column::Subject, Value::Text(subject.into()))
        .with(Column::Complete, Value::Bool(false))
        .with(Column::Importance, Value::Int(1));
    match due {
        Some(due) => row.with(Column::DueDate, Value::Date(due)),
        None => row.with_cell(Column::DueDate, mailpulse_core::local::Cell::Empty),
    }
}

pub fn event_row(id: &str, subject: &str, start: NaiveDateTime, minutes: i64) -> Row {
    Row::new()
        .with(Column::EntryId, Value::Text(id.into()))
        .with(Column::Subject, Value::Text(subject.into()))
        .with(Column::Start, Value::Date(start))
        .with(Column::End, Value::Date(start + Duration::minutes(minutes)))
}

const fn column_of(property: Property) -> Column {
    match property {
        Property::Unread => Column::UnRead,
        Property::FlagStatus => Column::FlagStatus,
        Property::TaskDueDate => Column::TaskDueDate,
        Property::DueDate => Column::DueDate,
        Property::ReceivedTime => Column::ReceivedTime,
        Property::Complete => Column::Complete,
        Property::Start => Column::Start,
        Property::End => Column::End,
    }
}

fn compare<T: Ord>(left: &T, op: Op, right: &T) -> bool {
    match op {
        Op::Eq => left == right,
        Op::Ne => left != right,
        Op::Lt => left < right,
        Op::Le => left <= right,
        Op::Gt => left > right,
        Op::Ge => left >= right,
    }
}

/// Evaluates a restriction against a row the way the client would.
pub fn matches(restriction: &Restriction, row: &Row) -> bool {
    match restriction {
        Restriction::Compare {
            property,
            op,
            value,
        } => {
            let column = column_of(*property);
            match value {
                Literal::Bool(b) => row.bool(column).is_some_and(|v| compare(&v, *op, b)),
                Literal::Int(i) => row.int(column).is_some_and(|v| compare(&v, *op, i)),
                Literal::Date(d) => row.date(column).is_some_and(|v| compare(&v, *op, d)),
            }
        }
        Restriction::IsNull(property) => row.date(column_of(*property)).is_none(),
        Restriction::And(parts) => parts.iter().all(|p| matches(p, row)),
        Restriction::Or(parts) => parts.iter().any(|p| matches(p, row)),
        Restriction::Not(inner) => !matches(inner, row),
    }
}

/// Session over shared fake state.
pub struct FakeAutomation {
    state: Shared,
}

impl FakeAutomation {
    fn folder(&self, entry_id: &str) -> std::result::Result<FakeFolder, AutomationError> {
        self.state
            .lock()
            .unwrap()
            .folders
            .iter()
            .find(|f| f.handle.entry_id == entry_id)
            .cloned()
            .ok_or_else(|| AutomationError::NotFound(entry_id.into()))
    }
}

impl Automation for FakeAutomation {
    fn probe(&mut self) -> std::result::Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        if !state.available {
            return Err(AutomationError::Disconnected);
        }
        if state.stale_probes > 0 {
            state.stale_probes -= 1;
            return Err(AutomationError::Stale("RPC server unavailable".into()));
        }
        Ok(())
    }

    fn stores(&mut self) -> std::result::Result<Vec<StoreInfo>, AutomationError> {
        Ok(self.state.lock().unwrap().stores.clone())
    }

    fn root_folder(
        &mut self,
        store_id: &str,
    ) -> std::result::Result<FolderHandle, AutomationError> {
        self.folder(&format!("{store_id}-root")).map(|f| f.handle)
    }

    fn default_folder(
        &mut self,
        store_id: &str,
        kind: DefaultFolder,
    ) -> std::result::Result<FolderHandle, AutomationError> {
        self.state
            .lock()
            .unwrap()
            .folders
            .iter()
            .find(|f| f.handle.store_id == store_id && f.default == Some(kind))
            .map(|f| f.handle.clone())
            .ok_or_else(|| AutomationError::NotFound(format!("{kind:?}")))
    }

    fn child_folders(
        &mut self,
        parent: &FolderHandle,
    ) -> std::result::Result<Vec<FolderHandle>, AutomationError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .folders
            .iter()
            .filter(|f| f.parent.as_deref() == Some(parent.entry_id.as_str()))
            .map(|f| f.handle.clone())
            .collect())
    }

    fn table(
        &mut self,
        folder: &FolderHandle,
        query: &TableQuery,
    ) -> std::result::Result<Vec<Row>, AutomationError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.broken_folders.contains(&folder.entry_id) {
                return Err(AutomationError::Call("table read failed".into()));
            }
            if let Some(filter) = &query.filter {
                state.rendered_filters.push(filter.render());
            }
        }
        let mut rows: Vec<Row> = self
            .folder(&folder.entry_id)?
            .rows
            .into_iter()
            .filter(|row| query.filter.as_ref().is_none_or(|f| matches(f, row)))
            .collect();
        if let Some((column, descending)) = query.sort {
            rows.sort_by(|a, b| {
                let order = a.date(column).cmp(&b.date(column));
                if descending { order.reverse() } else { order }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn unread_count(&mut self, folder: &FolderHandle) -> std::result::Result<u32, AutomationError> {
        let folder = self.folder(&folder.entry_id)?;
        Ok(u32::try_from(
            folder
                .rows
                .iter()
                .filter(|r| r.bool(Column::UnRead) == Some(true))
                .count(),
        )
        .unwrap())
    }

    fn item_value(
        &mut self,
        entry_id: &str,
        _store_id: Option<&str>,
        column: Column,
    ) -> std::result::Result<Option<Value>, AutomationError> {
        let mut state = self.state.lock().unwrap();
        if state.find_row(entry_id).is_none() {
            return Err(AutomationError::NotFound(entry_id.into()));
        }
        Ok(state.value(entry_id, column))
    }

    fn apply(
        &mut self,
        entry_id: &str,
        _store_id: Option<&str>,
        action: &ItemAction,
    ) -> std::result::Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        let (fi, ri) = state
            .find_row(entry_id)
            .ok_or_else(|| AutomationError::NotFound(entry_id.into()))?;
        match action {
            ItemAction::MarkRead => {
                let row = state.folders[fi].rows[ri].clone();
                state.folders[fi].rows[ri] = row.with(Column::UnRead, Value::Bool(false));
            }
            ItemAction::SetFlag(status) => {
                let row = state.folders[fi].rows[ri].clone();
                state.folders[fi].rows[ri] =
                    row.with(Column::FlagStatus, Value::Int(status.to_local()));
            }
            ItemAction::MarkComplete => {
                let row = state.folders[fi].rows[ri].clone();
                state.folders[fi].rows[ri] = row.with(Column::Complete, Value::Bool(true));
            }
            ItemAction::Delete | ItemAction::MoveTo(_) => {
                let row = state.folders[fi].rows.remove(ri);
                let target = match action {
                    ItemAction::MoveTo(folder) => folder.entry_id.clone(),
                    _ => {
                        let store = state.folders[fi].handle.store_id.clone();
                        format!("{store}-Deleted Items")
                    }
                };
                state.folder_mut(&target).rows.push(row);
            }
            ItemAction::Display | ItemAction::DisplayReply { .. } => {}
        }
        state.actions.push((entry_id.to_string(), action.clone()));
        Ok(())
    }

    fn display_new(&mut self, _kind: NewItemKind) -> std::result::Result<(), AutomationError> {
        Ok(())
    }

    fn send(&mut self, mail: &OutgoingMail) -> std::result::Result<(), AutomationError> {
        self.state.lock().unwrap().sent.push(mail.clone());
        Ok(())
    }

    fn categories(&mut self) -> std::result::Result<Vec<(String, i64)>, AutomationError> {
        Ok(self.state.lock().unwrap().categories.clone())
    }

    fn resolve_contacts(
        &mut self,
        query: &str,
    ) -> std::result::Result<Vec<Contact>, AutomationError> {
        let needle = query.to_lowercase();
        Ok(self
            .state
            .lock()
            .unwrap()
            .contacts
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle) || c.email.contains(&needle))
            .cloned()
            .collect())
    }
}

/// Connector handing out sessions over `state`.
pub struct FakeConnector(pub Shared);

impl Connector for FakeConnector {
    fn connect(&mut self) -> std::result::Result<Box<dyn Automation>, AutomationError> {
        let mut state = self.0.lock().unwrap();
        if !state.available {
            return Err(AutomationError::Unavailable("client not running".into()));
        }
        state.connects += 1;
        Ok(Box::new(FakeAutomation {
            state: Arc::clone(&self.0),
        }))
    }
}

// ---------------------------------------------------------------------------
// Backend fake
// ---------------------------------------------------------------------------

pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn reference(kind: BackendKind, id: &str) -> ItemReference {
    match kind {
        BackendKind::Local => ItemReference::local(id, None),
        BackendKind::Remote => ItemReference::remote(id, None),
    }
}

pub fn message(
    kind: BackendKind,
    account: &str,
    id: &str,
    received: NaiveDateTime,
) -> NormalizedMessage {
    NormalizedMessage {
        reference: reference(kind, id),
        account: account.into(),
        subject: format!("Message {id}"),
        sender_name: "Sender".into(),
        sender_address: "sender@example.com".into(),
        received,
        is_read: false,
        flag_status: FlagStatus::None,
        flag_due: None,
        importance: Importance::Normal,
        has_attachments: false,
        categories: Vec::new(),
        preview: None,
        link: None,
    }
}

pub fn event(kind: BackendKind, id: &str, start: NaiveDateTime) -> NormalizedEvent {
    NormalizedEvent {
        reference: reference(kind, id),
        account: "acct".into(),
        subject: format!("Event {id}"),
        start,
        end: start + Duration::minutes(30),
        location: None,
        response_status: ResponseStatus::Accepted,
        is_recurring: false,
        is_all_day: false,
    }
}

pub fn task(
    kind: BackendKind,
    id: &str,
    due: Option<NaiveDateTime>,
    importance: Importance,
    has_reminder: bool,
) -> NormalizedTask {
    NormalizedTask {
        reference: reference(kind, id),
        account: "acct".into(),
        subject: format!("Task {id}"),
        due,
        importance,
        is_complete: false,
        has_reminder,
        bucket: DueBucket::classify(due, Local::now().date_naive()),
    }
}

/// Canned data and a call log.
#[derive(Debug, Default)]
pub struct FakeData {
    pub connected: bool,
    pub can_connect: bool,
    pub offline: bool,
    pub accounts: Vec<String>,
    pub messages: Vec<NormalizedMessage>,
    pub unread: u32,
    pub events: Vec<NormalizedEvent>,
    pub tasks: Vec<NormalizedTask>,
    pub categories: BTreeMap<String, CategoryColor>,
    pub contacts: Vec<Contact>,
    /// Ids that mutating actions succeed on.
    pub owned_ids: HashSet<String>,
    pub calls: Vec<String>,
}

/// Backend serving canned data.
pub struct FakeBackend {
    pub kind: BackendKind,
    pub data: Arc<Mutex<FakeData>>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> (Self, Arc<Mutex<FakeData>>) {
        let data = Arc::new(Mutex::new(FakeData {
            can_connect: true,
            ..FakeData::default()
        }));
        (
            Self {
                kind,
                data: Arc::clone(&data),
            },
            data,
        )
    }

    fn log(&self, call: String) {
        self.data.lock().unwrap().calls.push(call);
    }

    fn read_guard(&self) -> Result<()> {
        if self.data.lock().unwrap().offline {
            return Err(Error::Connectivity("timed out".into()));
        }
        Ok(())
    }

    fn mutate(&self, name: &str, item: &ItemReference) -> bool {
        self.log(format!("{name}:{}", item.id));
        self.data.lock().unwrap().owned_ids.contains(&item.id)
    }
}

fn filter_names(filter: Option<&EnabledAccounts>) -> String {
    filter.map_or_else(
        || "*".to_string(),
        |accounts| accounts.keys().cloned().collect::<Vec<_>>().join(","),
    )
}

#[async_trait]
impl MailBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn connect(&mut self) -> bool {
        let mut data = self.data.lock().unwrap();
        data.connected = data.can_connect && !data.offline;
        data.connected
    }

    async fn reconnect(&mut self) -> bool {
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.data.lock().unwrap().connected
    }

    fn known_accounts(&self) -> Vec<String> {
        self.data.lock().unwrap().accounts.clone()
    }

    async fn get_accounts(&mut self) -> Result<Vec<Account>> {
        self.read_guard()?;
        Ok(self
            .known_accounts()
            .into_iter()
            .map(|name| Account::new(name, self.kind))
            .collect())
    }

    async fn get_inbox_items(&mut self, query: &InboxQuery) -> Result<InboxPage> {
        self.log(format!("inbox:{}", filter_names(query.accounts.as_ref())));
        self.read_guard()?;
        let data = self.data.lock().unwrap();
        let mut items: Vec<_> = data
            .messages
            .iter()
            .filter(|m| wants_mail(query.accounts.as_ref(), &m.account))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.received.cmp(&a.received));
        items.truncate(query.count);
        Ok(InboxPage {
            items,
            unread: data.unread,
        })
    }

    async fn get_unread_count(&mut self, _accounts: Option<&EnabledAccounts>) -> Result<u32> {
        self.read_guard()?;
        Ok(self.data.lock().unwrap().unread)
    }

    async fn mark_as_read(&mut self, item: &ItemReference) -> bool {
        self.mutate("mark_as_read", item)
    }

    async fn delete_email(&mut self, item: &ItemReference) -> bool {
        self.mutate("delete_email", item)
    }

    async fn toggle_flag(&mut self, item: &ItemReference) -> bool {
        self.mutate("toggle_flag", item)
    }

    async fn unflag_email(&mut self, item: &ItemReference) -> bool {
        self.mutate("unflag_email", item)
    }

    async fn move_email(&mut self, item: &ItemReference, _folder_path: &str) -> bool {
        self.mutate("move_email", item)
    }

    async fn reply(&mut self, item: &ItemReference, _reply_all: bool) -> bool {
        self.mutate("reply", item)
    }

    async fn open_item(&mut self, item: &ItemReference) -> bool {
        self.mutate("open_item", item)
    }

    async fn get_calendar_items(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<NormalizedEvent>> {
        self.read_guard()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| wants_calendar(accounts, &e.account) && e.start < end && e.end > start)
            .cloned()
            .collect())
    }

    async fn get_tasks(
        &mut self,
        _accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Result<Vec<NormalizedTask>> {
        self.read_guard()?;
        Ok(self
            .data
            .lock()
            .unwrap()
            .tasks
            .iter()
            .filter(|t| t.bucket.selected_by(due_filters))
            .cloned()
            .collect())
    }

    async fn mark_task_complete(&mut self, item: &ItemReference) -> bool {
        self.mutate("mark_task_complete", item)
    }

    async fn create_item(&mut self, kind: NewItemKind) -> bool {
        self.log(format!("create_item:{kind:?}"));
        true
    }

    async fn check_new_mail(
        &mut self,
        _accounts: Option<&EnabledAccounts>,
    ) -> Result<Vec<NormalizedMessage>> {
        self.read_guard()?;
        Ok(Vec::new())
    }

    async fn get_category_map(&mut self) -> Result<BTreeMap<String, CategoryColor>> {
        self.read_guard()?;
        Ok(self.data.lock().unwrap().categories.clone())
    }

    async fn search_contacts(&mut self, query: &str) -> Result<Vec<Contact>> {
        self.log(format!("search_contacts:{query}"));
        self.read_guard()?;
        Ok(self.data.lock().unwrap().contacts.clone())
    }

    async fn get_folder_list(&mut self, account: &str) -> Result<Vec<Folder>> {
        self.log(format!("get_folder_list:{account}"));
        Ok(Vec::new())
    }

    async fn send_email_with_attachment(&mut self, mail: &OutgoingMail) -> bool {
        self.log(format!("send:{}", mail.subject));
        true
    }
}
