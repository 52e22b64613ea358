//! Backend driving the desktop mail client through its automation model.
//!
//! Sessions are fragile: the client can be restarted underneath us or stop
//! answering. Every batch of calls therefore starts with a cheap probe, and
//! a failed batch is retried once after a full reconnect. Failures inside one
//! account or folder are logged and skipped so the rest of the poll survives.

mod automation;
#[cfg(windows)]
mod com;
mod mapping;
mod object_model;
mod restriction;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime};
use tracing::{debug, info, warn};

pub use automation::{
    Automation, AutomationError, Cell, Column, Connector, DefaultFolder, FolderHandle, ItemAction,
    Row, StoreInfo, TableQuery, Unsupported, Value,
};
#[cfg(windows)]
pub use com::{ComActivator, ComObject};
pub use mapping::{EVENT_COLUMNS, MESSAGE_COLUMNS, TASK_COLUMNS};
pub use object_model::{Activator, Dispatch, ObjectModelConnector, Variant, ole_date};
pub use restriction::{Dialect, Literal, Op, Property, Restriction, date_literal};

use crate::backend::{InboxPage, InboxQuery, MailBackend, folders_for, wants_calendar, wants_mail};
use crate::config::EnabledAccounts;
use crate::error::Result;
use crate::model::{
    Account, BackendKind, CategoryColor, Contact, DueBucket, FlagStatus, Folder, ItemReference,
    NewItemKind, NormalizedEvent, NormalizedMessage, NormalizedTask, OutgoingMail,
};
use crate::retry::{RetryDecision, RetryPolicy};

/// Deepest folder level walked when listing folders.
const MAX_FOLDER_DEPTH: usize = 8;

/// Connection state of the automation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Session open and answering.
    Connected,
    /// Tearing down a stale session and opening a new one.
    Reconnecting,
}

/// Local desktop-client backend.
pub struct LocalBackend {
    connector: Box<dyn Connector>,
    session: Option<Box<dyn Automation>>,
    state: ConnectionState,
    policy: RetryPolicy,
    stores: Vec<StoreInfo>,
    watermark: Option<NaiveDateTime>,
}

impl std::fmt::Debug for LocalBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalBackend")
            .field("state", &self.state)
            .field("stores", &self.stores)
            .field("watermark", &self.watermark)
            .finish_non_exhaustive()
    }
}

impl LocalBackend {
    /// Creates a disconnected backend that opens sessions via `connector`.
    #[must_use]
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            session: None,
            state: ConnectionState::Disconnected,
            policy: RetryPolicy::LOCAL,
            stores: Vec::new(),
            watermark: None,
        }
    }

    /// Backend for hosts without a scriptable client; never connects.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::new(Unsupported)
    }

    /// Backend for the installed desktop client on this host.
    #[cfg(windows)]
    #[must_use]
    pub fn desktop() -> Self {
        Self::new(ObjectModelConnector::new(ComActivator))
    }

    /// Backend for the installed desktop client on this host.
    #[cfg(not(windows))]
    #[must_use]
    pub fn desktop() -> Self {
        Self::unsupported()
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    fn open_session(&mut self) -> std::result::Result<(), AutomationError> {
        let mut session = self.connector.connect()?;
        session.probe()?;
        self.session = Some(session);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn drop_session(&mut self, state: ConnectionState) {
        self.session = None;
        self.state = state;
    }

    /// Probed session, opening one if needed.
    fn live_session(&mut self) -> std::result::Result<&mut dyn Automation, AutomationError> {
        if self.session.is_none() {
            self.open_session()?;
        }
        let session = self.session.as_mut().ok_or(AutomationError::Disconnected)?;
        session.probe()?;
        Ok(session.as_mut())
    }

    /// Runs one batch of automation calls under the retry policy.
    ///
    /// Returns `None` after logging when every attempt failed.
    fn run<T>(
        &mut self,
        what: &str,
        mut batch: impl FnMut(&mut dyn Automation) -> std::result::Result<T, AutomationError>,
    ) -> Option<T> {
        let mut attempt = 1;
        loop {
            let result = self.live_session().and_then(&mut batch);
            let err = match result {
                Ok(value) => return Some(value),
                Err(err) => err,
            };
            match self.policy.decide(attempt, &err) {
                RetryDecision::Retry(_) => {
                    debug!(operation = what, error = %err, "Reconnecting before retry");
                    self.drop_session(ConnectionState::Reconnecting);
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    match err {
                        AutomationError::Unavailable(_) => {
                            debug!(operation = what, error = %err, "Local backend unavailable");
                            self.drop_session(ConnectionState::Disconnected);
                        }
                        AutomationError::NotFound(_) => {
                            warn!(operation = what, error = %err, "Local item not found");
                        }
                        _ => {
                            warn!(operation = what, error = %err, "Local operation failed");
                            self.drop_session(ConnectionState::Disconnected);
                        }
                    }
                    return None;
                }
            }
        }
    }

    /// Known stores, loading them on first use.
    fn ensure_stores(&mut self) -> Vec<StoreInfo> {
        if self.stores.is_empty() {
            if let Some(stores) = self.run("list stores", |s| s.stores()) {
                self.stores = stores;
            }
        }
        self.stores.clone()
    }

    fn store_named(&mut self, name: &str) -> Option<StoreInfo> {
        self.ensure_stores()
            .into_iter()
            .find(|s| s.display_name.eq_ignore_ascii_case(name))
    }

    /// Folders to read for `store`: configured paths, falling back to the inbox.
    fn mail_folders(&mut self, store: &StoreInfo, paths: &[String]) -> Vec<FolderHandle> {
        let mut folders: Vec<FolderHandle> = Vec::new();
        let mut inbox_added = false;
        let wanted: Vec<Option<&String>> = if paths.is_empty() {
            vec![None]
        } else {
            paths.iter().map(Some).collect()
        };
        for path in wanted {
            let resolved = match path {
                Some(path) => {
                    let found = self.run("resolve folder", |s| resolve_folder(s, store, path));
                    if found.as_ref().is_some_and(Option::is_none) {
                        warn!(
                            account = %store.display_name,
                            folder = %path,
                            "Folder not found, using inbox"
                        );
                    }
                    found.flatten()
                }
                None => None,
            };
            let folder = match resolved {
                Some(folder) => Some(folder),
                None if inbox_added => None,
                None => {
                    inbox_added = true;
                    self.run("open inbox", |s| s.default_folder(&store.id, DefaultFolder::Inbox))
                }
            };
            if let Some(folder) = folder {
                if !folders.iter().any(|f| f.entry_id == folder.entry_id) {
                    folders.push(folder);
                }
            }
        }
        folders
    }

    fn act(&mut self, what: &str, item: &ItemReference, action: &ItemAction) -> bool {
        let scope = item.scope.as_deref();
        self.run(what, |s| s.apply(&item.id, scope, action)).is_some()
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Resolves a `/`- or `\`-separated folder path inside `store`.
///
/// A leading segment naming the store itself is ignored, so paths copied
/// from the client (`\\Store Name\Inbox\Sub`) resolve too.
fn resolve_folder(
    session: &mut dyn Automation,
    store: &StoreInfo,
    path: &str,
) -> std::result::Result<Option<FolderHandle>, AutomationError> {
    let mut segments: Vec<&str> = path
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if segments
        .first()
        .is_some_and(|s| s.eq_ignore_ascii_case(&store.display_name))
    {
        segments.remove(0);
    }
    if segments.is_empty() {
        return Ok(None);
    }
    let mut current = session.root_folder(&store.id)?;
    for segment in segments {
        let children = session.child_folders(&current)?;
        match children
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(segment))
        {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

fn walk_folders(
    session: &mut dyn Automation,
    parent: &FolderHandle,
    prefix: &str,
    depth: usize,
    out: &mut Vec<Folder>,
) -> std::result::Result<(), AutomationError> {
    if depth >= MAX_FOLDER_DEPTH {
        return Ok(());
    }
    for child in session.child_folders(parent)? {
        let path = if prefix.is_empty() {
            child.name.clone()
        } else {
            format!("{prefix}/{}", child.name)
        };
        out.push(Folder {
            name: child.name.clone(),
            path: path.clone(),
            unread: session.unread_count(&child).ok(),
        });
        walk_folders(session, &child, &path, depth + 1, out)?;
    }
    Ok(())
}

fn inbox_restriction(query: &InboxQuery, today: NaiveDate) -> Option<Restriction> {
    let mut parts = Vec::new();
    if query.unread_only {
        parts.push(Restriction::eq(Property::Unread, true));
    }
    if query.only_flagged {
        parts.push(Restriction::flagged());
        if let Some(due) = Restriction::due_in(Property::TaskDueDate, &query.due_filters, today) {
            parts.push(due);
        }
    }
    Restriction::all(parts)
}

fn newest_first(items: &mut Vec<NormalizedMessage>) {
    items.sort_by(|a, b| b.received.cmp(&a.received));
    let mut seen = std::collections::HashSet::new();
    items.retain(|m| seen.insert(m.reference.id.clone()));
}

#[async_trait]
impl MailBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn connect(&mut self) -> bool {
        if self.state == ConnectionState::Connected && self.session.is_some() {
            return true;
        }
        match self.open_session() {
            Ok(()) => {
                self.stores.clear();
                let stores = self.ensure_stores();
                info!(stores = stores.len(), "Connected to local mail client");
                true
            }
            Err(err) => {
                debug!(error = %err, "Local mail client not available");
                self.drop_session(ConnectionState::Disconnected);
                false
            }
        }
    }

    async fn reconnect(&mut self) -> bool {
        self.drop_session(ConnectionState::Reconnecting);
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn known_accounts(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.display_name.clone()).collect()
    }

    async fn get_accounts(&mut self) -> Result<Vec<Account>> {
        self.stores.clear();
        Ok(self
            .ensure_stores()
            .into_iter()
            .map(|s| Account::new(s.display_name, BackendKind::Local))
            .collect())
    }

    async fn get_inbox_items(&mut self, query: &InboxQuery) -> Result<InboxPage> {
        let filter = query.accounts.as_ref();
        let restriction = inbox_restriction(query, today());
        let table = TableQuery::new(MESSAGE_COLUMNS)
            .filtered(restriction)
            .sorted(Column::ReceivedTime, true)
            .limited(query.count);

        let mut page = InboxPage::default();
        for store in self.ensure_stores() {
            if !wants_mail(filter, &store.display_name) {
                continue;
            }
            let paths = folders_for(filter, &store.display_name).to_vec();
            for folder in self.mail_folders(&store, &paths) {
                let Some(rows) = self.run("read folder", |s| s.table(&folder, &table)) else {
                    continue;
                };
                page.items
                    .extend(rows.iter().filter_map(|row| mapping::message(row, &store)));
                page.unread += self
                    .run("unread count", |s| s.unread_count(&folder))
                    .unwrap_or(0);
            }
        }
        newest_first(&mut page.items);
        page.items.truncate(query.count);
        Ok(page)
    }

    async fn get_unread_count(&mut self, accounts: Option<&EnabledAccounts>) -> Result<u32> {
        let mut total = 0;
        for store in self.ensure_stores() {
            if !wants_mail(accounts, &store.display_name) {
                continue;
            }
            let paths = folders_for(accounts, &store.display_name).to_vec();
            for folder in self.mail_folders(&store, &paths) {
                total += self
                    .run("unread count", |s| s.unread_count(&folder))
                    .unwrap_or(0);
            }
        }
        Ok(total)
    }

    async fn mark_as_read(&mut self, item: &ItemReference) -> bool {
        self.act("mark read", item, &ItemAction::MarkRead)
    }

    async fn delete_email(&mut self, item: &ItemReference) -> bool {
        self.act("delete", item, &ItemAction::Delete)
    }

    async fn toggle_flag(&mut self, item: &ItemReference) -> bool {
        let scope = item.scope.as_deref();
        self.run("toggle flag", |s| {
            let current = s
                .item_value(&item.id, scope, Column::FlagStatus)?
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            let next = FlagStatus::from_local(current).toggled();
            s.apply(&item.id, scope, &ItemAction::SetFlag(next))
        })
        .is_some()
    }

    async fn unflag_email(&mut self, item: &ItemReference) -> bool {
        self.act("unflag", item, &ItemAction::SetFlag(FlagStatus::None))
    }

    async fn move_email(&mut self, item: &ItemReference, folder_path: &str) -> bool {
        let stores = self.ensure_stores();
        let store = item
            .scope
            .as_deref()
            .and_then(|scope| stores.iter().find(|s| s.id == scope))
            .or_else(|| stores.first())
            .cloned();
        let Some(store) = store else {
            return false;
        };
        let Some(folder) = self
            .run("resolve folder", |s| resolve_folder(s, &store, folder_path))
            .flatten()
        else {
            warn!(folder = %folder_path, "Move target folder not found");
            return false;
        };
        self.act("move", item, &ItemAction::MoveTo(folder))
    }

    async fn reply(&mut self, item: &ItemReference, reply_all: bool) -> bool {
        self.act("reply", item, &ItemAction::DisplayReply { reply_all })
    }

    async fn open_item(&mut self, item: &ItemReference) -> bool {
        self.act("open", item, &ItemAction::Display)
    }

    async fn get_calendar_items(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<NormalizedEvent>> {
        let overlap = Restriction::all(vec![
            Restriction::compare(Property::Start, Op::Lt, end),
            Restriction::compare(Property::End, Op::Gt, start),
        ]);
        let table = TableQuery::new(EVENT_COLUMNS)
            .filtered(overlap)
            .sorted(Column::Start, false)
            .with_recurrences();

        let mut events = Vec::new();
        for store in self.ensure_stores() {
            if !wants_calendar(accounts, &store.display_name) {
                continue;
            }
            let rows = self.run("read calendar", |s| {
                let folder = s.default_folder(&store.id, DefaultFolder::Calendar)?;
                s.table(&folder, &table)
            });
            if let Some(rows) = rows {
                events.extend(rows.iter().filter_map(|row| mapping::event(row, &store)));
            }
        }
        events.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(events)
    }

    async fn get_tasks(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Result<Vec<NormalizedTask>> {
        let today = today();
        let mut parts = vec![Restriction::eq(Property::Complete, false)];
        parts.extend(Restriction::due_in(Property::DueDate, due_filters, today));
        let table = TableQuery::new(TASK_COLUMNS).filtered(Restriction::all(parts));

        let mut tasks = Vec::new();
        for store in self.ensure_stores() {
            if !wants_mail(accounts, &store.display_name) {
                continue;
            }
            let rows = self.run("read tasks", |s| {
                let folder = s.default_folder(&store.id, DefaultFolder::Tasks)?;
                s.table(&folder, &table)
            });
            if let Some(rows) = rows {
                tasks.extend(
                    rows.iter()
                        .filter_map(|row| mapping::task(row, &store, today))
                        .filter(|t| !t.is_complete && t.bucket.selected_by(due_filters)),
                );
            }
        }
        Ok(tasks)
    }

    async fn mark_task_complete(&mut self, item: &ItemReference) -> bool {
        self.act("complete task", item, &ItemAction::MarkComplete)
    }

    async fn create_item(&mut self, kind: NewItemKind) -> bool {
        self.run("new item", |s| s.display_new(kind)).is_some()
    }

    async fn check_new_mail(
        &mut self,
        accounts: Option<&EnabledAccounts>,
    ) -> Result<Vec<NormalizedMessage>> {
        let now = Local::now().naive_local();
        let Some(since) = self.watermark.replace(now) else {
            debug!("Recorded initial new-mail watermark");
            return Ok(Vec::new());
        };
        let filter = Restriction::all(vec![
            Restriction::eq(Property::Unread, true),
            Restriction::compare(Property::ReceivedTime, Op::Gt, since),
        ]);
        let table = TableQuery::new(MESSAGE_COLUMNS)
            .filtered(filter)
            .sorted(Column::ReceivedTime, true);

        let mut fresh = Vec::new();
        for store in self.ensure_stores() {
            if !wants_mail(accounts, &store.display_name) {
                continue;
            }
            let rows = self.run("check new mail", |s| {
                let inbox = s.default_folder(&store.id, DefaultFolder::Inbox)?;
                s.table(&inbox, &table)
            });
            if let Some(rows) = rows {
                fresh.extend(
                    rows.iter()
                        .filter_map(|row| mapping::message(row, &store))
                        .filter(|m| m.received > since),
                );
            }
        }
        newest_first(&mut fresh);
        Ok(fresh)
    }

    async fn get_category_map(&mut self) -> Result<BTreeMap<String, CategoryColor>> {
        Ok(self
            .run("list categories", |s| s.categories())
            .unwrap_or_default()
            .into_iter()
            .map(|(name, color)| (name, CategoryColor::from_local(color)))
            .collect())
    }

    async fn search_contacts(&mut self, query: &str) -> Result<Vec<Contact>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .run("search contacts", |s| s.resolve_contacts(query))
            .unwrap_or_default())
    }

    async fn get_folder_list(&mut self, account: &str) -> Result<Vec<Folder>> {
        let Some(store) = self.store_named(account) else {
            return Ok(Vec::new());
        };
        Ok(self
            .run("list folders", |s| {
                let root = s.root_folder(&store.id)?;
                let mut folders = Vec::new();
                walk_folders(s, &root, "", 0, &mut folders)?;
                Ok(folders)
            })
            .unwrap_or_default())
    }

    async fn send_email_with_attachment(&mut self, mail: &OutgoingMail) -> bool {
        if mail.to.is_empty() {
            warn!("Refusing to send mail without recipients");
            return false;
        }
        if let Some(path) = &mail.attachment {
            if !path.is_file() {
                warn!(path = %path.display(), "Attachment not found");
                return false;
            }
        }
        self.run("send mail", |s| s.send(mail)).is_some()
    }
}
