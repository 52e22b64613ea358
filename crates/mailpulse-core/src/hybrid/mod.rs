//! Router composing the local and remote backends into one view.
//!
//! Reads are split by account ownership, run against each backend in turn,
//! then merged, sorted and truncated. Per-item actions follow the item's
//! origin tag, or fall back to guessing from the identifier's shape when a
//! caller only has a bare id.

use std::collections::{BTreeMap, HashSet};

use chrono::{Local, NaiveDateTime, NaiveTime};
use tracing::{debug, info, warn};

use crate::backend::{InboxPage, InboxQuery, MailBackend};
use crate::config::EnabledAccounts;
use crate::error::Result;
use crate::model::{
    Account, BackendKind, CategoryColor, Contact, DueBucket, Folder, Importance, ItemReference,
    NewItemKind, NormalizedEvent, NormalizedMessage, NormalizedTask, OutgoingMail, PulseStatus,
};

/// Bare ids longer than this that are all hex digits look like local entry ids.
pub const LOCAL_ID_MIN_LEN: usize = 40;

/// True if a bare identifier has the shape of a local entry id.
#[must_use]
pub fn looks_local(id: &str) -> bool {
    id.len() > LOCAL_ID_MIN_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Backends to try for `item`, in order.
#[must_use]
pub fn route_targets(item: &ItemReference) -> Vec<BackendKind> {
    match item.origin {
        Some(origin) => vec![origin],
        None if looks_local(&item.id) => vec![BackendKind::Local, BackendKind::Remote],
        None => vec![BackendKind::Remote],
    }
}

/// Which accounts one backend is asked about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No filter: every account the backend has.
    All,
    /// Only these accounts.
    Only(EnabledAccounts),
    /// Nothing to ask this backend.
    Skip,
}

impl Selection {
    /// The filter to pass, or `None` to skip the backend.
    #[must_use]
    pub const fn filter(&self) -> Option<Option<&EnabledAccounts>> {
        match self {
            Self::All => Some(None),
            Self::Only(accounts) => Some(Some(accounts)),
            Self::Skip => None,
        }
    }
}

/// An account filter partitioned between the backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSplit {
    /// Local backend's share.
    pub local: Selection,
    /// Remote backend's share.
    pub remote: Selection,
}

fn sides(split: &AccountSplit) -> [(BackendKind, &Selection); 2] {
    [
        (BackendKind::Local, &split.local),
        (BackendKind::Remote, &split.remote),
    ]
}

/// Drops later items whose `(origin, id)` was already seen.
fn dedupe<T>(items: &mut Vec<T>, reference: impl Fn(&T) -> &ItemReference) {
    let mut seen = HashSet::new();
    items.retain(|item| {
        let r = reference(item);
        seen.insert((r.origin, r.id.clone()))
    });
}

/// Merges per-backend inbox results: newest first, then truncated.
#[must_use]
pub fn merge_messages(parts: Vec<Vec<NormalizedMessage>>, count: usize) -> Vec<NormalizedMessage> {
    let mut items: Vec<_> = parts.into_iter().flatten().collect();
    items.sort_by(|a, b| b.received.cmp(&a.received));
    dedupe(&mut items, |m| &m.reference);
    items.truncate(count);
    items
}

/// Merges per-backend calendar results by start time.
#[must_use]
pub fn merge_events(parts: Vec<Vec<NormalizedEvent>>) -> Vec<NormalizedEvent> {
    let mut items: Vec<_> = parts.into_iter().flatten().collect();
    items.sort_by(|a, b| a.start.cmp(&b.start));
    dedupe(&mut items, |e| &e.reference);
    items
}

/// Sort tier: reminders first, then high importance, then the rest.
#[must_use]
pub fn task_tier(task: &NormalizedTask) -> u8 {
    if task.has_reminder {
        0
    } else if task.importance == Importance::High {
        1
    } else {
        2
    }
}

/// Merges per-backend task results by tier, then due date (undated last).
#[must_use]
pub fn merge_tasks(parts: Vec<Vec<NormalizedTask>>) -> Vec<NormalizedTask> {
    let mut items: Vec<_> = parts.into_iter().flatten().collect();
    items.sort_by_key(|t| (task_tier(t), t.due.is_none(), t.due));
    dedupe(&mut items, |t| &t.reference);
    items
}

/// A failed side contributes nothing.
fn settle<T: Default>(side: BackendKind, operation: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(backend = %side, operation, error = %err, "Backend contributed no data");
            T::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action<'a> {
    MarkRead,
    Delete,
    ToggleFlag,
    Unflag,
    Move(&'a str),
    Reply { all: bool },
    Open,
    CompleteTask,
}

impl Action<'_> {
    const fn name(self) -> &'static str {
        match self {
            Self::MarkRead => "mark read",
            Self::Delete => "delete",
            Self::ToggleFlag => "toggle flag",
            Self::Unflag => "unflag",
            Self::Move(_) => "move",
            Self::Reply { .. } => "reply",
            Self::Open => "open",
            Self::CompleteTask => "complete task",
        }
    }

    async fn perform(self, backend: &mut dyn MailBackend, item: &ItemReference) -> bool {
        match self {
            Self::MarkRead => backend.mark_as_read(item).await,
            Self::Delete => backend.delete_email(item).await,
            Self::ToggleFlag => backend.toggle_flag(item).await,
            Self::Unflag => backend.unflag_email(item).await,
            Self::Move(folder) => backend.move_email(item, folder).await,
            Self::Reply { all } => backend.reply(item, all).await,
            Self::Open => backend.open_item(item).await,
            Self::CompleteTask => backend.mark_task_complete(item).await,
        }
    }
}

/// Local and remote backends behind one interface.
pub struct HybridClient {
    local: Box<dyn MailBackend>,
    remote: Box<dyn MailBackend>,
}

impl std::fmt::Debug for HybridClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridClient")
            .field("local_connected", &self.local.is_connected())
            .field("remote_connected", &self.remote.is_connected())
            .finish()
    }
}

impl HybridClient {
    /// Composes the two backends.
    #[must_use]
    pub fn new(local: Box<dyn MailBackend>, remote: Box<dyn MailBackend>) -> Self {
        Self { local, remote }
    }

    fn side(&mut self, kind: BackendKind) -> &mut dyn MailBackend {
        match kind {
            BackendKind::Local => self.local.as_mut(),
            BackendKind::Remote => self.remote.as_mut(),
        }
    }

    /// Partitions `filter` by which backend knows each account.
    ///
    /// Names the local backend does not know go to the remote backend.
    #[must_use]
    pub fn split_accounts(&self, filter: Option<&EnabledAccounts>) -> AccountSplit {
        let Some(accounts) = filter else {
            return AccountSplit {
                local: Selection::All,
                remote: Selection::All,
            };
        };
        let known = self.local.known_accounts();
        let mut local = EnabledAccounts::new();
        let mut remote = EnabledAccounts::new();
        for (name, settings) in accounts {
            // Local entries are keyed by the store's own spelling of the name.
            match known.iter().find(|k| k.eq_ignore_ascii_case(name)) {
                Some(store) => local.insert(store.clone(), settings.clone()),
                None => remote.insert(name.clone(), settings.clone()),
            };
        }
        let select = |subset: EnabledAccounts| {
            if subset.is_empty() {
                Selection::Skip
            } else {
                Selection::Only(subset)
            }
        };
        AccountSplit {
            local: select(local),
            remote: select(remote),
        }
    }

    fn local_needs_stores(&self) -> bool {
        !self.local.is_connected() && self.local.known_accounts().is_empty()
    }

    /// Account split for a filtered read.
    ///
    /// A local backend that is down and has never listed its stores gets a
    /// connect attempt first.
    async fn split_for(&mut self, filter: Option<&EnabledAccounts>) -> AccountSplit {
        if filter.is_some() && self.local_needs_stores() {
            let connected = self.local.connect().await;
            debug!(connected, "Retried local backend before splitting accounts");
        }
        self.split_accounts(filter)
    }

    /// Connects both backends; true if either is usable.
    pub async fn connect(&mut self) -> bool {
        let local = self.local.connect().await;
        let remote = self.remote.connect().await;
        info!(local, remote, "Backends connected");
        local || remote
    }

    /// Reconnects both backends; true if either is usable.
    pub async fn reconnect(&mut self) -> bool {
        let local = self.local.reconnect().await;
        let remote = self.remote.reconnect().await;
        info!(local, remote, "Backends reconnected");
        local || remote
    }

    /// Reconnects only the backends that are down; true if either is usable.
    pub async fn reconnect_missing(&mut self) -> bool {
        for kind in [BackendKind::Local, BackendKind::Remote] {
            let side = self.side(kind);
            if !side.is_connected() {
                let connected = side.reconnect().await;
                debug!(backend = %kind, connected, "Reconnect attempted");
            }
        }
        self.is_connected()
    }

    /// True if either backend is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.local.is_connected() || self.remote.is_connected()
    }

    /// Accounts of both backends.
    pub async fn get_accounts(&mut self) -> Vec<Account> {
        let mut accounts = settle(BackendKind::Local, "accounts", self.local.get_accounts().await);
        accounts.extend(settle(
            BackendKind::Remote,
            "accounts",
            self.remote.get_accounts().await,
        ));
        accounts
    }

    /// Newest `query.count` messages across both backends.
    ///
    /// The unread count is the sum of what each backend reported.
    pub async fn get_inbox_items(&mut self, query: &InboxQuery) -> InboxPage {
        let split = self.split_for(query.accounts.as_ref()).await;
        let mut parts = Vec::new();
        let mut unread = 0;
        for (kind, selection) in sides(&split) {
            let Some(filter) = selection.filter() else {
                continue;
            };
            let side_query = InboxQuery {
                accounts: filter.cloned(),
                ..query.clone()
            };
            let page = settle(kind, "inbox", self.side(kind).get_inbox_items(&side_query).await);
            unread += page.unread;
            parts.push(page.items);
        }
        InboxPage {
            items: merge_messages(parts, query.count),
            unread,
        }
    }

    /// Unread count summed over both backends.
    pub async fn get_unread_count(&mut self, accounts: Option<&EnabledAccounts>) -> u32 {
        let split = self.split_for(accounts).await;
        let mut total = 0;
        for (kind, selection) in sides(&split) {
            if let Some(filter) = selection.filter() {
                total += settle(
                    kind,
                    "unread count",
                    self.side(kind).get_unread_count(filter).await,
                );
            }
        }
        total
    }

    async fn route_item(&mut self, item: &ItemReference, action: Action<'_>) -> bool {
        for kind in route_targets(item) {
            if action.perform(self.side(kind), item).await {
                return true;
            }
            debug!(backend = %kind, id = %item.id, action = action.name(), "Action not applied");
        }
        false
    }

    /// Marks a message read.
    pub async fn mark_as_read(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::MarkRead).await
    }

    /// Deletes a message.
    pub async fn delete_email(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::Delete).await
    }

    /// Toggles a message's follow-up flag.
    pub async fn toggle_flag(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::ToggleFlag).await
    }

    /// Clears a message's follow-up flag.
    pub async fn unflag_email(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::Unflag).await
    }

    /// Moves a message to `folder_path` in its own backend.
    pub async fn move_email(&mut self, item: &ItemReference, folder_path: &str) -> bool {
        self.route_item(item, Action::Move(folder_path)).await
    }

    /// Opens a reply to a message.
    pub async fn reply(&mut self, item: &ItemReference, reply_all: bool) -> bool {
        self.route_item(item, Action::Reply { all: reply_all }).await
    }

    /// Shows an item to the user.
    pub async fn open_item(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::Open).await
    }

    /// Marks a task complete.
    pub async fn mark_task_complete(&mut self, item: &ItemReference) -> bool {
        self.route_item(item, Action::CompleteTask).await
    }

    /// Events overlapping `[start, end)` from both backends, by start time.
    pub async fn get_calendar_items(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Vec<NormalizedEvent> {
        let split = self.split_for(accounts).await;
        let mut parts = Vec::new();
        for (kind, selection) in sides(&split) {
            if let Some(filter) = selection.filter() {
                parts.push(settle(
                    kind,
                    "calendar",
                    self.side(kind).get_calendar_items(filter, start, end).await,
                ));
            }
        }
        merge_events(parts)
    }

    /// Incomplete tasks from both backends in the given due buckets.
    pub async fn get_tasks(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Vec<NormalizedTask> {
        let split = self.split_for(accounts).await;
        let mut parts = Vec::new();
        for (kind, selection) in sides(&split) {
            if let Some(filter) = selection.filter() {
                parts.push(settle(
                    kind,
                    "tasks",
                    self.side(kind).get_tasks(filter, due_filters).await,
                ));
            }
        }
        merge_tasks(parts)
    }

    /// Opens a compose window, preferring the desktop client.
    pub async fn create_item(&mut self, kind: NewItemKind) -> bool {
        if self.local.is_connected() && self.local.create_item(kind).await {
            return true;
        }
        self.remote.create_item(kind).await
    }

    /// Opens a new mail.
    pub async fn create_email(&mut self) -> bool {
        self.create_item(NewItemKind::Email).await
    }

    /// Opens a new meeting request.
    pub async fn create_meeting(&mut self) -> bool {
        self.create_item(NewItemKind::Meeting).await
    }

    /// Opens a new task.
    pub async fn create_task(&mut self) -> bool {
        self.create_item(NewItemKind::Task).await
    }

    /// Opens a new contact.
    pub async fn create_contact(&mut self) -> bool {
        self.create_item(NewItemKind::Contact).await
    }

    /// Unread mail that arrived since the previous call, newest first.
    pub async fn check_new_mail(
        &mut self,
        accounts: Option<&EnabledAccounts>,
    ) -> Vec<NormalizedMessage> {
        let split = self.split_for(accounts).await;
        let mut parts = Vec::new();
        for (kind, selection) in sides(&split) {
            if let Some(filter) = selection.filter() {
                parts.push(settle(kind, "new mail", self.side(kind).check_new_mail(filter).await));
            }
        }
        merge_messages(parts, usize::MAX)
    }

    /// Summary of today's merged calendar and the selected tasks.
    pub async fn get_pulse_status(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> PulseStatus {
        let now = Local::now().naive_local();
        let start = now.date().and_time(NaiveTime::MIN);
        let end = now
            .date()
            .succ_opt()
            .map_or(now, |d| d.and_time(NaiveTime::MIN));
        let events = self.get_calendar_items(accounts, start, end).await;
        let tasks = self.get_tasks(accounts, due_filters).await;
        PulseStatus::summarize(&events, &tasks, now)
    }

    /// Category colors; remote entries win on a name clash.
    pub async fn get_category_map(&mut self) -> BTreeMap<String, CategoryColor> {
        let mut map = settle(BackendKind::Local, "categories", self.local.get_category_map().await);
        map.extend(settle(
            BackendKind::Remote,
            "categories",
            self.remote.get_category_map().await,
        ));
        map
    }

    /// Contacts from the local address book, or the remote service if none.
    pub async fn search_contacts(&mut self, query: &str) -> Vec<Contact> {
        let local = settle(BackendKind::Local, "contacts", self.local.search_contacts(query).await);
        if !local.is_empty() {
            return local;
        }
        settle(BackendKind::Remote, "contacts", self.remote.search_contacts(query).await)
    }

    /// Folder tree of `account` from whichever backend owns it.
    pub async fn get_folder_list(&mut self, account: &str) -> Vec<Folder> {
        if self.local_needs_stores() {
            self.local.connect().await;
        }
        let local_owned = self
            .local
            .known_accounts()
            .iter()
            .any(|k| k.eq_ignore_ascii_case(account));
        let kind = if local_owned {
            BackendKind::Local
        } else {
            BackendKind::Remote
        };
        settle(kind, "folders", self.side(kind).get_folder_list(account).await)
    }

    /// Sends through the desktop client, or the remote service if that fails.
    pub async fn send_email_with_attachment(&mut self, mail: &OutgoingMail) -> bool {
        if self.local.is_connected() && self.local.send_email_with_attachment(mail).await {
            return true;
        }
        self.remote.send_email_with_attachment(mail).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_shapes() {
        let hex44 = "a1b2c3d4e5".repeat(4) + "f0f0";
        assert_eq!(hex44.len(), 44);
        assert!(looks_local(&hex44));
        assert!(!looks_local(&"a".repeat(LOCAL_ID_MIN_LEN)));
        assert!(!looks_local("AAMkADk0ZjA1LTQ3NzQtNDZjZi1hMzVmLWM4ZGQ0MmU4ZDFkNQBGAAAAAAC"));
        assert!(!looks_local(&format!("{hex44}-x")));
    }

    #[test]
    fn test_tagged_references_skip_guessing() {
        let hex44 = "0".repeat(44);
        assert_eq!(
            route_targets(&ItemReference::remote(hex44.clone(), None)),
            vec![BackendKind::Remote]
        );
        assert_eq!(
            route_targets(&ItemReference::untagged(hex44, None)),
            vec![BackendKind::Local, BackendKind::Remote]
        );
        assert_eq!(
            route_targets(&ItemReference::untagged("short", None)),
            vec![BackendKind::Remote]
        );
    }

    #[test]
    fn test_selection_filter() {
        assert_eq!(Selection::All.filter(), Some(None));
        assert_eq!(Selection::Skip.filter(), None);
    }
}
