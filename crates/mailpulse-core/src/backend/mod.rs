//! The uniform operation set implemented by both backends and the router.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime};

use crate::config::{AccountSettings, EnabledAccounts};
use crate::error::Result;
use crate::model::{
    Account, BackendKind, CategoryColor, Contact, DueBucket, Folder, ItemReference, NewItemKind,
    NormalizedEvent, NormalizedMessage, NormalizedTask, OutgoingMail, PulseStatus,
};

/// Parameters of an inbox read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxQuery {
    /// Accounts to read; `None` reads every known account's inbox.
    pub accounts: Option<EnabledAccounts>,
    /// Maximum messages returned.
    pub count: usize,
    /// Only messages flagged for follow-up.
    pub only_flagged: bool,
    /// With `only_flagged`, restrict to these follow-up due buckets.
    pub due_filters: Vec<DueBucket>,
    /// Only unread messages.
    pub unread_only: bool,
}

impl InboxQuery {
    /// Newest `count` messages of every account.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self {
            accounts: None,
            count,
            only_flagged: false,
            due_filters: Vec::new(),
            unread_only: false,
        }
    }

    /// Restricts to the given accounts.
    #[must_use]
    pub fn with_accounts(mut self, accounts: EnabledAccounts) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Only flagged messages due in `due_filters` (empty means any due date).
    #[must_use]
    pub fn flagged(mut self, due_filters: &[DueBucket]) -> Self {
        self.only_flagged = true;
        self.due_filters = due_filters.to_vec();
        self
    }

    /// Only unread messages.
    #[must_use]
    pub const fn unread(mut self) -> Self {
        self.unread_only = true;
        self
    }
}

/// Result of an inbox read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboxPage {
    /// Messages, newest first.
    pub items: Vec<NormalizedMessage>,
    /// Unread count across the folders read.
    pub unread: u32,
}

/// Settings for `account`: an exact key first, then a case-insensitive match.
#[must_use]
pub fn account_settings<'a>(
    accounts: &'a EnabledAccounts,
    account: &str,
) -> Option<&'a AccountSettings> {
    accounts.get(account).or_else(|| {
        accounts
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(account))
            .map(|(_, settings)| settings)
    })
}

/// True if `account`'s mail is selected by `filter`.
#[must_use]
pub fn wants_mail(filter: Option<&EnabledAccounts>, account: &str) -> bool {
    filter.is_none_or(|accounts| account_settings(accounts, account).is_some_and(|s| s.email))
}

/// True if `account`'s calendar is selected by `filter`.
#[must_use]
pub fn wants_calendar(filter: Option<&EnabledAccounts>, account: &str) -> bool {
    filter.is_none_or(|accounts| account_settings(accounts, account).is_some_and(|s| s.calendar))
}

/// Folder paths configured for `account`; empty means the inbox.
#[must_use]
pub fn folders_for<'a>(filter: Option<&'a EnabledAccounts>, account: &str) -> &'a [String] {
    filter
        .and_then(|accounts| account_settings(accounts, account))
        .map_or(&[], |s| s.folders.as_slice())
}

/// A mail, calendar and task backend.
///
/// Read operations return `Err` only for failures the caller can act on
/// (the remote service being unreachable, invalid input). Partial failures
/// inside one account or folder are logged and skipped. Mutating actions
/// report success as a plain `bool` and never raise.
#[async_trait]
pub trait MailBackend: Send {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Establishes the session; true when usable.
    async fn connect(&mut self) -> bool;

    /// Drops and re-establishes the session.
    async fn reconnect(&mut self) -> bool;

    /// Whether the last known state is connected.
    fn is_connected(&self) -> bool;

    /// Account names this backend has seen.
    fn known_accounts(&self) -> Vec<String>;

    /// Accounts available in this backend.
    async fn get_accounts(&mut self) -> Result<Vec<Account>>;

    /// Newest messages plus the unread count.
    async fn get_inbox_items(&mut self, query: &InboxQuery) -> Result<InboxPage>;

    /// Unread count across the selected accounts.
    async fn get_unread_count(&mut self, accounts: Option<&EnabledAccounts>) -> Result<u32>;

    /// Marks a message read.
    async fn mark_as_read(&mut self, item: &ItemReference) -> bool;

    /// Moves a message to deleted items.
    async fn delete_email(&mut self, item: &ItemReference) -> bool;

    /// Flags an unflagged message, clears a flagged one.
    ///
    /// A completed flag is reopened as flagged, so two toggles leave it
    /// cleared rather than completed.
    async fn toggle_flag(&mut self, item: &ItemReference) -> bool;

    /// Clears the follow-up flag.
    async fn unflag_email(&mut self, item: &ItemReference) -> bool;

    /// Moves a message to the folder at `folder_path`.
    async fn move_email(&mut self, item: &ItemReference, folder_path: &str) -> bool;

    /// Opens a reply to the message.
    async fn reply(&mut self, item: &ItemReference, reply_all: bool) -> bool;

    /// Shows the item to the user.
    async fn open_item(&mut self, item: &ItemReference) -> bool;

    /// Events overlapping `[start, end)`.
    async fn get_calendar_items(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<NormalizedEvent>>;

    /// Incomplete tasks in the given due buckets (empty means all).
    async fn get_tasks(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Result<Vec<NormalizedTask>>;

    /// Marks a task complete.
    async fn mark_task_complete(&mut self, item: &ItemReference) -> bool;

    /// Opens a compose window for a new item.
    async fn create_item(&mut self, kind: NewItemKind) -> bool;

    /// Unread messages received since the previous call.
    ///
    /// The first call only records the watermark and returns nothing.
    async fn check_new_mail(
        &mut self,
        accounts: Option<&EnabledAccounts>,
    ) -> Result<Vec<NormalizedMessage>>;

    /// Compact summary of today's calendar and the selected tasks.
    async fn get_pulse_status(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Result<PulseStatus> {
        let now = Local::now().naive_local();
        let start = now.date().and_time(NaiveTime::MIN);
        let end = now
            .date()
            .succ_opt()
            .map_or(now, |d| d.and_time(NaiveTime::MIN));
        let events = self.get_calendar_items(accounts, start, end).await?;
        let tasks = self.get_tasks(accounts, due_filters).await?;
        Ok(PulseStatus::summarize(&events, &tasks, now))
    }

    /// Category name to color.
    async fn get_category_map(&mut self) -> Result<BTreeMap<String, CategoryColor>>;

    /// Contacts matching `query`.
    async fn search_contacts(&mut self, query: &str) -> Result<Vec<Contact>>;

    /// Folder tree of `account`, flattened to paths.
    async fn get_folder_list(&mut self, account: &str) -> Result<Vec<Folder>>;

    /// Sends a message, with an optional file attachment.
    async fn send_email_with_attachment(&mut self, mail: &OutgoingMail) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_filter() {
        let mut accounts = EnabledAccounts::new();
        accounts.insert(
            "Work".into(),
            AccountSettings {
                calendar: false,
                folders: vec!["Inbox/Projects".into()],
                ..AccountSettings::default()
            },
        );

        assert!(wants_mail(None, "Anything"));
        assert!(wants_mail(Some(&accounts), "Work"));
        assert!(!wants_calendar(Some(&accounts), "Work"));
        assert!(!wants_mail(Some(&accounts), "Home"));
        assert_eq!(folders_for(Some(&accounts), "Work"), ["Inbox/Projects".to_string()]);
        assert!(folders_for(None, "Work").is_empty());
    }

    #[test]
    fn test_account_names_match_case_insensitively() {
        let mut accounts = EnabledAccounts::new();
        accounts.insert(
            "work".into(),
            AccountSettings {
                folders: vec!["Projects".into()],
                ..AccountSettings::default()
            },
        );
        accounts.insert("WORK".into(), AccountSettings::default());

        assert!(wants_mail(Some(&accounts), "Work"));
        assert!(wants_calendar(Some(&accounts), "Work"));
        assert_eq!(folders_for(Some(&accounts), "work"), ["Projects".to_string()]);
        assert!(folders_for(Some(&accounts), "WORK").is_empty());
    }
}
