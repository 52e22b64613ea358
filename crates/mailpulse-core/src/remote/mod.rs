//! Backend for the cloud mail, calendar and task REST service.
//!
//! Every request acquires a token silently. Without one the backend reports
//! empty data. A service that cannot be reached surfaces as
//! [`Error::Connectivity`] from read operations so the router can tell
//! "offline" from "nothing there"; API errors are logged and read as absent.

mod http;
mod mapping;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Local, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use mailpulse_oauth::AuthSession;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

pub use http::{GraphClient, Reply};
pub use mapping::{
    Category, DateTimeTimeZone, EVENT_FIELDS, GraphEvent, GraphMessage, MESSAGE_FIELDS, MailFolder,
    Me, Page, Person, TodoList, TodoTask,
};

use crate::backend::{InboxPage, InboxQuery, MailBackend, account_settings};
use crate::config::{AccountSettings, EnabledAccounts, RemoteSettings};
use crate::error::{Error, Result};
use crate::model::{
    Account, BackendKind, CategoryColor, Contact, DueBucket, FlagStatus, Folder, ItemReference,
    NewItemKind, NormalizedEvent, NormalizedMessage, NormalizedTask, OutgoingMail,
};

/// Pages followed before a collection read stops.
const MAX_PAGES: usize = 10;

/// Largest attachment that can be sent inline with a message.
const MAX_INLINE_ATTACHMENT: u64 = 3 * 1024 * 1024;

/// Upper bound on the over-fetch used for client-side flag filtering.
const FLAGGED_FETCH_CAP: usize = 100;

/// Deepest folder level walked when listing folders.
const MAX_FOLDER_DEPTH: usize = 8;

/// Web deep links opening a compose window for each item kind.
const fn compose_link(kind: NewItemKind) -> &'static str {
    match kind {
        NewItemKind::Email => "https://outlook.office.com/mail/deeplink/compose",
        NewItemKind::Meeting => "https://outlook.office.com/calendar/deeplink/compose",
        NewItemKind::Task => "https://to-do.office.com/tasks/inbox",
        NewItemKind::Contact => "https://outlook.office.com/people/",
    }
}

fn to_utc_param(value: NaiveDateTime) -> String {
    let utc = Local
        .from_local_datetime(&value)
        .earliest()
        .map_or_else(|| value.and_utc(), |local| local.with_timezone(&Utc));
    utc.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn today() -> chrono::NaiveDate {
    Local::now().date_naive()
}

/// Remote REST backend.
#[derive(Debug)]
pub struct RemoteBackend {
    client: GraphClient,
    connected: bool,
    account: Option<String>,
    watermark: Option<DateTime<Utc>>,
    folder_ids: HashMap<String, String>,
}

impl RemoteBackend {
    /// Creates a backend sharing `session` for tokens.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the HTTP client cannot be built.
    pub fn new(settings: &RemoteSettings, session: Arc<AuthSession>) -> Result<Self> {
        Ok(Self::with_client(GraphClient::new(settings, session)?))
    }

    /// Creates a backend around an existing client.
    #[must_use]
    pub fn with_client(client: GraphClient) -> Self {
        Self {
            client,
            connected: false,
            account: None,
            watermark: None,
            folder_ids: HashMap::new(),
        }
    }

    /// Signed-in account name, once known.
    #[must_use]
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Runs interactive sign-in, then connects.
    ///
    /// # Errors
    ///
    /// Returns `Error::Auth` if sign-in fails.
    pub async fn login(&mut self) -> Result<bool> {
        self.client.session().login_interactive().await?;
        Ok(self.reconnect().await)
    }

    fn account_name(&self) -> String {
        self.account.clone().unwrap_or_else(|| "me".to_string())
    }

    /// Settings that apply to the signed-in account under `filter`.
    ///
    /// The router only hands this backend names it does not recognize as
    /// local, so an entry that does not match the account exactly still
    /// applies.
    fn selection(&self, filter: Option<&EnabledAccounts>) -> Option<AccountSettings> {
        let Some(accounts) = filter else {
            return Some(AccountSettings::default());
        };
        self.account
            .as_ref()
            .and_then(|name| account_settings(accounts, name))
            .or_else(|| accounts.values().next())
            .cloned()
    }

    /// Sends a request; API errors are logged and read as absent.
    async fn request(
        &mut self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Reply>> {
        match self.client.call(method, path, query, body).await {
            Ok(Reply::NotAuthenticated) => Ok(None),
            Ok(reply) => {
                self.connected = true;
                Ok(Some(reply))
            }
            Err(err) if err.is_connectivity() => {
                if self.connected {
                    warn!(error = %err, "Remote service unreachable");
                }
                self.connected = false;
                Err(err)
            }
            Err(err) => {
                warn!(path, error = %err, "Remote request failed");
                Ok(None)
            }
        }
    }

    async fn fetch<T: DeserializeOwned + Send>(
        &mut self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        match self.request(Method::GET, path, query, None).await? {
            Some(Reply::Json(value)) => match serde_json::from_value(value) {
                Ok(parsed) => Ok(Some(parsed)),
                Err(e) => {
                    warn!(path, error = %e, "Unexpected response shape");
                    Ok(None)
                }
            },
            _ => Ok(None),
        }
    }

    /// Reads every page of a collection, up to [`MAX_PAGES`].
    async fn fetch_all<T: DeserializeOwned + Send>(
        &mut self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let Some(mut page) = self.fetch::<Page<T>>(path, query).await? else {
            return Ok(items);
        };
        for _ in 1..MAX_PAGES {
            items.append(&mut page.value);
            let Some(next) = page.next_link.take() else {
                return Ok(items);
            };
            match self.fetch::<Page<T>>(&next, &[]).await? {
                Some(next_page) => page = next_page,
                None => return Ok(items),
            }
        }
        items.append(&mut page.value);
        Ok(items)
    }

    /// A mutating call; never raises.
    async fn mutate(
        &mut self,
        what: &str,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> bool {
        match self.request(method, path, &[], body).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(err) => {
                debug!(operation = what, error = %err, "Remote action skipped");
                false
            }
        }
    }

    /// Resolves a folder path to an id; `None` if any segment is missing.
    async fn folder_id(&mut self, path: &str) -> Result<Option<String>> {
        let segments: Vec<&str> = path
            .split(['/', '\\'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty()
            || (segments.len() == 1 && segments[0].eq_ignore_ascii_case("inbox"))
        {
            return Ok(Some("inbox".to_string()));
        }
        let key = segments.join("/").to_lowercase();
        if let Some(id) = self.folder_ids.get(&key) {
            return Ok(Some(id.clone()));
        }

        let mut parent: Option<String> = None;
        for segment in &segments {
            let listing = match &parent {
                None => "/me/mailFolders".to_string(),
                Some(id) => format!("/me/mailFolders/{id}/childFolders"),
            };
            let children: Vec<MailFolder> =
                self.fetch_all(&listing, &[("$top", "100".into())]).await?;
            match children
                .into_iter()
                .find(|f| f.display_name.eq_ignore_ascii_case(segment))
            {
                Some(folder) => parent = Some(folder.id),
                None => return Ok(None),
            }
        }
        if let Some(id) = &parent {
            self.folder_ids.insert(key, id.clone());
        }
        Ok(parent)
    }

    /// Folder ids to read: configured paths, falling back to the inbox.
    async fn mail_folders(&mut self, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(vec!["inbox".to_string()]);
        }
        let mut ids = Vec::new();
        for path in paths {
            let id = match self.folder_id(path).await? {
                Some(id) => id,
                None => {
                    warn!(folder = %path, "Folder not found, using inbox");
                    "inbox".to_string()
                }
            };
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn unread_in(&mut self, folder: &str) -> Result<u32> {
        let path = format!("/me/mailFolders/{folder}");
        let found: Option<MailFolder> = self
            .fetch(&path, &[("$select", "unreadItemCount".into())])
            .await?;
        Ok(found.and_then(|f| f.unread_item_count).unwrap_or(0))
    }

    async fn message(&mut self, id: &str, select: &str) -> Option<GraphMessage> {
        let path = format!("/me/messages/{id}");
        self.fetch(&path, &[("$select", select.to_string())])
            .await
            .ok()
            .flatten()
    }

    async fn walk_folders(&mut self, out: &mut Vec<Folder>) -> Result<()> {
        let mut pending: Vec<(String, Option<String>, usize)> = vec![(String::new(), None, 0)];
        while let Some((prefix, parent, depth)) = pending.pop() {
            let listing = match &parent {
                None => "/me/mailFolders".to_string(),
                Some(id) => format!("/me/mailFolders/{id}/childFolders"),
            };
            let children: Vec<MailFolder> =
                self.fetch_all(&listing, &[("$top", "100".into())]).await?;
            for child in children {
                let path = if prefix.is_empty() {
                    child.display_name.clone()
                } else {
                    format!("{prefix}/{}", child.display_name)
                };
                out.push(child.to_folder(path.clone()));
                if child.child_folder_count > 0 && depth + 1 < MAX_FOLDER_DEPTH {
                    pending.push((path, Some(child.id), depth + 1));
                }
            }
        }
        Ok(())
    }
}

fn open_link(link: &str) -> bool {
    match opener::open(link) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to open link");
            false
        }
    }
}

#[async_trait]
impl MailBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn connect(&mut self) -> bool {
        match self.fetch::<Me>("/me", &[]).await {
            Ok(Some(me)) => {
                self.account = me.account_name();
                if let Some(name) = &self.account {
                    self.client.session().set_account(name).await;
                }
                self.connected = true;
                info!(account = %self.account_name(), "Connected to remote mail service");
                true
            }
            Ok(None) => {
                debug!("Remote backend not signed in");
                self.connected = false;
                false
            }
            Err(err) => {
                warn!(error = %err, "Remote connect failed");
                self.connected = false;
                false
            }
        }
    }

    async fn reconnect(&mut self) -> bool {
        self.connected = false;
        self.folder_ids.clear();
        self.connect().await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn known_accounts(&self) -> Vec<String> {
        self.account.iter().cloned().collect()
    }

    async fn get_accounts(&mut self) -> Result<Vec<Account>> {
        if self.account.is_none() && !self.connect().await {
            return Ok(Vec::new());
        }
        Ok(self
            .account
            .iter()
            .map(|name| Account::new(name.clone(), BackendKind::Remote))
            .collect())
    }

    async fn get_inbox_items(&mut self, query: &InboxQuery) -> Result<InboxPage> {
        let Some(selection) = self.selection(query.accounts.as_ref()).filter(|s| s.email) else {
            return Ok(InboxPage::default());
        };
        let top = if query.only_flagged {
            (query.count * 4).min(FLAGGED_FETCH_CAP).max(query.count)
        } else {
            query.count
        };
        let mut params = vec![
            ("$top", top.to_string()),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$select", MESSAGE_FIELDS.to_string()),
        ];
        if query.unread_only {
            params.push(("$filter", "isRead eq false".to_string()));
        }

        let account = self.account_name();
        let today = today();
        let mut page = InboxPage::default();
        for folder in self.mail_folders(&selection.folders).await? {
            let path = format!("/me/mailFolders/{folder}/messages");
            let Some(messages) = self.fetch::<Page<GraphMessage>>(&path, &params).await? else {
                continue;
            };
            page.items.extend(
                messages
                    .value
                    .into_iter()
                    .map(|m| m.normalize(&account))
                    .filter(|m| {
                        !query.only_flagged
                            || (m.flag_status == FlagStatus::Marked
                                && DueBucket::classify(m.flag_due, today)
                                    .selected_by(&query.due_filters))
                    }),
            );
            page.unread += self.unread_in(&folder).await?;
        }
        page.items.sort_by(|a, b| b.received.cmp(&a.received));
        let mut seen = HashSet::new();
        page.items.retain(|m| seen.insert(m.reference.id.clone()));
        page.items.truncate(query.count);
        Ok(page)
    }

    async fn get_unread_count(&mut self, accounts: Option<&EnabledAccounts>) -> Result<u32> {
        let Some(selection) = self.selection(accounts).filter(|s| s.email) else {
            return Ok(0);
        };
        let mut total = 0;
        for folder in self.mail_folders(&selection.folders).await? {
            total += self.unread_in(&folder).await?;
        }
        Ok(total)
    }

    async fn mark_as_read(&mut self, item: &ItemReference) -> bool {
        let path = format!("/me/messages/{}", item.id);
        self.mutate("mark read", Method::PATCH, &path, Some(&json!({"isRead": true})))
            .await
    }

    async fn delete_email(&mut self, item: &ItemReference) -> bool {
        let path = format!("/me/messages/{}", item.id);
        self.mutate("delete", Method::DELETE, &path, None).await
    }

    async fn toggle_flag(&mut self, item: &ItemReference) -> bool {
        let Some(message) = self.message(&item.id, "flag").await else {
            return false;
        };
        let next = message.flag_status().toggled();
        let path = format!("/me/messages/{}", item.id);
        let body = json!({"flag": {"flagStatus": next.to_remote()}});
        self.mutate("toggle flag", Method::PATCH, &path, Some(&body)).await
    }

    async fn unflag_email(&mut self, item: &ItemReference) -> bool {
        let path = format!("/me/messages/{}", item.id);
        let body = json!({"flag": {"flagStatus": FlagStatus::None.to_remote()}});
        self.mutate("unflag", Method::PATCH, &path, Some(&body)).await
    }

    async fn move_email(&mut self, item: &ItemReference, folder_path: &str) -> bool {
        let Ok(Some(destination)) = self.folder_id(folder_path).await else {
            warn!(folder = %folder_path, "Move target folder not found");
            return false;
        };
        let path = format!("/me/messages/{}/move", item.id);
        self.mutate("move", Method::POST, &path, Some(&json!({"destinationId": destination})))
            .await
    }

    async fn reply(&mut self, item: &ItemReference, reply_all: bool) -> bool {
        let action = if reply_all { "createReplyAll" } else { "createReply" };
        let path = format!("/me/messages/{}/{action}", item.id);
        let draft = match self.request(Method::POST, &path, &[], Some(&json!({}))).await {
            Ok(Some(Reply::Json(draft))) => draft,
            Ok(_) => return false,
            Err(err) => {
                debug!(error = %err, "Remote reply skipped");
                return false;
            }
        };
        match draft["webLink"].as_str() {
            Some(link) => open_link(link),
            None => false,
        }
    }

    async fn open_item(&mut self, item: &ItemReference) -> bool {
        if let Some(list) = &item.scope {
            let link = format!("https://to-do.office.com/tasks/id/{}/details?list={list}", item.id);
            return open_link(&link);
        }
        if let Some(link) = self
            .message(&item.id, "webLink")
            .await
            .and_then(|m| m.web_link().map(String::from))
        {
            return open_link(&link);
        }
        let path = format!("/me/events/{}", item.id);
        let event: Option<GraphEvent> = self
            .fetch(&path, &[("$select", "id,webLink".into())])
            .await
            .ok()
            .flatten();
        event
            .and_then(|e| e.web_link().map(String::from))
            .is_some_and(|link| open_link(&link))
    }

    async fn get_calendar_items(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<NormalizedEvent>> {
        if self.selection(accounts).filter(|s| s.calendar).is_none() {
            return Ok(Vec::new());
        }
        let params = [
            ("startDateTime", to_utc_param(start)),
            ("endDateTime", to_utc_param(end)),
            ("$orderby", "start/dateTime".to_string()),
            ("$select", EVENT_FIELDS.to_string()),
            ("$top", "100".to_string()),
        ];
        let account = self.account_name();
        let events: Vec<GraphEvent> = self.fetch_all("/me/calendarView", &params).await?;
        let mut events: Vec<NormalizedEvent> = events
            .into_iter()
            .filter_map(|e| e.normalize(&account))
            .collect();
        events.sort_by(|a, b| a.start.cmp(&b.start));
        Ok(events)
    }

    async fn get_tasks(
        &mut self,
        accounts: Option<&EnabledAccounts>,
        due_filters: &[DueBucket],
    ) -> Result<Vec<NormalizedTask>> {
        if self.selection(accounts).filter(|s| s.email).is_none() {
            return Ok(Vec::new());
        }
        let account = self.account_name();
        let today = today();
        let lists: Vec<TodoList> = self.fetch_all("/me/todo/lists", &[]).await?;
        let mut tasks = Vec::new();
        for list in lists {
            let path = format!("/me/todo/lists/{}/tasks", list.id);
            let params = [
                ("$filter", "status ne 'completed'".to_string()),
                ("$top", "100".to_string()),
            ];
            let items: Vec<TodoTask> = self.fetch_all(&path, &params).await?;
            tasks.extend(
                items
                    .into_iter()
                    .map(|t| t.normalize(&account, &list.id, today))
                    .filter(|t| !t.is_complete && t.bucket.selected_by(due_filters)),
            );
        }
        Ok(tasks)
    }

    async fn mark_task_complete(&mut self, item: &ItemReference) -> bool {
        let Some(list) = &item.scope else {
            warn!(id = %item.id, "Task reference has no list scope");
            return false;
        };
        let path = format!("/me/todo/lists/{list}/tasks/{}", item.id);
        self.mutate("complete task", Method::PATCH, &path, Some(&json!({"status": "completed"})))
            .await
    }

    async fn create_item(&mut self, kind: NewItemKind) -> bool {
        open_link(compose_link(kind))
    }

    async fn check_new_mail(
        &mut self,
        accounts: Option<&EnabledAccounts>,
    ) -> Result<Vec<NormalizedMessage>> {
        let now = Utc::now();
        let Some(since) = self.watermark else {
            self.watermark = Some(now);
            debug!("Recorded initial new-mail watermark");
            return Ok(Vec::new());
        };
        if self.selection(accounts).filter(|s| s.email).is_none() {
            return Ok(Vec::new());
        }
        let params = [
            (
                "$filter",
                format!(
                    "receivedDateTime gt {} and isRead eq false",
                    since.to_rfc3339_opts(SecondsFormat::Secs, true)
                ),
            ),
            ("$orderby", "receivedDateTime desc".to_string()),
            ("$select", MESSAGE_FIELDS.to_string()),
            ("$top", "50".to_string()),
        ];
        // Keep the old watermark when offline so nothing is skipped.
        let found = self
            .fetch::<Page<GraphMessage>>("/me/mailFolders/inbox/messages", &params)
            .await?;
        self.watermark = Some(now);
        let account = self.account_name();
        Ok(found
            .map(|page| page.value.into_iter().map(|m| m.normalize(&account)).collect())
            .unwrap_or_default())
    }

    async fn get_category_map(&mut self) -> Result<BTreeMap<String, CategoryColor>> {
        let categories: Vec<Category> = self.fetch_all("/me/outlook/masterCategories", &[]).await?;
        Ok(categories
            .into_iter()
            .map(|c| (c.display_name, CategoryColor::from_remote(&c.color)))
            .collect())
    }

    async fn search_contacts(&mut self, query: &str) -> Result<Vec<Contact>> {
        let query = query.replace('"', "");
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let params = [
            ("$search", format!("\"{}\"", query.trim())),
            ("$top", "10".to_string()),
        ];
        let people: Option<Page<Person>> = self.fetch("/me/people", &params).await?;
        Ok(people
            .map(|p| p.value.into_iter().filter_map(Person::into_contact).collect())
            .unwrap_or_default())
    }

    async fn get_folder_list(&mut self, account: &str) -> Result<Vec<Folder>> {
        if self
            .account
            .as_deref()
            .is_some_and(|name| !name.eq_ignore_ascii_case(account))
        {
            return Ok(Vec::new());
        }
        let mut folders = Vec::new();
        self.walk_folders(&mut folders).await?;
        Ok(folders)
    }

    async fn send_email_with_attachment(&mut self, mail: &OutgoingMail) -> bool {
        if mail.to.is_empty() {
            warn!("Refusing to send mail without recipients");
            return false;
        }
        let recipients: Vec<Value> = mail
            .to
            .iter()
            .map(|address| json!({"emailAddress": {"address": address}}))
            .collect();
        let mut message = json!({
            "subject": mail.subject,
            "body": {"contentType": "Text", "content": mail.body},
            "toRecipients": recipients,
        });
        if let Some(path) = &mail.attachment {
            match attachment(path).await {
                Ok(file) => message["attachments"] = json!([file]),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot attach file");
                    return false;
                }
            }
        }
        let body = json!({"message": message, "saveToSentItems": true});
        self.mutate("send mail", Method::POST, "/me/sendMail", Some(&body))
            .await
    }
}

/// Reads `path` into an inline file attachment.
async fn attachment(path: &Path) -> Result<Value> {
    let size = tokio::fs::metadata(path).await?.len();
    if size > MAX_INLINE_ATTACHMENT {
        return Err(Error::Config(format!(
            "attachment is {size} bytes, inline limit is {MAX_INLINE_ATTACHMENT}"
        )));
    }
    let bytes = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map_or_else(|| "attachment".to_string(), |n| n.to_string_lossy().into_owned());
    Ok(json!({
        "@odata.type": "#microsoft.graph.fileAttachment",
        "name": name,
        "contentType": "application/octet-stream",
        "contentBytes": STANDARD.encode(bytes),
    }))
}
