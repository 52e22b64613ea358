//! Remote backend against a scripted HTTP service on the loopback interface.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use mailpulse_core::backend::InboxQuery;
use mailpulse_core::model::{CategoryColor, ItemReference};
use mailpulse_core::{MailBackend, RemoteBackend, RemoteSettings};
use mailpulse_oauth::{AuthSession, OAuthClient, Provider, Token};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One request as the service saw it.
#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    query: BTreeMap<String, String>,
    body: Value,
}

type Handler = Arc<dyn Fn(&Request, &str) -> (u16, Value) + Send + Sync>;

struct Service {
    base_url: String,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Service {
    /// Serves every connection with `handler(request, base_url)`.
    async fn start(
        handler: impl Fn(&Request, &str) -> (u16, Value) + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1.0", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let (base, log) = (base_url.clone(), Arc::clone(&requests));
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (base, log, handler) = (base.clone(), Arc::clone(&log), Arc::clone(&handler));
                tokio::spawn(async move {
                    let _ = answer(stream, &base, &log, &handler).await;
                });
            }
        });
        Self { base_url, requests }
    }

    fn settings(&self) -> RemoteSettings {
        RemoteSettings {
            base_url: self.base_url.clone(),
            connect_timeout_secs: 2,
            read_timeout_secs: 5,
            ..RemoteSettings::default()
        }
    }

    async fn backend(&self, name: &str) -> RemoteBackend {
        let provider = Provider::microsoft("common").unwrap();
        let client = OAuthClient::new("test-client", provider);
        let path = std::env::temp_dir().join(format!(
            "mailpulse-service-{name}-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let session = AuthSession::new(client, path);
        session
            .store(Token::new("service-access-token", "Bearer"))
            .await
            .unwrap();
        RemoteBackend::new(&self.settings(), Arc::new(session)).unwrap()
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

async fn answer(
    stream: TcpStream,
    base_url: &str,
    log: &Mutex<Vec<Request>>,
    handler: &Handler,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let mut parts = line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut length = 0;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 || header.trim_end().is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
    let request = Request {
        method,
        path: path.to_string(),
        query: url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    let (status, reply) = handler(&request, base_url);
    log.lock().unwrap().push(request);

    let payload = if status == 204 {
        String::new()
    } else {
        reply.to_string()
    };
    let reason = match status {
        200 => "OK",
        204 => "No Content",
        404 => "Not Found",
        _ => "Status",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

fn graph_message(id: &str, received: &str, flag: &str) -> Value {
    json!({
        "id": id,
        "subject": format!("subject {id}"),
        "from": {"emailAddress": {"name": "Ann", "address": "ann@example.com"}},
        "receivedDateTime": received,
        "isRead": false,
        "flag": {"flagStatus": flag},
        "importance": "normal",
        "hasAttachments": false,
        "categories": []
    })
}

fn not_found() -> (u16, Value) {
    (
        404,
        json!({"error": {"code": "ErrorItemNotFound", "message": "The item was not found"}}),
    )
}

#[tokio::test]
async fn test_connect_learns_signed_in_account() {
    let service = Service::start(|request, _| match request.path.as_str() {
        "/v1.0/me" => (
            200,
            json!({"displayName": "Me", "mail": "me@example.com", "userPrincipalName": "me@corp"}),
        ),
        _ => not_found(),
    })
    .await;
    let mut backend = service.backend("connect").await;

    assert!(backend.connect().await);
    assert!(backend.is_connected());
    assert_eq!(backend.account(), Some("me@example.com"));
    assert_eq!(backend.known_accounts(), vec!["me@example.com".to_string()]);
}

#[tokio::test]
async fn test_flagged_inbox_over_fetches_and_filters_client_side() {
    let service = Service::start(|request, _| match request.path.as_str() {
        "/v1.0/me/mailFolders/inbox/messages" => (
            200,
            json!({"value": [
                graph_message("M2", "2026-03-02T11:00:00Z", "notFlagged"),
                graph_message("M1", "2026-03-02T10:00:00Z", "flagged"),
                graph_message("M3", "2026-03-02T12:00:00Z", "complete"),
                graph_message("M4", "2026-03-02T09:00:00Z", "flagged"),
            ]}),
        ),
        "/v1.0/me/mailFolders/inbox" => (
            200,
            json!({"id": "inbox", "displayName": "Inbox", "unreadItemCount": 3}),
        ),
        _ => not_found(),
    })
    .await;
    let mut backend = service.backend("flagged").await;

    let page = backend
        .get_inbox_items(&InboxQuery::new(2).flagged(&[]))
        .await
        .unwrap();
    let ids: Vec<_> = page.items.iter().map(|m| m.reference.id.as_str()).collect();
    assert_eq!(ids, ["M1", "M4"]);
    assert_eq!(page.unread, 3);

    let requests = service.requests();
    let listing = requests
        .iter()
        .find(|r| r.path.ends_with("/messages"))
        .unwrap();
    assert_eq!(listing.query["$top"], "8");
    assert_eq!(listing.query["$orderby"], "receivedDateTime desc");
}

#[tokio::test]
async fn test_collections_follow_next_link() {
    let service = Service::start(|request, base| {
        match (request.path.as_str(), request.query.get("$skiptoken")) {
            ("/v1.0/me/outlook/masterCategories", None) => (
                200,
                json!({
                    "value": [{"displayName": "Red", "color": "preset0"}],
                    "@odata.nextLink": format!("{base}/me/outlook/masterCategories?$skiptoken=2")
                }),
            ),
            ("/v1.0/me/outlook/masterCategories", Some(_)) => (
                200,
                json!({"value": [{"displayName": "Blue", "color": "preset7"}]}),
            ),
            _ => not_found(),
        }
    })
    .await;
    let mut backend = service.backend("paging").await;

    let categories = backend.get_category_map().await.unwrap();
    assert_eq!(categories.len(), 2);
    assert_eq!(categories["Red"], CategoryColor::Preset(0));
    assert_eq!(categories["Blue"], CategoryColor::Preset(7));
    assert_eq!(service.requests().len(), 2);
}

#[tokio::test]
async fn test_mark_as_read_accepts_no_content() {
    let service = Service::start(|request, _| match request.method.as_str() {
        "PATCH" => (204, Value::Null),
        _ => not_found(),
    })
    .await;
    let mut backend = service.backend("mark-read").await;

    assert!(backend.mark_as_read(&ItemReference::remote("M1", None)).await);
    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/v1.0/me/messages/M1");
    assert_eq!(requests[0].body, json!({"isRead": true}));
}

#[tokio::test]
async fn test_missing_items_read_as_absent() {
    let service = Service::start(|_, _| not_found()).await;
    let mut backend = service.backend("missing").await;
    let item = ItemReference::remote("gone", None);

    assert!(!backend.mark_as_read(&item).await);
    assert!(!backend.toggle_flag(&item).await);
    assert!(backend.get_category_map().await.unwrap().is_empty());
    let page = backend.get_inbox_items(&InboxQuery::new(5)).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.unread, 0);
    // Not-found is final: one request per call, no retries.
    assert_eq!(service.requests().len(), 4);
}

#[tokio::test]
async fn test_double_toggle_restores_flag_status() {
    let flag = Arc::new(Mutex::new("notFlagged".to_string()));
    let state = Arc::clone(&flag);
    let service = Service::start(move |request, _| {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/v1.0/me/messages/M1") => {
                let status = state.lock().unwrap().clone();
                (200, json!({"id": "M1", "flag": {"flagStatus": status}}))
            }
            ("PATCH", "/v1.0/me/messages/M1") => {
                let next = request.body["flag"]["flagStatus"].as_str().unwrap();
                *state.lock().unwrap() = next.to_string();
                (200, json!({"id": "M1"}))
            }
            _ => not_found(),
        }
    })
    .await;
    let mut backend = service.backend("toggle").await;
    let item = ItemReference::remote("M1", None);

    assert!(backend.toggle_flag(&item).await);
    assert_eq!(*flag.lock().unwrap(), "flagged");
    assert!(backend.toggle_flag(&item).await);
    assert_eq!(*flag.lock().unwrap(), "notFlagged");

    let reads: Vec<_> = service
        .requests()
        .into_iter()
        .filter(|r| r.method == "GET")
        .collect();
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].query["$select"], "flag");
}
