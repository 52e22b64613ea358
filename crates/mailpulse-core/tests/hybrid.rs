//! Integration tests for the hybrid router over fake backends.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use proptest::prelude::*;

use common::{
    FakeBackend, FakeConnector, FakeData, FakeState, Shared, entry_id, event, message, message_row,
    now, task,
};
use mailpulse_core::backend::InboxQuery;
use mailpulse_core::hybrid::{
    HybridClient, Selection, looks_local, merge_messages, merge_tasks, route_targets, task_tier,
};
use mailpulse_core::local::LocalBackend;
use mailpulse_core::model::{
    BackendKind, CategoryColor, Contact, DueBucket, Importance, ItemReference, NewItemKind,
};
use mailpulse_core::{AccountSettings, EnabledAccounts};

type Data = Arc<Mutex<FakeData>>;

async fn router() -> (HybridClient, Data, Data) {
    let (local, local_data) = FakeBackend::new(BackendKind::Local);
    let (remote, remote_data) = FakeBackend::new(BackendKind::Remote);
    local_data.lock().unwrap().accounts = vec!["Work".into()];
    remote_data.lock().unwrap().accounts = vec!["me@example.com".into()];
    let mut client = HybridClient::new(Box::new(local), Box::new(remote));
    client.connect().await;
    (client, local_data, remote_data)
}

fn enabled(names: &[&str]) -> EnabledAccounts {
    names
        .iter()
        .map(|n| ((*n).to_string(), AccountSettings::default()))
        .collect()
}

fn hex_id(n: u32) -> String {
    format!("{n:044x}")
}

/// Desktop client with one "Work" store holding one inbox message.
fn desktop_with_work_mail() -> Shared {
    let state = FakeState::new();
    {
        let mut s = state.lock().unwrap();
        s.add_store("s1", "Work");
        let received = now() - Duration::minutes(5);
        s.push_row("s1-Inbox", message_row(&entry_id(1), "local mail", received));
    }
    state
}

/// Router over the automation fake and a remote fake signed in as me@example.com.
fn desktop_router(state: &Shared) -> (HybridClient, Data) {
    let (remote, remote_data) = FakeBackend::new(BackendKind::Remote);
    remote_data.lock().unwrap().accounts = vec!["me@example.com".into()];
    let local = LocalBackend::new(FakeConnector(state.clone()));
    (HybridClient::new(Box::new(local), Box::new(remote)), remote_data)
}

#[tokio::test]
async fn test_two_accounts_merge_and_sum_unread() {
    let (mut client, local, remote) = router().await;
    let base = now();
    {
        let mut l = local.lock().unwrap();
        l.unread = 4;
        for i in 0..6 {
            l.messages.push(message(
                BackendKind::Local,
                "Work",
                &format!("L{i}"),
                base - Duration::minutes(i * 2),
            ));
        }
    }
    {
        let mut r = remote.lock().unwrap();
        r.unread = 7;
        for i in 0..6 {
            r.messages.push(message(
                BackendKind::Remote,
                "me@example.com",
                &format!("R{i}"),
                base - Duration::minutes(i * 2 + 1),
            ));
        }
    }

    let query = InboxQuery::new(10).with_accounts(enabled(&["Work", "me@example.com"]));
    let page = client.get_inbox_items(&query).await;

    assert_eq!(page.items.len(), 10);
    assert!(page.items.windows(2).all(|w| w[0].received >= w[1].received));
    assert_eq!(page.unread, 11);
    // Interleaved, so truncation did not favor either side.
    assert_eq!(page.items[0].reference.id, "L0");
    assert_eq!(page.items[1].reference.id, "R0");
    assert_eq!(page.items[9].reference.id, "R4");

    assert_eq!(local.lock().unwrap().calls, vec!["inbox:Work"]);
    assert_eq!(remote.lock().unwrap().calls, vec!["inbox:me@example.com"]);
}

#[tokio::test]
async fn test_unrecognized_accounts_go_remote() {
    let (client, _local, _remote) = router().await;
    let split = client.split_accounts(Some(&enabled(&["Unknown", "work"])));
    assert_eq!(split.local, Selection::Only(enabled(&["work"])));
    assert_eq!(split.remote, Selection::Only(enabled(&["Unknown"])));

    let split = client.split_accounts(Some(&enabled(&["Someone"])));
    assert_eq!(split.local, Selection::Skip);

    let split = client.split_accounts(None);
    assert_eq!(split.local, Selection::All);
    assert_eq!(split.remote, Selection::All);
}

#[tokio::test]
async fn test_skipped_side_is_not_called() {
    let (mut client, local, remote) = router().await;
    let query = InboxQuery::new(5).with_accounts(enabled(&["Unknown"]));
    client.get_inbox_items(&query).await;
    assert!(local.lock().unwrap().calls.is_empty());
    assert_eq!(remote.lock().unwrap().calls, vec!["inbox:Unknown"]);
}

#[tokio::test]
async fn test_remote_timeout_leaves_local_view() {
    let (local, local_data) = FakeBackend::new(BackendKind::Local);
    let (remote, remote_data) = FakeBackend::new(BackendKind::Remote);
    local_data.lock().unwrap().accounts = vec!["Work".into()];
    local_data
        .lock()
        .unwrap()
        .messages
        .push(message(BackendKind::Local, "Work", "L0", now()));
    remote_data.lock().unwrap().offline = true;

    let mut client = HybridClient::new(Box::new(local), Box::new(remote));
    assert!(client.connect().await);
    assert!(client.is_connected());

    let accounts = client.get_accounts().await;
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].kind, BackendKind::Local);

    let page = client.get_inbox_items(&InboxQuery::new(10)).await;
    assert_eq!(page.items.len(), 1);

    local_data.lock().unwrap().connected = false;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_item_routing_by_tag_and_shape() {
    let (mut client, local, remote) = router().await;
    let local_owned = hex_id(1);
    let remote_hexlike = hex_id(2);
    local.lock().unwrap().owned_ids.insert(local_owned.clone());
    remote.lock().unwrap().owned_ids.insert(remote_hexlike.clone());
    remote.lock().unwrap().owned_ids.insert("AAMkAD=".into());

    // Long hex: local first, and it succeeds there.
    assert!(client.mark_as_read(&ItemReference::untagged(local_owned.clone(), None)).await);
    assert_eq!(local.lock().unwrap().calls, vec![format!("mark_as_read:{local_owned}")]);
    assert!(remote.lock().unwrap().calls.is_empty());

    // Long hex the local backend rejects falls through.
    assert!(client.toggle_flag(&ItemReference::untagged(remote_hexlike.clone(), None)).await);
    assert_eq!(local.lock().unwrap().calls.len(), 2);
    assert_eq!(remote.lock().unwrap().calls, vec![format!("toggle_flag:{remote_hexlike}")]);

    // Other shapes go straight to the remote backend.
    assert!(client.delete_email(&ItemReference::untagged("AAMkAD=", None)).await);
    assert_eq!(local.lock().unwrap().calls.len(), 2);

    // A tag overrides the shape.
    assert!(!client.open_item(&ItemReference::remote(local_owned, None)).await);
    assert_eq!(local.lock().unwrap().calls.len(), 2);
}

#[tokio::test]
async fn test_aggregates() {
    let (mut client, local, remote) = router().await;
    {
        let mut l = local.lock().unwrap();
        l.categories.insert("Red".into(), CategoryColor::Preset(0));
        l.categories.insert("Shared".into(), CategoryColor::Preset(3));
    }
    {
        let mut r = remote.lock().unwrap();
        r.categories.insert("Shared".into(), CategoryColor::Preset(7));
        r.contacts = vec![Contact {
            name: "Remote Person".into(),
            email: "rp@example.com".into(),
        }];
    }

    let categories = client.get_category_map().await;
    assert_eq!(categories.len(), 2);
    assert_eq!(categories["Shared"], CategoryColor::Preset(7));

    // Local has no contacts: fall back to remote.
    assert_eq!(client.search_contacts("rem").await.len(), 1);
    local.lock().unwrap().contacts = vec![Contact {
        name: "Local Person".into(),
        email: "lp@example.com".into(),
    }];
    let contacts = client.search_contacts("per").await;
    assert_eq!(contacts[0].name, "Local Person");
    assert_eq!(
        remote.lock().unwrap().calls,
        vec!["search_contacts:rem".to_string()]
    );
}

#[tokio::test]
async fn test_create_prefers_connected_local() {
    let (mut client, local, remote) = router().await;
    assert!(client.create_meeting().await);
    assert_eq!(local.lock().unwrap().calls, vec!["create_item:Meeting"]);

    local.lock().unwrap().connected = false;
    assert!(client.create_item(NewItemKind::Task).await);
    assert_eq!(remote.lock().unwrap().calls, vec!["create_item:Task"]);
}

#[tokio::test]
async fn test_folder_list_goes_to_owner() {
    let (mut client, local, remote) = router().await;
    client.get_folder_list("work").await;
    client.get_folder_list("me@example.com").await;
    assert_eq!(local.lock().unwrap().calls, vec!["get_folder_list:work"]);
    assert_eq!(remote.lock().unwrap().calls, vec!["get_folder_list:me@example.com"]);
}

#[tokio::test]
async fn test_calendar_and_tasks_merge_order() {
    let (mut client, local, remote) = router().await;
    let base = now();
    local.lock().unwrap().events =
        vec![event(BackendKind::Local, "L1", base + Duration::minutes(20))];
    remote.lock().unwrap().events =
        vec![event(BackendKind::Remote, "R1", base + Duration::minutes(10))];
    let events = client
        .get_calendar_items(None, base, base + Duration::hours(2))
        .await;
    let ids: Vec<_> = events.iter().map(|e| e.reference.id.as_str()).collect();
    assert_eq!(ids, vec!["R1", "L1"]);

    let soon = Some(base + Duration::days(3));
    let later = Some(base + Duration::days(5));
    local.lock().unwrap().tasks = vec![
        task(BackendKind::Local, "plain-undated", None, Importance::Normal, false),
        task(BackendKind::Local, "high-later", later, Importance::High, false),
    ];
    remote.lock().unwrap().tasks = vec![
        task(BackendKind::Remote, "plain-soon", soon, Importance::Low, false),
        task(BackendKind::Remote, "reminder", later, Importance::Normal, true),
        task(BackendKind::Remote, "high-soon", soon, Importance::High, false),
    ];
    let tasks = client.get_tasks(None, &[]).await;
    let ids: Vec<_> = tasks.iter().map(|t| t.reference.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["reminder", "high-soon", "high-later", "plain-soon", "plain-undated"]
    );

    let later_only = client.get_tasks(None, &[DueBucket::Later]).await;
    assert_eq!(later_only.len(), 4);
}

#[test]
fn test_tiers() {
    let t = task(BackendKind::Local, "x", None, Importance::High, true);
    assert_eq!(task_tier(&t), 0);
}

fn arb_messages() -> impl Strategy<Value = Vec<(bool, u8, i64)>> {
    prop::collection::vec((any::<bool>(), 0u8..16, 0i64..600), 0..40)
}

#[tokio::test]
async fn test_account_names_route_case_insensitively() {
    let state = desktop_with_work_mail();
    let (mut client, remote) = desktop_router(&state);
    assert!(client.connect().await);

    let filter = enabled(&["work"]);
    let split = client.split_accounts(Some(&filter));
    assert_eq!(split.local, Selection::Only(enabled(&["Work"])));
    assert_eq!(split.remote, Selection::Skip);

    let page = client
        .get_inbox_items(&InboxQuery::new(10).with_accounts(filter))
        .await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].account, "Work");
    assert_eq!(page.unread, 1);
    assert!(remote.lock().unwrap().calls.is_empty());
}

#[tokio::test]
async fn test_desktop_client_started_after_connect_is_picked_up() {
    let state = desktop_with_work_mail();
    state.lock().unwrap().available = false;
    let (mut client, _remote) = desktop_router(&state);
    assert!(client.connect().await);
    assert!(client.is_connected());

    let query = InboxQuery::new(10).with_accounts(enabled(&["Work"]));
    assert!(client.get_inbox_items(&query).await.items.is_empty());

    state.lock().unwrap().available = true;
    let page = client.get_inbox_items(&query).await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].reference.origin, Some(BackendKind::Local));
}

#[tokio::test]
async fn test_reconnect_missing_only_touches_the_down_side() {
    let state = desktop_with_work_mail();
    state.lock().unwrap().available = false;
    let (mut client, _remote) = desktop_router(&state);
    assert!(client.connect().await);

    state.lock().unwrap().available = true;
    assert!(client.reconnect_missing().await);
    assert_eq!(state.lock().unwrap().connects, 1);
    assert_eq!(client.get_accounts().await.len(), 2);

    assert!(client.reconnect_missing().await);
    assert_eq!(state.lock().unwrap().connects, 1);
}

proptest! {
    #[test]
    fn prop_merge_is_sorted_bounded_and_unique(
        left in arb_messages(),
        right in arb_messages(),
        count in 0usize..30,
    ) {
        let base = now();
        let build = |raw: &[(bool, u8, i64)]| {
            raw.iter()
                .map(|(is_local, id, minutes)| {
                    let kind = if *is_local { BackendKind::Local } else { BackendKind::Remote };
                    message(kind, "acct", &id.to_string(), base - Duration::minutes(*minutes))
                })
                .collect::<Vec<_>>()
        };
        let merged = merge_messages(vec![build(&left), build(&right)], count);

        prop_assert!(merged.len() <= count);
        prop_assert!(merged.windows(2).all(|w| w[0].received >= w[1].received));
        let mut seen = HashSet::new();
        for m in &merged {
            prop_assert!(seen.insert((m.reference.origin, m.reference.id.clone())));
        }
    }

    #[test]
    fn prop_long_hex_ids_try_local_first(id in "[0-9a-fA-F]{41,64}") {
        prop_assert!(looks_local(&id));
        prop_assert_eq!(
            route_targets(&ItemReference::untagged(id, None)),
            vec![BackendKind::Local, BackendKind::Remote]
        );
    }

    #[test]
    fn prop_other_ids_go_remote(id in "[0-9a-f]{0,40}|[0-9a-f]{10,30}[g-zA-Z=+/-][0-9a-f]{10,30}") {
        prop_assert!(!looks_local(&id));
        prop_assert_eq!(
            route_targets(&ItemReference::untagged(id, None)),
            vec![BackendKind::Remote]
        );
    }

    #[test]
    fn prop_tasks_keep_tier_order(
        raw in prop::collection::vec(
            (any::<bool>(), any::<bool>(), prop::option::of(0i64..10)),
            0..30,
        )
    ) {
        let base = now();
        let tasks: Vec<_> = raw
            .iter()
            .enumerate()
            .map(|(i, (reminder, high, days))| {
                let importance = if *high { Importance::High } else { Importance::Normal };
                task(
                    BackendKind::Remote,
                    &i.to_string(),
                    days.map(|d| base + Duration::days(d)),
                    importance,
                    *reminder,
                )
            })
            .collect();
        let merged = merge_tasks(vec![tasks]);
        let sorted = merged.windows(2).all(|w| {
            let key = |t: &mailpulse_core::model::NormalizedTask| {
                (task_tier(t), t.due.is_none(), t.due)
            };
            key(&w[0]) <= key(&w[1])
        });
        prop_assert!(sorted);
    }
}
