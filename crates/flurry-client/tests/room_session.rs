//! Room sessions driven against the in-memory backend: optimistic sends,
//! echo confirmation, joins, failures and feed reconnection.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use flurry_client::backend::Backend;
use flurry_client::engine::Phase;
use flurry_client::error::ChatError;
use flurry_client::identity::{self, IdentityStore, MemoryIdentityStore};
use flurry_client::session::{RoomOptions, RoomSession};
use flurry_client::view::{ERROR_NOTICE, RoomSnapshot};
use flurry_types::models::{Chat, User};

use common::{FakeBackend, wait_for};

fn options() -> RoomOptions {
    RoomOptions {
        reconnect_delay: Duration::from_millis(20),
        banner_ttl: Duration::from_secs(60),
        ..RoomOptions::default()
    }
}

async fn setup() -> (Arc<FakeBackend>, Chat, User, User) {
    let backend = Arc::new(FakeBackend::new());
    let chat = backend.create_chat(None).await.unwrap();
    let ada = backend.create_user("ada").await.unwrap();
    let bo = backend.create_user("bo").await.unwrap();
    (backend, chat, ada, bo)
}

async fn enter(backend: &Arc<FakeBackend>, chat: &Chat, user: &User) -> RoomSession {
    let session = RoomSession::open(backend.clone(), chat.id, user.clone(), options())
        .await
        .unwrap();
    wait_for(&session, |s| s.phase == Phase::Ready).await;
    session
}

fn bodies(snapshot: &RoomSnapshot) -> Vec<&str> {
    snapshot.messages.iter().map(|m| m.body.as_str()).collect()
}

#[tokio::test]
async fn own_message_is_shown_pending_then_confirmed_once() {
    let (backend, chat, ada, _) = setup().await;
    let session = enter(&backend, &chat, &ada).await;
    assert!(session.snapshot().no_messages);

    backend.hold_sends(true);
    session.submit("hello");

    let snap = wait_for(&session, |s| s.pending).await;
    assert_eq!(bodies(&snap), vec!["hello"]);
    assert!(snap.messages[0].pending);
    assert!(snap.messages[0].sent_by_current_user);
    assert!(!snap.no_messages);

    backend.hold_sends(false);
    let snap = wait_for(&session, |s| !s.pending).await;
    assert_eq!(bodies(&snap), vec!["hello"]);
    assert!(!snap.messages[0].pending);
    assert!(snap.messages[0].created_at.is_some());

    session.close().await;
}

#[tokio::test]
async fn other_participants_see_the_message_in_order() {
    let (backend, chat, ada, bo) = setup().await;
    let ada_room = enter(&backend, &chat, &ada).await;
    let bo_room = enter(&backend, &chat, &bo).await;

    ada_room.submit("one");
    wait_for(&bo_room, |s| s.messages.len() == 1).await;
    wait_for(&ada_room, |s| s.messages.len() == 1 && !s.pending).await;
    bo_room.submit("two");
    ada_room.submit("three");

    for room in [&ada_room, &bo_room] {
        let snap = wait_for(room, |s| s.messages.len() == 3 && !s.pending).await;
        assert_eq!(snap.messages[0].body, "one");
        let mut rest = bodies(&snap)[1..].to_vec();
        rest.sort();
        assert_eq!(rest, vec!["three", "two"]);
    }

    let snap = bo_room.snapshot();
    let one = &snap.messages[0];
    assert_eq!(one.author, "ada");
    assert!(!one.sent_by_current_user);

    ada_room.close().await;
    bo_room.close().await;
}

#[tokio::test]
async fn foreign_message_with_same_body_does_not_confirm_pending() {
    let (backend, chat, ada, bo) = setup().await;
    let session = enter(&backend, &chat, &ada).await;
    backend.hold_sends(true);
    session.submit("hi");
    wait_for(&session, |s| s.pending).await;

    backend.post(chat.id, bo.id, "hi");
    let snap = wait_for(&session, |s| s.messages.len() == 2).await;
    assert_eq!(snap.messages[0].author, "ada");
    assert!(snap.messages[0].pending);
    assert_eq!(snap.messages[1].author, "bo");
    assert!(!snap.messages[1].pending);

    backend.hold_sends(false);
    let snap = wait_for(&session, |s| !s.pending).await;
    assert_eq!(bodies(&snap), vec!["hi", "hi"]);
    assert!(snap.messages[0].sent_by_current_user);
    assert!(!snap.messages[1].sent_by_current_user);

    session.close().await;
}

#[tokio::test]
async fn join_banner_is_only_shown_for_other_users() {
    let (backend, chat, ada, bo) = setup().await;
    let ada_room = enter(&backend, &chat, &ada).await;

    let snap = ada_room.snapshot();
    assert_eq!(snap.joined_banner, None);
    assert_eq!(snap.users, vec![ada.clone()]);

    let bo_room = enter(&backend, &chat, &bo).await;
    let snap = wait_for(&ada_room, |s| s.users.len() == 2).await;
    assert_eq!(snap.joined_banner.as_deref(), Some("bo Joined"));

    // bo sees the roster but no banner for their own arrival
    let bo_snap = wait_for(&bo_room, |s| s.users.len() == 2).await;
    assert_eq!(bo_snap.joined_banner, None);

    ada_room.dismiss_notification();
    wait_for(&ada_room, |s| s.joined_banner.is_none()).await;

    // rejoining is idempotent and raises nothing
    let again = backend.upsert_membership(chat.id, bo.id).await.unwrap();
    assert_eq!(again, 0);
    ada_room.submit("still here");
    let snap = wait_for(&ada_room, |s| s.messages.len() == 1 && !s.pending).await;
    assert_eq!(snap.users.len(), 2);
    assert_eq!(snap.joined_banner, None);

    ada_room.close().await;
    bo_room.close().await;
}

#[tokio::test]
async fn join_banner_clears_by_itself() {
    let (backend, chat, ada, bo) = setup().await;
    let opts = RoomOptions {
        banner_ttl: Duration::from_millis(300),
        ..options()
    };
    let ada_room = RoomSession::open(backend.clone(), chat.id, ada, opts).await.unwrap();
    wait_for(&ada_room, |s| s.phase == Phase::Ready).await;

    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    let snap = wait_for(&ada_room, |s| s.users.len() == 2).await;
    assert_eq!(snap.joined_banner.as_deref(), Some("bo Joined"));

    let snap = wait_for(&ada_room, |s| s.joined_banner.is_none()).await;
    assert_eq!(snap.users.len(), 2);

    ada_room.close().await;
}

#[tokio::test]
async fn rows_just_before_entry_are_covered_once() {
    let (backend, chat, ada, bo) = setup().await;
    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    let early = backend.post(chat.id, bo.id, "just before");

    let session = enter(&backend, &chat, &ada).await;
    // the first subscriptions reach back past rows stored moments ago
    assert!(backend.message_subscriptions()[0] < early.created_at);
    assert!(backend.member_subscriptions()[0] < early.created_at);

    session.submit("hi bo");
    let snap = wait_for(&session, |s| s.messages.len() >= 2 && !s.pending).await;
    assert_eq!(bodies(&snap), vec!["just before", "hi bo"]);
    assert_eq!(snap.users.len(), 2);
    assert_eq!(snap.joined_banner, None);

    session.close().await;
}

#[tokio::test]
async fn failed_load_degrades_to_empty_room() {
    let (backend, chat, ada, _) = setup().await;
    backend.fail_load.store(true, Ordering::SeqCst);

    let session = enter(&backend, &chat, &ada).await;
    let snap = session.snapshot();
    assert_eq!(snap.error_notice, Some(ERROR_NOTICE));
    assert!(snap.messages.is_empty());
    assert!(!snap.no_messages);

    session.submit("anyone?");
    let snap = wait_for(&session, |s| s.messages.len() == 1 && !s.pending).await;
    assert_eq!(bodies(&snap), vec!["anyone?"]);

    session.close().await;
}

#[tokio::test]
async fn failed_join_aborts_entry() {
    let (backend, chat, ada, _) = setup().await;
    backend.fail_join.store(true, Ordering::SeqCst);

    let result = RoomSession::open(backend.clone(), chat.id, ada, options()).await;
    assert!(matches!(result, Err(ChatError::Identity(_))));
}

#[tokio::test]
async fn failed_send_leaves_pending_entry() {
    let (backend, chat, ada, _) = setup().await;
    let session = enter(&backend, &chat, &ada).await;
    backend.fail_send.store(true, Ordering::SeqCst);

    session.submit("lost");
    let snap = wait_for(&session, |s| s.error_notice.is_some()).await;
    assert_eq!(bodies(&snap), vec!["lost"]);
    assert!(snap.messages[0].pending);
    assert!(snap.pending);
    assert!(backend.stored_messages(chat.id).is_empty());

    session.close().await;
}

#[tokio::test]
async fn push_racing_the_initial_load_is_not_duplicated() {
    let (backend, chat, ada, bo) = setup().await;
    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    backend.hold_loads(true);

    let session = RoomSession::open(backend.clone(), chat.id, ada.clone(), options())
        .await
        .unwrap();
    // stored and pushed while the load is still outstanding
    backend.send_message(chat.id, bo.id, "early").await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.snapshot().phase, Phase::Loading);

    backend.hold_loads(false);
    let snap = wait_for(&session, |s| s.phase == Phase::Ready).await;
    assert_eq!(bodies(&snap), vec!["early"]);
    assert_eq!(snap.users.len(), 2);
    // ada's own join raced the load too; it must not read as someone joining
    assert_eq!(snap.joined_banner, None);

    session.close().await;
}

#[tokio::test]
async fn dropped_feed_resubscribes_from_last_delivery() {
    let (backend, chat, ada, bo) = setup().await;
    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    let session = enter(&backend, &chat, &ada).await;

    let first = backend.send_message(chat.id, bo.id, "before").await.unwrap();
    wait_for(&session, |s| s.messages.len() == 1).await;

    backend.disconnect_feeds();
    backend.send_message(chat.id, bo.id, "during").await.unwrap();

    let snap = wait_for(&session, |s| s.messages.len() == 2).await;
    assert_eq!(bodies(&snap), vec!["before", "during"]);

    let since = backend.message_subscriptions();
    assert!(since.len() >= 2);
    assert_eq!(since[1], first.created_at);

    // at-least-once redelivery is absorbed
    backend.redeliver(&first);
    session.submit("after");
    let snap = wait_for(&session, |s| s.messages.len() >= 3 && !s.pending).await;
    assert_eq!(bodies(&snap), vec!["before", "during", "after"]);

    session.close().await;
}

#[tokio::test]
async fn feed_error_is_reported_and_feed_keeps_running() {
    let (backend, chat, ada, bo) = setup().await;
    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    let session = enter(&backend, &chat, &ada).await;

    backend.push_error(chat.id, "permission denied");
    wait_for(&session, |s| s.error_notice.is_some()).await;

    backend.send_message(chat.id, bo.id, "still flowing").await.unwrap();
    let snap = wait_for(&session, |s| s.messages.len() == 1).await;
    assert_eq!(bodies(&snap), vec!["still flowing"]);

    session.close().await;
}

#[tokio::test]
async fn messages_only_room_skips_roster() {
    let (backend, chat, ada, bo) = setup().await;
    backend.upsert_membership(chat.id, bo.id).await.unwrap();
    backend.send_message(chat.id, bo.id, "hey").await.unwrap();

    let opts = RoomOptions { roster: false, ..options() };
    let session = RoomSession::open(backend.clone(), chat.id, ada, opts).await.unwrap();
    let snap = wait_for(&session, |s| s.phase == Phase::Ready).await;

    assert_eq!(bodies(&snap), vec!["hey"]);
    assert!(snap.users.is_empty());
    assert!(backend.member_subscriptions().is_empty());

    session.close().await;
}

#[tokio::test]
async fn closing_the_room_drops_both_feeds() {
    let (backend, chat, ada, _) = setup().await;
    let session = enter(&backend, &chat, &ada).await;
    assert_eq!(backend.live_feeds(chat.id), 2);

    session.close().await;
    assert_eq!(backend.live_feeds(chat.id), 0);
}

#[tokio::test]
async fn identity_is_created_once_and_reused() {
    let backend = FakeBackend::new();
    let store = MemoryIdentityStore::new();

    let first = identity::establish_identity(&store, &backend, "ada").await.unwrap();
    let second = identity::establish_identity(&store, &backend, "ignored").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(second.name, "ada");
    assert_eq!(backend.create_user_calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.load().unwrap(), Some(first));
}

#[tokio::test]
async fn start_chat_creates_chat_user_and_membership() {
    let backend = FakeBackend::new();
    let store = MemoryIdentityStore::new();

    let (chat, user) = identity::start_chat(&store, &backend, "ada").await.unwrap();

    let chats = backend.fetch_user_chats(user.id).await.unwrap();
    assert_eq!(chats, vec![chat.clone()]);
    // already a member
    assert_eq!(backend.upsert_membership(chat.id, user.id).await.unwrap(), 0);
}
