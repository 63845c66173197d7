//! In-memory stand-in for the chat backend.
//!
//! Behaves like the real server where the client can tell the difference:
//! feeds replay stored rows created after `since` and then deliver live
//! rows, membership upserts are idempotent, and every send is echoed on the
//! message feed. Test hooks can fail operations, hold loads or sends, drop
//! every feed connection, and push arbitrary items.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use flurry_client::backend::{Backend, PushFeed};
use flurry_client::error::BackendError;
use flurry_client::session::RoomSession;
use flurry_client::view::RoomSnapshot;
use flurry_types::api::{MemberJoined, MessageRow, RoomResponse};
use flurry_types::models::{Chat, User};

type Tx<T> = mpsc::UnboundedSender<Result<T, BackendError>>;

#[derive(Default)]
struct Store {
    last_tick: Option<DateTime<Utc>>,
    users: Vec<User>,
    chats: Vec<Chat>,
    members: Vec<MemberJoined>,
    messages: Vec<MessageRow>,
    message_feeds: Vec<(Uuid, Tx<MessageRow>)>,
    member_feeds: Vec<(Uuid, Tx<MemberJoined>)>,
    message_since: Vec<DateTime<Utc>>,
    member_since: Vec<DateTime<Utc>>,
}

impl Store {
    /// Wall clock, nudged forward so no two rows share a timestamp.
    fn tick(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let t = match self.last_tick {
            Some(last) if now <= last => last + chrono::Duration::microseconds(1),
            _ => now,
        };
        self.last_tick = Some(t);
        t
    }
}

/// Blocks callers while closed.
struct Gate(watch::Sender<bool>);

impl Gate {
    fn open() -> Self {
        Self(watch::channel(true).0)
    }

    fn set(&self, open: bool) {
        self.0.send_replace(open);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }
}

pub struct FakeBackend {
    store: Mutex<Store>,
    pub fail_load: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_join: AtomicBool,
    pub create_user_calls: AtomicUsize,
    loads: Gate,
    sends: Gate,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(Store::default()),
            fail_load: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            create_user_calls: AtomicUsize::new(0),
            loads: Gate::open(),
            sends: Gate::open(),
        }
    }

    pub fn hold_loads(&self, hold: bool) {
        self.loads.set(!hold);
    }

    pub fn hold_sends(&self, hold: bool) {
        self.sends.set(!hold);
    }

    /// Drop every open feed, as if the server restarted.
    pub fn disconnect_feeds(&self) {
        let mut store = self.store.lock().unwrap();
        store.message_feeds.clear();
        store.member_feeds.clear();
    }

    /// Deliver a row to the message feeds again.
    pub fn redeliver(&self, row: &MessageRow) {
        let store = self.store.lock().unwrap();
        for (chat_id, tx) in &store.message_feeds {
            if *chat_id == row.chat_id {
                let _ = tx.send(Ok(row.clone()));
            }
        }
    }

    /// Deliver an error payload on every message feed of the chat.
    pub fn push_error(&self, chat_id: Uuid, message: &str) {
        let store = self.store.lock().unwrap();
        for (id, tx) in &store.message_feeds {
            if *id == chat_id {
                let _ = tx.send(Err(BackendError::Feed(message.to_string())));
            }
        }
    }

    /// Feeds whose consumer is still listening.
    pub fn live_feeds(&self, chat_id: Uuid) -> usize {
        let store = self.store.lock().unwrap();
        let messages = store
            .message_feeds
            .iter()
            .filter(|(id, tx)| *id == chat_id && !tx.is_closed())
            .count();
        let members = store
            .member_feeds
            .iter()
            .filter(|(id, tx)| *id == chat_id && !tx.is_closed())
            .count();
        messages + members
    }

    pub fn message_subscriptions(&self) -> Vec<DateTime<Utc>> {
        self.store.lock().unwrap().message_since.clone()
    }

    pub fn member_subscriptions(&self) -> Vec<DateTime<Utc>> {
        self.store.lock().unwrap().member_since.clone()
    }

    pub fn stored_messages(&self, chat_id: Uuid) -> Vec<MessageRow> {
        let store = self.store.lock().unwrap();
        store.messages.iter().filter(|m| m.chat_id == chat_id).cloned().collect()
    }

    /// Another participant posts, bypassing the send gate.
    pub fn post(&self, chat_id: Uuid, user_id: Uuid, body: &str) -> MessageRow {
        self.store_message(chat_id, user_id, body).unwrap()
    }

    fn store_message(&self, chat_id: Uuid, user_id: Uuid, body: &str) -> Result<MessageRow, BackendError> {
        let mut store = self.store.lock().unwrap();
        let user = store
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(status(404))?;
        let row = MessageRow {
            id: Uuid::new_v4(),
            chat_id,
            body: body.to_string(),
            created_at: store.tick(),
            user,
        };
        store.messages.push(row.clone());
        for (id, tx) in &store.message_feeds {
            if *id == chat_id {
                let _ = tx.send(Ok(row.clone()));
            }
        }
        Ok(row)
    }

    fn messages_of(store: &Store, chat_id: Uuid) -> Vec<MessageRow> {
        store.messages.iter().filter(|m| m.chat_id == chat_id).cloned().collect()
    }
}

fn feed<T: Send + 'static>(mut rx: mpsc::UnboundedReceiver<Result<T, BackendError>>) -> PushFeed<T> {
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
    .boxed()
}

fn status(code: u16) -> BackendError {
    BackendError::Status { status: code }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_room(&self, chat_id: Uuid) -> Result<RoomResponse, BackendError> {
        self.loads.pass().await;
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(status(503));
        }
        let store = self.store.lock().unwrap();
        let chat = store.chats.iter().find(|c| c.id == chat_id).ok_or(status(404))?;
        Ok(RoomResponse {
            id: chat.id,
            name: chat.name.clone(),
            messages: Self::messages_of(&store, chat_id),
            users: store
                .members
                .iter()
                .filter(|m| m.chat_id == chat_id)
                .map(|m| m.user.clone())
                .collect(),
        })
    }

    async fn fetch_messages(&self, chat_id: Uuid) -> Result<Vec<MessageRow>, BackendError> {
        self.loads.pass().await;
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(status(503));
        }
        let store = self.store.lock().unwrap();
        Ok(Self::messages_of(&store, chat_id))
    }

    async fn fetch_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, BackendError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .members
            .iter()
            .filter(|m| m.user.id == user_id)
            .filter_map(|m| store.chats.iter().find(|c| c.id == m.chat_id).cloned())
            .collect())
    }

    async fn create_user(&self, name: &str) -> Result<User, BackendError> {
        self.create_user_calls.fetch_add(1, Ordering::SeqCst);
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
        };
        self.store.lock().unwrap().users.push(user.clone());
        Ok(user)
    }

    async fn create_chat(&self, name: Option<&str>) -> Result<Chat, BackendError> {
        let mut store = self.store.lock().unwrap();
        let chat = Chat {
            id: Uuid::new_v4(),
            name: Some(name.unwrap_or("jolly-bauble-12").to_string()),
            created_at: store.tick(),
        };
        store.chats.push(chat.clone());
        Ok(chat)
    }

    async fn upsert_membership(&self, chat_id: Uuid, user_id: Uuid) -> Result<u64, BackendError> {
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(status(500));
        }
        let mut store = self.store.lock().unwrap();
        if !store.chats.iter().any(|c| c.id == chat_id) {
            return Err(status(404));
        }
        let user = store
            .users
            .iter()
            .find(|u| u.id == user_id)
            .cloned()
            .ok_or(status(404))?;
        if store.members.iter().any(|m| m.chat_id == chat_id && m.user.id == user_id) {
            return Ok(0);
        }

        let member = MemberJoined {
            chat_id,
            user,
            joined_at: store.tick(),
        };
        store.members.push(member.clone());
        for (id, tx) in &store.member_feeds {
            if *id == chat_id {
                let _ = tx.send(Ok(member.clone()));
            }
        }
        Ok(1)
    }

    async fn send_message(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        body: &str,
    ) -> Result<MessageRow, BackendError> {
        self.sends.pass().await;
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(status(500));
        }
        self.store_message(chat_id, user_id, body)
    }

    fn subscribe_messages(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MessageRow> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store.lock().unwrap();
        store.message_since.push(since);
        for row in Self::messages_of(&store, chat_id) {
            if row.created_at > since {
                let _ = tx.send(Ok(row));
            }
        }
        store.message_feeds.push((chat_id, tx));
        feed(rx)
    }

    fn subscribe_members(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MemberJoined> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut store = self.store.lock().unwrap();
        store.member_since.push(since);
        for member in store.members.iter().filter(|m| m.chat_id == chat_id) {
            if member.joined_at > since {
                let _ = tx.send(Ok(member.clone()));
            }
        }
        store.member_feeds.push((chat_id, tx));
        feed(rx)
    }
}

/// Wait until the room's snapshot satisfies `pred`, or fail the test.
pub async fn wait_for(
    session: &RoomSession,
    pred: impl FnMut(&RoomSnapshot) -> bool,
) -> RoomSnapshot {
    let mut rx = session.snapshots();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for room state")
        .expect("room closed");
    (*snapshot).clone()
}
