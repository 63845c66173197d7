//! Drives one room view: owns the engine state, runs its effects against a
//! [`Backend`] and keeps both push feeds alive.
//!
//! All state transitions happen on a single task that drains one event
//! channel, so reconciliation never interleaves. Feeds, the initial load and
//! mutations run on their own tasks and only ever talk to the engine by
//! sending it events.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flurry_types::api::{MemberJoined, MessageRow};
use flurry_types::models::{Message, User};

use crate::backend::{Backend, PushFeed};
use crate::cursor::SubscriptionCursor;
use crate::engine::{Effect, RoomEvent, RoomState, Transition, reduce};
use crate::error::{BackendError, ChatError};
use crate::view::RoomSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomOptions {
    /// Load the participant roster and subscribe to the member feed.
    pub roster: bool,
    /// Pause before resubscribing a feed whose connection dropped.
    pub reconnect_delay: Duration,
    /// How long a "joined" banner stays up unless dismissed earlier.
    pub banner_ttl: Duration,
    /// How far behind the local clock the feeds first subscribe. Rows are
    /// stamped by the server's clock; this covers a local clock running
    /// ahead of it. Rows inside the window also arrive with the initial
    /// load and are dropped as duplicates.
    pub feed_lookback: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            roster: true,
            reconnect_delay: Duration::from_secs(1),
            banner_ttl: Duration::from_secs(2),
            feed_lookback: Duration::from_secs(5),
        }
    }
}

pub struct RoomSession {
    chat_id: Uuid,
    events: mpsc::UnboundedSender<RoomEvent>,
    snapshots: watch::Receiver<RoomSnapshot>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RoomSession {
    /// Enter a room as `user`.
    ///
    /// Feeds are subscribed from this moment before anything else happens,
    /// so nothing created after entry can be missed. The membership upsert
    /// must succeed; its failure aborts entry with [`ChatError::Identity`].
    pub async fn open<B: Backend>(
        backend: Arc<B>,
        chat_id: Uuid,
        user: User,
        options: RoomOptions,
    ) -> Result<Self, ChatError> {
        let Transition { state, effects } =
            reduce(RoomState::new(chat_id), RoomEvent::IdentityEstablished(user));

        let cancel = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cursor = SubscriptionCursor::looking_back(options.feed_lookback);
        let mut tasks = Vec::new();

        let feed_backend = backend.clone();
        tasks.push(tokio::spawn(pump_feed(
            backend.subscribe_messages(chat_id, cursor.since()),
            move |since| feed_backend.subscribe_messages(chat_id, since),
            cursor,
            |row: &MessageRow| row.created_at,
            |row: MessageRow| RoomEvent::MessagePushed(Message::from(row)),
            events_tx.clone(),
            options.reconnect_delay,
            cancel.clone(),
        )));

        if options.roster {
            let feed_backend = backend.clone();
            tasks.push(tokio::spawn(pump_feed(
                backend.subscribe_members(chat_id, cursor.since()),
                move |since| feed_backend.subscribe_members(chat_id, since),
                cursor,
                |member: &MemberJoined| member.joined_at,
                |member: MemberJoined| RoomEvent::UserJoinPushed(member.user),
                events_tx.clone(),
                options.reconnect_delay,
                cancel.clone(),
            )));
        }

        let mut deferred = Vec::new();
        for effect in effects {
            match effect {
                join @ Effect::JoinChat { .. } => {
                    if let Some(RoomEvent::JoinFailed(e)) =
                        run_effect(backend.as_ref(), join, options.roster).await
                    {
                        warn!("could not join chat {}: {}", chat_id, e);
                        cancel.cancel();
                        return Err(e);
                    }
                }
                other => deferred.push(other),
            }
        }
        for effect in deferred {
            spawn_effect(&backend, effect, &events_tx, options.roster);
        }

        let (snapshots_tx, snapshots_rx) = watch::channel(RoomSnapshot::from_state(&state));
        tasks.push(tokio::spawn(run_engine(
            backend,
            state,
            events_rx,
            events_tx.clone(),
            snapshots_tx,
            options,
            cancel.clone(),
        )));

        info!("entered chat {}", chat_id);
        Ok(Self {
            chat_id,
            events: events_tx,
            snapshots: snapshots_rx,
            cancel,
            tasks,
        })
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    /// Hand a composed message to the engine.
    pub fn submit(&self, body: impl Into<String>) {
        self.dispatch(RoomEvent::ComposerSubmitted(body.into()));
    }

    pub fn dismiss_notification(&self) {
        self.dispatch(RoomEvent::NotificationDismissed);
    }

    pub fn snapshots(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Leave the room. Both feeds are dropped; mutations already in flight
    /// complete but their outcome is discarded.
    pub async fn close(mut self) {
        self.cancel.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("room task ended abnormally: {}", e);
            }
        }
        debug!("left chat {}", self.chat_id);
    }

    fn dispatch(&self, event: RoomEvent) {
        if self.events.send(event).is_err() {
            debug!("chat {} is closed, dropping event", self.chat_id);
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_engine<B: Backend>(
    backend: Arc<B>,
    mut state: RoomState,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    events_tx: mpsc::UnboundedSender<RoomEvent>,
    snapshots: watch::Sender<RoomSnapshot>,
    options: RoomOptions,
    cancel: CancellationToken,
) {
    // set while a join banner is showing
    let mut banner_expiry: Option<Instant> = None;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep_until(banner_expiry.unwrap_or_else(Instant::now)), if banner_expiry.is_some() => {
                banner_expiry = None;
                RoomEvent::NotificationDismissed
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let shown = state.joined.clone();
        let Transition { state: next, effects } = reduce(state, event);
        state = next;

        if state.joined.is_none() {
            banner_expiry = None;
        } else if state.joined != shown {
            banner_expiry = Some(Instant::now() + options.banner_ttl);
        }

        for effect in effects {
            spawn_effect(&backend, effect, &events_tx, options.roster);
        }
        snapshots.send_replace(RoomSnapshot::from_state(&state));
    }
}

fn spawn_effect<B: Backend>(
    backend: &Arc<B>,
    effect: Effect,
    events: &mpsc::UnboundedSender<RoomEvent>,
    roster: bool,
) {
    let backend = backend.clone();
    let events = events.clone();
    tokio::spawn(async move {
        if let Some(event) = run_effect(backend.as_ref(), effect, roster).await {
            // the room may be gone already
            let _ = events.send(event);
        }
    });
}

async fn run_effect<B: Backend>(backend: &B, effect: Effect, roster: bool) -> Option<RoomEvent> {
    match effect {
        Effect::JoinChat { chat_id, user_id } => backend
            .upsert_membership(chat_id, user_id)
            .await
            .err()
            .map(|e| RoomEvent::JoinFailed(ChatError::Identity(e.to_string()))),

        Effect::LoadRoom { chat_id } if roster => Some(match backend.fetch_room(chat_id).await {
            Ok(room) => RoomEvent::InitialLoadSucceeded {
                name: room.name,
                messages: room.messages.into_iter().map(Message::from).collect(),
                users: room.users,
            },
            Err(e) => RoomEvent::InitialLoadFailed(ChatError::Load(e.to_string())),
        }),

        Effect::LoadRoom { chat_id } => Some(match backend.fetch_messages(chat_id).await {
            Ok(rows) => RoomEvent::InitialLoadSucceeded {
                name: None,
                messages: rows.into_iter().map(Message::from).collect(),
                users: Vec::new(),
            },
            Err(e) => RoomEvent::InitialLoadFailed(ChatError::Load(e.to_string())),
        }),

        Effect::SendMessage { chat_id, user_id, body } => {
            match backend.send_message(chat_id, user_id, &body).await {
                // confirmation arrives as the echo on the message feed
                Ok(row) => {
                    debug!("message {} accepted", row.id);
                    None
                }
                Err(e) => Some(RoomEvent::SendFailed(ChatError::Send(e.to_string()))),
            }
        }
    }
}

/// Forward one feed into the engine until cancelled, resubscribing from the
/// cursor whenever the stream ends.
#[allow(clippy::too_many_arguments)]
async fn pump_feed<T, R>(
    mut feed: PushFeed<T>,
    resubscribe: R,
    mut cursor: SubscriptionCursor,
    stamp: fn(&T) -> DateTime<Utc>,
    to_event: fn(T) -> RoomEvent,
    events: mpsc::UnboundedSender<RoomEvent>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) where
    T: Send + 'static,
    R: Fn(DateTime<Utc>) -> PushFeed<T> + Send + 'static,
{
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => return,
            item = feed.next() => item,
        };

        let event = match item {
            Some(Ok(row)) => {
                cursor.advance(stamp(&row));
                to_event(row)
            }
            Some(Err(e @ (BackendError::Feed(_) | BackendError::Decode(_)))) => {
                RoomEvent::PushFailed(ChatError::Push(e.to_string()))
            }
            Some(Err(e)) => {
                warn!("push feed transport error: {}", e);
                continue;
            }
            None => {
                debug!("push feed ended, resubscribing from {}", cursor.since());
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
                feed = resubscribe(cursor.since());
                continue;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }
}
