use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flurry_db::Database;
use flurry_types::events::{FeedKind, GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection may take to send its Subscribe command.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Which events one connection forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedFilter {
    pub chat_id: Uuid,
    pub feed: FeedKind,
    pub since: DateTime<Utc>,
}

impl FeedFilter {
    pub fn matches(&self, event: &GatewayEvent) -> bool {
        event.chat_id() == Some(self.chat_id)
            && event.feed() == Some(self.feed)
            && event.created_at().is_some_and(|at| at > self.since)
    }
}

/// Serve one push feed over a WebSocket.
///
/// The client opens with a `Subscribe` command. Rows already stored after
/// the cursor are replayed first, then live events follow. The broadcast
/// receiver is taken before the replay query, so a row may arrive twice but
/// never goes missing. A connection that falls behind the broadcast is
/// closed rather than skipped ahead; the client resubscribes from its last
/// row and the replay covers what it lost.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    let filter = match wait_for_subscribe(&mut receiver).await {
        Some(filter) => filter,
        None => {
            warn!("WebSocket client failed to subscribe, closing");
            return;
        }
    };

    info!(
        "feed {:?} opened for chat {} since {}",
        filter.feed, filter.chat_id, filter.since
    );

    let mut broadcast_rx = dispatcher.subscribe();
    debug!("{} feed connections open", dispatcher.listener_count());

    let ack = GatewayEvent::Subscribed {
        chat_id: filter.chat_id,
        feed: filter.feed,
    };
    if send_event(&mut sender, &ack).await.is_err() {
        return;
    }

    let backlog = match replay(db, filter).await {
        Ok(events) => events,
        Err(e) => {
            error!("replay for chat {} failed: {:#}", filter.chat_id, e);
            vec![GatewayEvent::Error {
                message: "failed to load missed events".into(),
            }]
        }
    };
    debug!("replaying {} stored events for chat {}", backlog.len(), filter.chat_id);
    for event in &backlog {
        if send_event(&mut sender, event).await.is_err() {
            return;
        }
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward live events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                next = next_live(&mut broadcast_rx, &filter) => {
                    let Some(event) = next else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // The client has nothing more to say after subscribing; we only watch
    // for pongs and the close frame.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                Message::Text(text) => {
                    debug!("ignoring command on open feed: {}", preview(&text));
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("feed {:?} closed for chat {}", filter.feed, filter.chat_id);
}

/// Next live event for this feed, or `None` once the feed must close:
/// the dispatcher is gone or this receiver lagged and lost events.
async fn next_live(
    rx: &mut broadcast::Receiver<GatewayEvent>,
    filter: &FeedFilter,
) -> Option<GatewayEvent> {
    loop {
        match rx.recv().await {
            Ok(event) if filter.matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                warn!(
                    "feed {:?} for chat {} lagged by {} events, closing",
                    filter.feed, filter.chat_id, n
                );
                return None;
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn wait_for_subscribe(receiver: &mut SplitStream<WebSocket>) -> Option<FeedFilter> {
    let wait = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(GatewayCommand::Subscribe { chat_id, feed, since }) => {
                        return Some(FeedFilter { chat_id, feed, since });
                    }
                    Err(e) => {
                        warn!("bad command: {} -- raw: {}", e, preview(&text));
                    }
                }
            }
        }
        None
    });

    wait.await.ok().flatten()
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

/// Stored rows created after the cursor, oldest first.
async fn replay(db: Arc<Database>, filter: FeedFilter) -> Result<Vec<GatewayEvent>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<GatewayEvent>> {
        match filter.feed {
            FeedKind::Messages => db
                .get_messages_since(filter.chat_id, filter.since)?
                .into_iter()
                .map(|row| -> Result<GatewayEvent> {
                    Ok(GatewayEvent::MessageCreate { message: row.to_api()? })
                })
                .collect(),
            FeedKind::Members => db
                .get_members_since(filter.chat_id, filter.since)?
                .into_iter()
                .map(|row| -> Result<GatewayEvent> {
                    Ok(GatewayEvent::MemberJoin { member: row.to_member()? })
                })
                .collect(),
        }
    })
    .await?
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<()> {
    let text = serde_json::to_string(event)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}
