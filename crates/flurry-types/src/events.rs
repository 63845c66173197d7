use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{MemberJoined, MessageRow};

/// The two push feeds a room view listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Messages,
    Members,
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server acknowledges a subscription
    Subscribed { chat_id: Uuid, feed: FeedKind },

    /// A new message was stored
    MessageCreate { message: MessageRow },

    /// A user was added to a chat
    MemberJoin { member: MemberJoined },

    /// The feed hit an error; the connection stays open
    Error { message: String },
}

impl GatewayEvent {
    /// Returns the chat_id if this event is scoped to a specific chat.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::Subscribed { chat_id, .. } => Some(*chat_id),
            Self::MessageCreate { message } => Some(message.chat_id),
            Self::MemberJoin { member } => Some(member.chat_id),
            Self::Error { .. } => None,
        }
    }

    /// Returns the feed that carries this event, if any.
    pub fn feed(&self) -> Option<FeedKind> {
        match self {
            Self::MessageCreate { .. } => Some(FeedKind::Messages),
            Self::MemberJoin { .. } => Some(FeedKind::Members),
            _ => None,
        }
    }

    /// Creation time used for the `since` cursor filter.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::MessageCreate { message } => Some(message.created_at),
            Self::MemberJoin { member } => Some(member.joined_at),
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Open a feed for one chat. Only rows created strictly after `since`
    /// are delivered.
    Subscribe {
        chat_id: Uuid,
        feed: FeedKind,
        since: DateTime<Utc>,
    },
}
