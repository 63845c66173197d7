use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageRow;

/// Sentinel id carried by an optimistic message until the backend confirms it.
pub const PENDING_ID: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    /// Name shown in chat listings; falls back to the id for unnamed chats.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

/// Identifier of a timeline entry: either the optimistic sentinel or the
/// id assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MessageId {
    Pending,
    Confirmed(Uuid),
}

impl MessageId {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str(PENDING_ID),
            Self::Confirmed(id) => write!(f, "{}", id),
        }
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for MessageId {
    type Error = uuid::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == PENDING_ID {
            return Ok(Self::Pending);
        }
        value.parse().map(Self::Confirmed)
    }
}

/// A timeline entry as the client sees it.
///
/// Confirmed messages carry the backend id and creation time. Optimistic
/// messages use [`MessageId::Pending`], have no `created_at`, and live only
/// in memory until their echo arrives on the push feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: Uuid,
    pub user_id: Uuid,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub user: User,
}

impl Message {
    pub fn pending(chat_id: Uuid, user: User, body: impl Into<String>) -> Self {
        Self {
            id: MessageId::Pending,
            chat_id,
            user_id: user.id,
            body: body.into(),
            created_at: None,
            user,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: MessageId::Confirmed(row.id),
            chat_id: row.chat_id,
            user_id: row.user.id,
            body: row.body,
            created_at: Some(row.created_at),
            user: row.user,
        }
    }
}
