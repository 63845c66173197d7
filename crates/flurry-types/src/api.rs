use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub name: String,
}

// -- Chats --

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChatRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Everything the room view needs on first paint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomResponse {
    pub id: Uuid,
    pub name: Option<String>,
    pub messages: Vec<MessageRow>,
    pub users: Vec<User>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipResponse {
    pub affected_rows: u64,
}

// -- Messages --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub user_id: Uuid,
    pub body: String,
}

/// A stored message joined with its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub user: User,
}

// -- Members --

/// A membership row as delivered by the member feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberJoined {
    pub chat_id: Uuid,
    pub user: User,
    pub joined_at: DateTime<Utc>,
}
