//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the flurry-types wire models so the store stays independent.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use flurry_types::api::{MemberJoined, MessageRow as ApiMessageRow};
use flurry_types::models::{Chat, User};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct ChatRow {
    pub id: String,
    pub name: Option<String>,
    pub created_at: String,
}

pub struct MemberRow {
    pub chat_id: String,
    pub user_id: String,
    pub user_name: String,
    pub joined_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub user_id: String,
    pub user_name: String,
    pub body: String,
    pub created_at: String,
}

impl UserRow {
    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.id)?,
            name: self.name.clone(),
        })
    }
}

impl ChatRow {
    pub fn to_chat(&self) -> Result<Chat> {
        Ok(Chat {
            id: parse_id(&self.id)?,
            name: self.name.clone(),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MemberRow {
    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: parse_id(&self.user_id)?,
            name: self.user_name.clone(),
        })
    }

    pub fn to_member(&self) -> Result<MemberJoined> {
        Ok(MemberJoined {
            chat_id: parse_id(&self.chat_id)?,
            user: self.to_user()?,
            joined_at: parse_timestamp(&self.joined_at)?,
        })
    }
}

impl MessageRow {
    pub fn to_api(&self) -> Result<ApiMessageRow> {
        Ok(ApiMessageRow {
            id: parse_id(&self.id)?,
            chat_id: parse_id(&self.chat_id)?,
            body: self.body.clone(),
            created_at: parse_timestamp(&self.created_at)
                .with_context(|| format!("message {}", self.id))?,
            user: User {
                id: parse_id(&self.user_id)?,
                name: self.user_name.clone(),
            },
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("corrupt id '{}'", raw))
}

/// Accepts the RFC 3339 form we write, and the bare "YYYY-MM-DD HH:MM:SS"
/// form SQLite's `datetime('now')` produces.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))
}
