use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use uuid::Uuid;

use flurry_types::api::{MemberJoined, MessageRow, RoomResponse};
use flurry_types::models::{Chat, User};

use crate::error::BackendError;

/// A live push feed. Each item is one delivered row or an error payload;
/// the stream ending means the underlying connection dropped.
pub type PushFeed<T> = BoxStream<'static, Result<T, BackendError>>;

/// Everything the client needs from the shared chat backend.
///
/// Request/response operations are one-shot and never retried here.
/// Feeds deliver rows created strictly after `since`, at least once.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn fetch_room(&self, chat_id: Uuid) -> Result<RoomResponse, BackendError>;

    /// Messages only, for views without a participant roster.
    async fn fetch_messages(&self, chat_id: Uuid) -> Result<Vec<MessageRow>, BackendError>;

    async fn fetch_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, BackendError>;

    async fn create_user(&self, name: &str) -> Result<User, BackendError>;

    async fn create_chat(&self, name: Option<&str>) -> Result<Chat, BackendError>;

    /// Idempotent; returns the number of rows inserted (0 or 1).
    async fn upsert_membership(&self, chat_id: Uuid, user_id: Uuid) -> Result<u64, BackendError>;

    async fn send_message(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        body: &str,
    ) -> Result<MessageRow, BackendError>;

    fn subscribe_messages(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MessageRow>;

    fn subscribe_members(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MemberJoined>;
}
