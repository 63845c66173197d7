//! HTTP + WebSocket implementation of [`Backend`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use flurry_types::api::{
    CreateChatRequest, CreateUserRequest, MemberJoined, MembershipResponse, MessageRow,
    RoomResponse, SendMessageRequest,
};
use flurry_types::events::{FeedKind, GatewayCommand, GatewayEvent};
use flurry_types::models::{Chat, User};

use crate::backend::{Backend, PushFeed};
use crate::config::ClientConfig;
use crate::error::BackendError;

#[derive(Debug, Clone)]
pub struct RemoteBackend {
    http: Client,
    base_url: String,
    gateway_url: String,
}

impl RemoteBackend {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_urls(&config.server_url, &config.gateway_url)
    }

    pub fn with_urls(base_url: &str, gateway_url: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            gateway_url: gateway_url.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Open one gateway connection carrying a single feed.
    fn feed(&self, chat_id: Uuid, feed: FeedKind, since: DateTime<Utc>) -> PushFeed<GatewayEvent> {
        let url = self.gateway_url.clone();

        async_stream::stream! {
            let (mut ws, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok(conn) => conn,
                Err(e) => {
                    yield Err(BackendError::from(e));
                    return;
                }
            };

            let subscribe = GatewayCommand::Subscribe { chat_id, feed, since };
            let frame = match serde_json::to_string(&subscribe) {
                Ok(frame) => frame,
                Err(e) => {
                    yield Err(BackendError::from(e));
                    return;
                }
            };
            if let Err(e) = ws.send(WsMessage::Text(frame.into())).await {
                yield Err(BackendError::from(e));
                return;
            }

            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                            Ok(GatewayEvent::Subscribed { .. }) => {
                                debug!("subscribed to {:?} feed of chat {}", feed, chat_id);
                            }
                            Ok(event) => yield Ok(event),
                            Err(e) => yield Err(BackendError::from(e)),
                        }
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("{:?} feed of chat {} dropped: {}", feed, chat_id, e);
                        yield Err(BackendError::from(e));
                        break;
                    }
                }
            }
        }
        .boxed()
    }
}

async fn read<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        return Err(BackendError::Status {
            status: status.as_u16(),
        });
    }
    Ok(response.json().await?)
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn fetch_room(&self, chat_id: Uuid) -> Result<RoomResponse, BackendError> {
        let resp = self.http.get(self.url(&format!("/chats/{}", chat_id))).send().await?;
        read(resp).await
    }

    async fn fetch_messages(&self, chat_id: Uuid) -> Result<Vec<MessageRow>, BackendError> {
        let resp = self
            .http
            .get(self.url(&format!("/chats/{}/messages", chat_id)))
            .send()
            .await?;
        read(resp).await
    }

    async fn fetch_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, BackendError> {
        let resp = self
            .http
            .get(self.url(&format!("/users/{}/chats", user_id)))
            .send()
            .await?;
        read(resp).await
    }

    async fn create_user(&self, name: &str) -> Result<User, BackendError> {
        let req = CreateUserRequest { name: name.to_string() };
        let resp = self.http.post(self.url("/users")).json(&req).send().await?;
        read(resp).await
    }

    async fn create_chat(&self, name: Option<&str>) -> Result<Chat, BackendError> {
        let req = CreateChatRequest { name: name.map(str::to_string) };
        let resp = self.http.post(self.url("/chats")).json(&req).send().await?;
        read(resp).await
    }

    async fn upsert_membership(&self, chat_id: Uuid, user_id: Uuid) -> Result<u64, BackendError> {
        let resp = self
            .http
            .put(self.url(&format!("/chats/{}/members/{}", chat_id, user_id)))
            .send()
            .await?;
        let body: MembershipResponse = read(resp).await?;
        Ok(body.affected_rows)
    }

    async fn send_message(
        &self,
        chat_id: Uuid,
        user_id: Uuid,
        body: &str,
    ) -> Result<MessageRow, BackendError> {
        let req = SendMessageRequest { user_id, body: body.to_string() };
        let resp = self
            .http
            .post(self.url(&format!("/chats/{}/messages", chat_id)))
            .json(&req)
            .send()
            .await?;
        read(resp).await
    }

    fn subscribe_messages(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MessageRow> {
        self.feed(chat_id, FeedKind::Messages, since)
            .filter_map(|item| async move {
                match item {
                    Ok(GatewayEvent::MessageCreate { message }) => Some(Ok(message)),
                    Ok(GatewayEvent::Error { message }) => Some(Err(BackendError::Feed(message))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed()
    }

    fn subscribe_members(&self, chat_id: Uuid, since: DateTime<Utc>) -> PushFeed<MemberJoined> {
        self.feed(chat_id, FeedKind::Members, since)
            .filter_map(|item| async move {
                match item {
                    Ok(GatewayEvent::MemberJoin { member }) => Some(Ok(member)),
                    Ok(GatewayEvent::Error { message }) => Some(Err(BackendError::Feed(message))),
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed()
    }
}
