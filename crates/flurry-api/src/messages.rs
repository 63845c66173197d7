use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use flurry_types::api::SendMessageRequest;
use flurry_types::events::GatewayEvent;

use crate::state::AppState;

/// Stores the message and pushes it to every open message feed for the chat.
/// Senders see their own message come back on the feed as well; that echo
/// is what confirms their optimistic copy.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if req.body.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let message_id = Uuid::new_v4();
    let SendMessageRequest { user_id, body } = req;

    let message = state
        .publish(move |db| {
            if db.get_chat(chat_id)?.is_none() || db.get_user(user_id)?.is_none() {
                return Ok((None, None));
            }
            let message = db
                .insert_message(message_id, chat_id, user_id, &body, chrono::Utc::now())?
                .to_api()?;
            let event = GatewayEvent::MessageCreate {
                message: message.clone(),
            };
            Ok((Some(message), Some(event)))
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    debug!("message {} stored in chat {}", message.id, chat_id);
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let messages = state
        .blocking(move |db| {
            if db.get_chat(chat_id)?.is_none() {
                return Ok(None);
            }
            db.get_messages(chat_id)?
                .iter()
                .map(|row| row.to_api())
                .collect::<anyhow::Result<Vec<_>>>()
                .map(Some)
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(messages))
}
