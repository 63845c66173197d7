use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, info};
use uuid::Uuid;

use flurry_types::api::{CreateChatRequest, MembershipResponse, RoomResponse};
use flurry_types::events::GatewayEvent;

use crate::names::generate_chat_name;
use crate::state::AppState;

pub async fn create_chat(
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(generate_chat_name);

    let chat_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let chat = state
        .blocking(move |db| db.create_chat(chat_id, Some(&name), now)?.to_chat())
        .await?;

    info!("created chat {} ({})", chat.display_name(), chat.id);
    Ok((StatusCode::CREATED, Json(chat)))
}

/// Room metadata, all messages oldest first, and the member roster.
pub async fn get_room(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let room = state
        .blocking(move |db| {
            let Some(chat) = db.get_chat(chat_id)? else {
                return Ok(None);
            };
            let messages = db
                .get_messages(chat_id)?
                .iter()
                .map(|row| row.to_api())
                .collect::<anyhow::Result<Vec<_>>>()?;
            let users = db
                .get_members(chat_id)?
                .iter()
                .map(|row| row.to_user())
                .collect::<anyhow::Result<Vec<_>>>()?;

            Ok(Some(RoomResponse {
                id: chat_id,
                name: chat.name,
                messages,
                users,
            }))
        })
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(room))
}

/// Idempotent: a repeated call for the same pair inserts nothing and
/// broadcasts nothing.
pub async fn upsert_membership(
    State(state): State<AppState>,
    Path((chat_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, StatusCode> {
    let outcome = state
        .publish(move |db| {
            if db.get_chat(chat_id)?.is_none() || db.get_user(user_id)?.is_none() {
                return Ok((None, None));
            }

            let affected = db.upsert_membership(chat_id, user_id, chrono::Utc::now())?;
            let joined = if affected > 0 {
                db.get_member(chat_id, user_id)?.map(|row| row.to_member()).transpose()?
            } else {
                None
            };
            let event = joined.clone().map(|member| GatewayEvent::MemberJoin { member });
            Ok((Some((affected, joined)), event))
        })
        .await?;

    let (affected, joined) = outcome.ok_or(StatusCode::NOT_FOUND)?;

    match joined {
        Some(member) => info!("{} ({}) joined chat {}", member.user.name, member.user.id, chat_id),
        None => debug!("user {} already in chat {}", user_id, chat_id),
    }
    Ok(Json(MembershipResponse {
        affected_rows: affected as u64,
    }))
}
