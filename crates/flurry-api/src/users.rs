use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use flurry_types::api::CreateUserRequest;
use flurry_types::models::Chat;

use crate::state::AppState;

const MAX_NAME_LEN: usize = 64;

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = Uuid::new_v4();
    let now = chrono::Utc::now();
    let user = state
        .blocking(move |db| db.create_user(user_id, &name, now)?.to_user())
        .await?;

    info!("created user {} ({})", user.name, user.id);
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user_chats(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let chats = state
        .blocking(move |db| {
            db.get_user_chats(user_id)?
                .iter()
                .map(|row| row.to_chat())
                .collect::<anyhow::Result<Vec<Chat>>>()
        })
        .await?;

    Ok(Json(chats))
}
