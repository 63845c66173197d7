pub mod chats;
pub mod messages;
pub mod names;
pub mod state;
pub mod users;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use flurry_gateway::connection;

pub use state::{AppState, AppStateInner};

/// Full HTTP surface: REST operations plus the `/gateway` push feeds.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/users", post(users::create_user))
        .route("/users/{user_id}/chats", get(users::get_user_chats))
        .route("/chats", post(chats::create_chat))
        .route("/chats/{chat_id}", get(chats::get_room))
        .route("/chats/{chat_id}/members/{user_id}", put(chats::upsert_membership))
        .route(
            "/chats/{chat_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/gateway", get(ws_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher.clone(), state.db.clone())
    })
}
