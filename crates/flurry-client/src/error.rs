//! Error types for the chat client.
//!
//! `BackendError` describes what went wrong talking to the backend.
//! `ChatError` is what the room view records: it classifies the failure by
//! the operation it broke and carries only a rendered message, so it can be
//! cloned into the room state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend answered with status {status}")]
    Status { status: u16 },
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("push feed reported: {0}")]
    Feed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    /// Initial room query failed. The room degrades to an empty timeline.
    #[error("failed to load room: {0}")]
    Load(String),
    /// A push feed delivered an error instead of data. The feed keeps running.
    #[error("push feed error: {0}")]
    Push(String),
    /// User creation or room membership failed. Entering the room is aborted.
    #[error("failed to join room: {0}")]
    Identity(String),
    /// The send mutation failed. The optimistic message stays where it is.
    #[error("failed to send message: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("identity store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}
