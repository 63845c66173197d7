//! Read-only projection of a room for rendering.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use flurry_types::models::{MessageId, User};

use crate::engine::{Phase, RoomState};

pub const ERROR_NOTICE: &str = "An error occurred";
pub const NO_MESSAGES: &str = "No messages yet";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    pub id: MessageId,
    pub author: String,
    pub body: String,
    pub created_at: Option<DateTime<Utc>>,
    pub pending: bool,
    pub sent_by_current_user: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub chat_id: Uuid,
    pub name: Option<String>,
    pub phase: Phase,
    pub messages: Vec<MessageView>,
    pub users: Vec<User>,
    /// Ready with an empty timeline. Not set while loading or on error.
    pub no_messages: bool,
    pub error_notice: Option<&'static str>,
    pub joined_banner: Option<String>,
    pub pending: bool,
}

impl RoomSnapshot {
    pub fn from_state(state: &RoomState) -> Self {
        let messages = state
            .messages
            .iter()
            .map(|m| MessageView {
                id: m.id,
                author: m.user.name.clone(),
                body: m.body.clone(),
                created_at: m.created_at,
                pending: m.is_pending(),
                sent_by_current_user: state.sent_by_current_user(m),
            })
            .collect::<Vec<_>>();

        Self {
            chat_id: state.chat_id,
            name: state.name.clone(),
            phase: state.phase,
            no_messages: state.phase == Phase::Ready
                && messages.is_empty()
                && state.last_error.is_none(),
            messages,
            users: state.users.clone(),
            error_notice: state.last_error.as_ref().map(|_| ERROR_NOTICE),
            joined_banner: state.joined.as_ref().map(|u| format!("{} Joined", u.name)),
            pending: state.pending_message().is_some(),
        }
    }

    pub fn title(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.chat_id.to_string())
    }
}

/// Turns successive snapshots into lines for a plain terminal.
///
/// Only output that changed since the previous call is returned. Pending
/// entries are printed once with a marker; their confirmation is not
/// reprinted since the body is unchanged.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    printed: usize,
    phase: Option<Phase>,
    banner: Option<String>,
    notice: Option<&'static str>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &RoomSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.phase != Some(snapshot.phase) {
            match snapshot.phase {
                Phase::Loading => lines.push("loading...".to_string()),
                Phase::Ready => {
                    lines.push(format!("== {} ==", snapshot.title()));
                    if snapshot.no_messages {
                        lines.push(NO_MESSAGES.to_string());
                    }
                }
                Phase::AwaitingIdentity => {}
            }
            self.phase = Some(snapshot.phase);
        }

        // a failed load empties the timeline
        if snapshot.messages.len() < self.printed {
            self.printed = snapshot.messages.len();
        }
        for m in &snapshot.messages[self.printed..] {
            lines.push(format_message(m));
        }
        self.printed = snapshot.messages.len();

        if snapshot.joined_banner != self.banner {
            if let Some(banner) = &snapshot.joined_banner {
                lines.push(format!("* {}", banner));
            }
            self.banner = snapshot.joined_banner.clone();
        }

        if snapshot.error_notice != self.notice {
            if let Some(notice) = snapshot.error_notice {
                lines.push(format!("! {}", notice));
            }
            self.notice = snapshot.error_notice;
        }

        lines
    }
}

fn format_message(m: &MessageView) -> String {
    let time = m
        .created_at
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let author = if m.sent_by_current_user { "me" } else { m.author.as_str() };
    let marker = if m.pending { " (sending)" } else { "" };
    format!("[{}] {}: {}{}", time, author, m.body, marker)
}
