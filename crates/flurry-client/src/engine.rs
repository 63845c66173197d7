//! Room reconciliation engine.
//!
//! The visible state of one chat room, and the only function allowed to
//! change it. [`reduce`] is pure: it takes the current [`RoomState`] and one
//! [`RoomEvent`] and returns the next state plus the [`Effect`]s the caller
//! must run (network mutations and queries). Nothing here touches the
//! network, a clock or storage.
//!
//! ```text
//! AwaitingIdentity --IdentityEstablished--> Loading
//! Loading --InitialLoadSucceeded/Failed--> Ready
//! Ready: pending slot none <--ComposerSubmitted / echo--> some
//! ```
//!
//! Pushes that arrive while the initial load is still in flight are held
//! back and replayed once it settles, so the load result cannot overwrite
//! them.

use tracing::{debug, warn};
use uuid::Uuid;

use flurry_types::models::{Message, User};

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingIdentity,
    Loading,
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    IdentityEstablished(User),
    InitialLoadSucceeded {
        name: Option<String>,
        messages: Vec<Message>,
        users: Vec<User>,
    },
    InitialLoadFailed(ChatError),
    ComposerSubmitted(String),
    MessagePushed(Message),
    UserJoinPushed(User),
    PushFailed(ChatError),
    SendFailed(ChatError),
    JoinFailed(ChatError),
    NotificationDismissed,
}

/// Work the engine asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    JoinChat { chat_id: Uuid, user_id: Uuid },
    LoadRoom { chat_id: Uuid },
    SendMessage { chat_id: Uuid, user_id: Uuid, body: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub chat_id: Uuid,
    pub name: Option<String>,
    /// The local participant, once known.
    pub user: Option<User>,
    /// Participants, unique by id, in arrival order.
    pub users: Vec<User>,
    pub messages: Vec<Message>,
    /// Index of the one optimistic message awaiting its echo.
    pub pending_index: Option<usize>,
    pub last_error: Option<ChatError>,
    pub phase: Phase,
    /// Someone else joined; shown once until dismissed or replaced.
    pub joined: Option<User>,
    deferred: Vec<RoomEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: RoomState,
    pub effects: Vec<Effect>,
}

pub fn reduce(mut state: RoomState, event: RoomEvent) -> Transition {
    let mut effects = Vec::new();
    state.apply(event, &mut effects);
    Transition { state, effects }
}

impl RoomState {
    pub fn new(chat_id: Uuid) -> Self {
        Self {
            chat_id,
            name: None,
            user: None,
            users: Vec::new(),
            messages: Vec::new(),
            pending_index: None,
            last_error: None,
            phase: Phase::AwaitingIdentity,
            joined: None,
            deferred: Vec::new(),
        }
    }

    pub fn sent_by_current_user(&self, message: &Message) -> bool {
        self.user
            .as_ref()
            .is_some_and(|me| me.id == message.user.id)
    }

    /// The optimistic message currently awaiting confirmation.
    pub fn pending_message(&self) -> Option<&Message> {
        self.pending_slot().map(|idx| &self.messages[idx])
    }

    /// Pushes held back until the initial load settles.
    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    fn apply(&mut self, event: RoomEvent, effects: &mut Vec<Effect>) {
        match event {
            RoomEvent::IdentityEstablished(user) => {
                if self.phase != Phase::AwaitingIdentity {
                    warn!("identity already established for chat {}", self.chat_id);
                    return;
                }
                effects.push(Effect::JoinChat {
                    chat_id: self.chat_id,
                    user_id: user.id,
                });
                effects.push(Effect::LoadRoom {
                    chat_id: self.chat_id,
                });
                self.user = Some(user);
                self.phase = Phase::Loading;
            }

            RoomEvent::InitialLoadSucceeded { name, messages, users } => {
                if self.phase != Phase::Loading {
                    debug!("ignoring late initial load for chat {}", self.chat_id);
                    return;
                }
                self.name = name;
                self.messages = messages;
                self.users = users;
                self.pending_index = None;
                self.settle(effects);
            }

            RoomEvent::InitialLoadFailed(err) => {
                if self.phase != Phase::Loading {
                    return;
                }
                warn!("chat {}: {}", self.chat_id, err);
                self.last_error = Some(err);
                self.messages.clear();
                self.pending_index = None;
                self.settle(effects);
            }

            RoomEvent::ComposerSubmitted(body) => self.submit(body, effects),

            RoomEvent::MessagePushed(message) => match self.phase {
                Phase::Ready => self.reconcile_message(message),
                Phase::Loading => self.deferred.push(RoomEvent::MessagePushed(message)),
                Phase::AwaitingIdentity => debug!("dropping push before identity"),
            },

            RoomEvent::UserJoinPushed(user) => match self.phase {
                Phase::Ready => self.reconcile_member(user),
                Phase::Loading => self.deferred.push(RoomEvent::UserJoinPushed(user)),
                Phase::AwaitingIdentity => debug!("dropping join before identity"),
            },

            RoomEvent::PushFailed(err) | RoomEvent::SendFailed(err) | RoomEvent::JoinFailed(err) => {
                warn!("chat {}: {}", self.chat_id, err);
                self.last_error = Some(err);
            }

            RoomEvent::NotificationDismissed => self.joined = None,
        }
    }

    fn settle(&mut self, effects: &mut Vec<Effect>) {
        self.phase = Phase::Ready;
        for event in std::mem::take(&mut self.deferred) {
            self.apply(event, effects);
        }
    }

    /// A second submit while one is pending is not refused: it appends
    /// another optimistic entry and the pending slot moves to it.
    fn submit(&mut self, body: String, effects: &mut Vec<Effect>) {
        if self.phase != Phase::Ready {
            warn!("composer used before chat {} is ready, ignoring", self.chat_id);
            return;
        }
        if body.trim().is_empty() {
            return;
        }
        let Some(user) = self.user.clone() else {
            return;
        };

        effects.push(Effect::SendMessage {
            chat_id: self.chat_id,
            user_id: user.id,
            body: body.clone(),
        });
        self.pending_index = Some(self.messages.len());
        self.messages.push(Message::pending(self.chat_id, user, body));
    }

    fn reconcile_message(&mut self, message: Message) {
        // Echo of our own optimistic message: swap it in place.
        if let Some(idx) = self.pending_slot() {
            let pending = &self.messages[idx];
            if pending.body == message.body && pending.user.id == message.user.id {
                debug!("confirmed pending message as {}", message.id);
                self.messages[idx] = message;
                self.pending_index = None;
                return;
            }
        }

        if self.messages.iter().any(|m| m.id == message.id) {
            debug!("dropping duplicate push of {}", message.id);
            return;
        }

        self.messages.push(message);
    }

    fn reconcile_member(&mut self, user: User) {
        if self.users.iter().any(|u| u.id == user.id) {
            debug!("{} ({}) already in roster", user.name, user.id);
            return;
        }

        let is_me = self.user.as_ref().is_some_and(|me| me.id == user.id);
        if !is_me {
            self.joined = Some(user.clone());
        }
        self.users.push(user);
    }

    /// Locate the pending entry by its sentinel id. The recorded index is
    /// tried first, then the last pending entry in the list.
    fn pending_slot(&self) -> Option<usize> {
        let idx = self.pending_index?;
        if self.messages.get(idx).is_some_and(Message::is_pending) {
            return Some(idx);
        }
        self.messages.iter().rposition(Message::is_pending)
    }
}
