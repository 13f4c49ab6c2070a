//! Active dialogue state.
//!
//! One `Session` per key, owned by the store for the dialogue's lifetime.
//! The transcript is append-only and replayed verbatim to the model on
//! every turn, so insertion order is significant.

use crate::ports::{ChatMessage, ChatRole};
use crate::{RequestId, SessionKey};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    /// Terminal transition target: a report call is in flight and the
    /// session is removed when it resolves.
    GeneratingReport,
}

/// Room snapshot captured once, before the session starts, and used only to
/// seed the first reply.
#[derive(Debug, Clone, Default)]
pub struct RoomContext {
    pub announcements: Option<String>,
    pub recent_history: Option<String>,
}

impl RoomContext {
    pub fn is_empty(&self) -> bool {
        self.announcements.is_none() && self.recent_history.is_none()
    }

    /// Render for prompt injection.
    pub fn render(&self) -> String {
        let mut sections = Vec::new();
        if let Some(announcements) = &self.announcements {
            sections.push(format!("Room announcements:\n{announcements}"));
        }
        if let Some(history) = &self.recent_history {
            sections.push(format!("Recent room messages:\n{history}"));
        }
        sections.join("\n\n")
    }
}

/// One active multi-turn dialogue.
#[derive(Debug)]
pub struct Session {
    pub key: SessionKey,
    pub state: SessionState,
    pub transcript: Vec<ChatMessage>,
    /// Assistant replies delivered so far. User messages do not count.
    pub turn_count: u32,
    pub last_activity_at: DateTime<Utc>,
    /// Whether the opening batch mentioned the assistant. Timeout failures
    /// for auto-triggered sessions are dropped silently; mention-started
    /// ones are surfaced.
    pub started_by_mention: bool,
    pub room_context: Option<RoomContext>,
    /// The one in-flight reply/report call, if any. Enforces at most one
    /// outstanding model call per session.
    pub pending_call: Option<RequestId>,
    /// Input arrived while a reply was outstanding; issue another reply as
    /// soon as the current one resolves.
    pub needs_reply: bool,
    /// An early-report keyword arrived while a reply was outstanding.
    pub report_requested: bool,
}

impl Session {
    pub fn new(
        key: SessionKey,
        started_by_mention: bool,
        room_context: Option<RoomContext>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            state: SessionState::Active,
            transcript: Vec::new(),
            turn_count: 0,
            last_activity_at: now,
            started_by_mention,
            room_context,
            pending_call: None,
            needs_reply: false,
            report_requested: false,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.transcript.push(ChatMessage::new(ChatRole::User, text));
        self.last_activity_at = now;
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, now: DateTime<Utc>) {
        self.transcript
            .push(ChatMessage::new(ChatRole::Assistant, text));
        self.turn_count += 1;
        self.last_activity_at = now;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }
}

/// Owner of every active dialogue, keyed by (room, user).
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<SessionKey, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.contains_key(key)
    }

    /// Insert a new session. At most one session may exist per key; callers
    /// check before creating.
    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.key, session);
    }

    pub fn get(&self, key: &SessionKey) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &SessionKey) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    pub fn remove(&mut self, key: &SessionKey) -> Option<Session> {
        self.sessions.remove(key)
    }

    /// Keys idle past `timeout` at `now`, in any state. Checked only from
    /// the reaper.
    pub fn idle_keys(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<SessionKey> {
        self.sessions
            .values()
            .filter(|session| now - session.last_activity_at >= timeout)
            .map(|session| session.key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
