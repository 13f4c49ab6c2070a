//! parley — conversational session orchestrator.
//!
//! Per (room, user) key, parley decides whether an automated multi-turn
//! dialogue should begin, drives that dialogue turn by turn through an
//! external model backend, and tears it down under timeout, interruption,
//! or completion. The host delivers events (inbound messages, periodic
//! ticks, async call results) one at a time; all waiting is explicit state
//! held in the orchestrator's maps and resumed by correlation id.

pub mod config;
pub mod error;
pub mod llm;
pub mod normalize;
pub mod orchestrator;
pub mod ports;
pub mod runtime;

pub use error::{ParleyError, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform identity of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl UserId {
    /// Masked rendering for log output. User ids are sensitive and must not
    /// appear verbatim in logs.
    pub fn masked(&self) -> String {
        mask_digits(self.0)
    }
}

/// Platform identity of a room. Absent for one-to-one conversations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub u64);

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite identity of one dialogue slot.
///
/// The primary key for sessions, batches, and cooldowns. `room` is `None`
/// for direct messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub room: Option<RoomId>,
    pub user: UserId,
}

impl SessionKey {
    pub fn new(room: Option<RoomId>, user: UserId) -> Self {
        Self { room, user }
    }
}

impl std::fmt::Display for SessionKey {
    /// Log-safe rendering: the user portion is always masked.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.room {
            Some(room) => write!(f, "room:{room}/{}", self.user.masked()),
            None => write!(f, "dm/{}", self.user.masked()),
        }
    }
}

/// Mask a numeric platform id for log output, keeping just enough shape to
/// correlate lines by eye.
pub fn mask_digits(id: u64) -> String {
    let digits = id.to_string();
    if digits.len() <= 4 {
        "***".to_string()
    } else {
        format!("{}***{}", &digits[..2], &digits[digits.len() - 2..])
    }
}

/// One typed piece of an inbound message.
///
/// The chat transport hands messages over as a list of segments: literal
/// text interleaved with mentions, media, and quoted-reply markers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Mention { user: UserId },
    MentionAll,
    Image,
    Video,
    Voice,
    File,
    Card,
    /// Quoted-reply marker. Reply context is handled by the transport layer;
    /// the normalizer drops these to avoid duplicating content.
    Reply,
}

/// Inbound chat message as delivered by the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: UserId,
    pub room: Option<RoomId>,
    pub segments: Vec<Segment>,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.room, self.sender)
    }
}

/// Opaque correlation id for one outstanding asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which room lookup a room-info response answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomInfoKind {
    Announcements,
    History,
}

/// Everything the host can deliver to the orchestrator.
///
/// The host is single-threaded and cooperative: one event at a time, no
/// native timers. The periodic tick is the only wall-clock signal.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Message(InboundMessage),
    Tick,
    /// Completion of an earlier model call, tagged with the caller-chosen id.
    ModelResult {
        request_id: RequestId,
        success: bool,
        content: String,
    },
    /// Completion of an earlier room-info fetch.
    RoomInfo {
        request_id: RequestId,
        kind: RoomInfoKind,
        success: bool,
        content: String,
    },
}
