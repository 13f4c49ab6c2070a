//! Boundary contracts to the excluded collaborators.
//!
//! Every call here is fire-and-forget: invoking it returns immediately, and
//! any result arrives later as a [`crate::HostEvent`] tagged with the
//! request id the caller chose. No implementation may block the event loop.

use crate::{RequestId, RoomId, UserId};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role of one chat-completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the transcript replayed to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Per-call model options.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    pub model: String,
    pub max_tokens: u32,
    pub enable_search: bool,
}

/// One part of a forward-style multi-part message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardPart {
    Text(String),
    /// Rendered PNG of a long-form section.
    Image(Vec<u8>),
}

/// Outbound sends to the chat platform. No delivery confirmation.
pub trait ChatPort: Send + Sync {
    fn send_reply(&self, user: UserId, room: Option<RoomId>, text: &str);
    fn send_forward_bundle(&self, user: UserId, room: Option<RoomId>, parts: &[ForwardPart]);
}

/// Asynchronous model backend. The result comes back as a
/// [`crate::HostEvent::ModelResult`] carrying `request_id`.
pub trait ModelPort: Send + Sync {
    fn call_model(&self, request_id: RequestId, messages: &[ChatMessage], options: &ModelOptions);
}

/// Asynchronous room lookups. Results come back as
/// [`crate::HostEvent::RoomInfo`] tagged with the matching kind.
pub trait RoomPort: Send + Sync {
    fn fetch_announcements(&self, request_id: RequestId, room: RoomId);
    fn fetch_history(&self, request_id: RequestId, room: RoomId, count: u32);
}

/// Optional long-form renderer for forward bundles.
///
/// Returns `None` when rendering is unavailable; callers fall back to
/// chunked plain text.
pub trait ImageRenderer: Send + Sync {
    fn render(&self, text: &str) -> Option<Vec<u8>>;
}

/// The orchestrator's handle on all outbound boundaries.
#[derive(Clone)]
pub struct Ports {
    pub chat: Arc<dyn ChatPort>,
    pub model: Arc<dyn ModelPort>,
    pub room: Arc<dyn RoomPort>,
    pub renderer: Option<Arc<dyn ImageRenderer>>,
}
