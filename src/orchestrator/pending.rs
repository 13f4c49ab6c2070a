//! In-flight request registry.
//!
//! The host's call-out primitive is fire-and-forget: a call returns
//! immediately and its result arrives later tagged only with the request
//! id. This table is the sole mechanism for resuming the right
//! continuation. Every entry is stamped at issue time; the reaper expires
//! entries past their kind-specific timeout and synthesizes the failure
//! path.

use super::batch::BatchItem;
use super::session::RoomContext;
use crate::{RequestId, SessionKey};

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// What an outstanding call is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Triage,
    Reply,
    Report,
    ContextFetch,
}

/// Which room lookup a context-fetch pipeline is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStage {
    Announcements,
    History,
}

/// Kind-specific state carried across the async gap.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    /// Evidence that went into the triage prompt, kept so a failed call can
    /// re-queue it and an affirmative one can seed the transcript.
    Triage {
        items: Vec<BatchItem>,
        any_mentioned: bool,
        context: Option<RoomContext>,
    },
    Reply,
    Report,
    /// Context gathering ahead of triage; accumulates partial results.
    ContextFetch {
        stage: ContextStage,
        items: Vec<BatchItem>,
        any_mentioned: bool,
        partial: RoomContext,
    },
}

/// One outstanding asynchronous call.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub id: RequestId,
    pub kind: RequestKind,
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub payload: RequestPayload,
}

/// Per-kind expiry windows. Triage and context lookups are cheap and short;
/// reply and report generation get longer.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeouts {
    pub triage: Duration,
    pub context_fetch: Duration,
    pub reply: Duration,
    pub report: Duration,
}

impl RequestTimeouts {
    fn for_kind(&self, kind: RequestKind) -> Duration {
        match kind {
            RequestKind::Triage => self.triage,
            RequestKind::ContextFetch => self.context_fetch,
            RequestKind::Reply => self.reply,
            RequestKind::Report => self.report,
        }
    }
}

/// Registry of outstanding calls, keyed by the opaque request id.
#[derive(Debug, Default)]
pub struct PendingCalls {
    calls: HashMap<RequestId, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, call: PendingCall) {
        self.calls.insert(call.id, call);
    }

    /// Claim the continuation for a delivered result. Unknown or
    /// already-resolved ids return `None` — not every completion the host
    /// sees belongs to this subsystem.
    pub fn resolve(&mut self, id: RequestId) -> Option<PendingCall> {
        self.calls.remove(&id)
    }

    /// Whether a triage/context pipeline is already outstanding for `key`.
    /// At most one may be in flight per key.
    pub fn has_pipeline(&self, key: &SessionKey) -> bool {
        self.calls.values().any(|call| {
            call.key == *key
                && matches!(call.kind, RequestKind::Triage | RequestKind::ContextFetch)
        })
    }

    /// Remove and return every call whose age exceeds its kind's timeout.
    pub fn sweep_expired(
        &mut self,
        timeouts: &RequestTimeouts,
        now: DateTime<Utc>,
    ) -> Vec<PendingCall> {
        let expired_ids: Vec<RequestId> = self
            .calls
            .values()
            .filter(|call| now - call.created_at >= timeouts.for_kind(call.kind))
            .map(|call| call.id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| self.calls.remove(&id))
            .collect()
    }

    /// Drop every outstanding call for `key`. Called when a session is
    /// removed so a late result cannot resume a dead continuation.
    pub fn purge_key(&mut self, key: &SessionKey) -> usize {
        let before = self.calls.len();
        self.calls.retain(|_, call| call.key != *key);
        before - self.calls.len()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RoomId, UserId};

    fn key() -> SessionKey {
        SessionKey::new(Some(RoomId(3)), UserId(812_345))
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T08:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn timeouts() -> RequestTimeouts {
        RequestTimeouts {
            triage: Duration::seconds(20),
            context_fetch: Duration::seconds(10),
            reply: Duration::seconds(90),
            report: Duration::seconds(120),
        }
    }

    fn call(kind: RequestKind, key: SessionKey, at: DateTime<Utc>) -> PendingCall {
        PendingCall {
            id: RequestId::new(),
            kind,
            key,
            created_at: at,
            payload: RequestPayload::Reply,
        }
    }

    #[test]
    fn resolve_claims_exactly_once() {
        let mut pending = PendingCalls::new();
        let entry = call(RequestKind::Reply, key(), base());
        let id = entry.id;
        pending.insert(entry);

        assert!(pending.resolve(id).is_some());
        assert!(pending.resolve(id).is_none(), "second delivery is not ours");
    }

    #[test]
    fn unknown_id_resolves_to_none() {
        let mut pending = PendingCalls::new();
        assert!(pending.resolve(RequestId::new()).is_none());
    }

    #[test]
    fn pipeline_check_covers_triage_and_context_only() {
        let mut pending = PendingCalls::new();
        pending.insert(call(RequestKind::Reply, key(), base()));
        assert!(!pending.has_pipeline(&key()));

        pending.insert(call(RequestKind::Triage, key(), base()));
        assert!(pending.has_pipeline(&key()));

        let other = SessionKey::new(None, UserId(999_999));
        assert!(!pending.has_pipeline(&other));
    }

    #[test]
    fn sweep_applies_kind_specific_timeouts() {
        let mut pending = PendingCalls::new();
        pending.insert(call(RequestKind::Triage, key(), base()));
        pending.insert(call(RequestKind::Reply, key(), base()));

        // 30s in: triage (20s) is out, reply (90s) is not.
        let expired = pending.sweep_expired(&timeouts(), base() + Duration::seconds(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].kind, RequestKind::Triage);
        assert_eq!(pending.len(), 1);

        let expired = pending.sweep_expired(&timeouts(), base() + Duration::seconds(90));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].kind, RequestKind::Reply);
        assert!(pending.is_empty());
    }

    #[test]
    fn sweep_leaves_fresh_calls_alone() {
        let mut pending = PendingCalls::new();
        pending.insert(call(RequestKind::Report, key(), base()));
        let expired = pending.sweep_expired(&timeouts(), base() + Duration::seconds(119));
        assert!(expired.is_empty());
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn purge_key_drops_only_that_key() {
        let mut pending = PendingCalls::new();
        let other = SessionKey::new(None, UserId(31_337_000));
        pending.insert(call(RequestKind::Reply, key(), base()));
        pending.insert(call(RequestKind::Triage, key(), base()));
        pending.insert(call(RequestKind::Reply, other, base()));

        assert_eq!(pending.purge_key(&key()), 2);
        assert_eq!(pending.len(), 1);
        assert!(!pending.has_pipeline(&key()));
    }
}
