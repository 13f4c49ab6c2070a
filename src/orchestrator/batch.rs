//! Per-key accumulation of rapid-fire messages.
//!
//! Messages that arrive while no session is active are buffered here and
//! merged into a single evidence block before the engage decision is made.
//! Due-ness is only ever checked from the tick path — the message path does
//! no timer work.

use crate::SessionKey;

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

/// Absolute per-key queue bound. Flushes normally keep queues far below
/// this; it only bites when a key spams while a pipeline is outstanding and
/// flushes are being skipped. Overflow drops the oldest fragment, loudly.
const MAX_QUEUED_PER_KEY: usize = 64;

/// One buffered message fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub at: DateTime<Utc>,
    pub text: String,
    pub mentioned: bool,
}

/// A flushed batch, ready to become a triage call.
#[derive(Debug, Clone)]
pub struct BatchPayload {
    /// Whether any flushed item mentioned the assistant.
    pub any_mentioned: bool,
    /// The flushed items themselves, kept for re-queueing and for seeding
    /// the session transcript.
    pub items: Vec<BatchItem>,
}

impl BatchPayload {
    /// Numbered, newline-joined merge of the flushed items.
    pub fn evidence(&self) -> String {
        render_evidence(&self.items)
    }
}

/// Merge fragments into the numbered block the triage prompt consumes.
pub fn render_evidence(items: &[BatchItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{}. {}", index + 1, item.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default)]
struct Batch {
    items: VecDeque<BatchItem>,
}

/// Accumulates message fragments per key until they are merged into one
/// triage payload.
#[derive(Debug, Default)]
pub struct MessageBatcher {
    batches: HashMap<SessionKey, Batch>,
}

impl MessageBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment. Returns the new item count so the caller can apply
    /// the overflow valve.
    pub fn offer(&mut self, key: SessionKey, item: BatchItem) -> usize {
        let batch = self.batches.entry(key).or_default();
        batch.items.push_back(item);
        if batch.items.len() > MAX_QUEUED_PER_KEY {
            batch.items.pop_front();
            tracing::warn!(key = %key, "batch queue bound hit, oldest fragment dropped");
        }
        batch.items.len()
    }

    /// Whether the batch for `key` is due: idle since the last item, or the
    /// first item has aged past the window (the absolute-age fallback for a
    /// key that never goes quiet).
    pub fn is_due(&self, key: &SessionKey, merge_window: Duration, now: DateTime<Utc>) -> bool {
        let Some(batch) = self.batches.get(key) else {
            return false;
        };
        let (Some(first), Some(last)) = (batch.items.front(), batch.items.back()) else {
            return false;
        };
        now - last.at >= merge_window || now - first.at >= merge_window
    }

    /// Keys whose batches are due at `now`. Called from the reaper only.
    pub fn due_keys(&self, merge_window: Duration, now: DateTime<Utc>) -> Vec<SessionKey> {
        self.batches
            .keys()
            .filter(|key| self.is_due(key, merge_window, now))
            .copied()
            .collect()
    }

    /// Drain up to `cap` items into a payload. Items past the cap stay
    /// queued for the next flush. Returns `None` for an empty batch.
    pub fn take_payload(&mut self, key: &SessionKey, cap: usize) -> Option<BatchPayload> {
        let batch = self.batches.get_mut(key)?;
        if batch.items.is_empty() {
            return None;
        }
        let take = batch.items.len().min(cap);
        let items: Vec<BatchItem> = batch.items.drain(..take).collect();
        if batch.items.is_empty() {
            self.batches.remove(key);
        }

        let any_mentioned = items.iter().any(|item| item.mentioned);
        Some(BatchPayload {
            any_mentioned,
            items,
        })
    }

    /// Return un-issued items to the front of the queue, preserving order.
    /// Used when a flush finds a pipeline already outstanding, and when a
    /// triage call fails and should be retried on the next due cycle.
    pub fn requeue_front(&mut self, key: SessionKey, items: Vec<BatchItem>) {
        if items.is_empty() {
            return;
        }
        let batch = self.batches.entry(key).or_default();
        for item in items.into_iter().rev() {
            batch.items.push_front(item);
        }
    }

    /// Take everything queued for `key`, in order. Used when a session is
    /// created and the fragments that raced the triage call are appended to
    /// its transcript.
    pub fn drain_all(&mut self, key: &SessionKey) -> Vec<BatchItem> {
        self.batches
            .remove(key)
            .map(|batch| batch.items.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &SessionKey) -> usize {
        self.batches.get(key).map_or(0, |batch| batch.items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RoomId, UserId};

    fn key() -> SessionKey {
        SessionKey::new(Some(RoomId(1)), UserId(900_001))
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T12:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn item(at: DateTime<Utc>, text: &str) -> BatchItem {
        BatchItem {
            at,
            text: text.into(),
            mentioned: false,
        }
    }

    // -----------------------------------------------------------------------
    // due-ness
    // -----------------------------------------------------------------------

    #[test]
    fn empty_batcher_is_never_due() {
        let batcher = MessageBatcher::new();
        assert!(!batcher.is_due(&key(), Duration::seconds(5), base()));
    }

    #[test]
    fn batch_is_due_after_idle_window() {
        let mut batcher = MessageBatcher::new();
        batcher.offer(key(), item(base(), "hello"));

        let window = Duration::seconds(5);
        assert!(!batcher.is_due(&key(), window, base() + Duration::seconds(4)));
        assert!(batcher.is_due(&key(), window, base() + Duration::seconds(5)));
    }

    #[test]
    fn continuous_typing_hits_the_absolute_age_fallback() {
        let mut batcher = MessageBatcher::new();
        // A new fragment every 2s keeps resetting the idle clock.
        for step in 0..3 {
            batcher.offer(
                key(),
                item(base() + Duration::seconds(step * 2), "still typing"),
            );
        }

        let window = Duration::seconds(5);
        // Idle condition not met (last item 1s ago), but the first item is 5s old.
        assert!(batcher.is_due(&key(), window, base() + Duration::seconds(5)));
    }

    #[test]
    fn due_keys_lists_only_due_batches() {
        let mut batcher = MessageBatcher::new();
        let quiet = SessionKey::new(None, UserId(900_002));
        batcher.offer(key(), item(base(), "old"));
        batcher.offer(quiet, item(base() + Duration::seconds(9), "fresh"));

        let due = batcher.due_keys(Duration::seconds(5), base() + Duration::seconds(10));
        assert_eq!(due, vec![key()]);
    }

    // -----------------------------------------------------------------------
    // take_payload
    // -----------------------------------------------------------------------

    #[test]
    fn payload_is_numbered_and_newline_joined() {
        let mut batcher = MessageBatcher::new();
        batcher.offer(key(), item(base(), "first line"));
        batcher.offer(key(), item(base() + Duration::seconds(1), "second line"));

        let payload = batcher.take_payload(&key(), 10).expect("payload");
        assert_eq!(payload.evidence(), "1. first line\n2. second line");
        assert!(!payload.any_mentioned);
        assert_eq!(payload.items.len(), 2);
        assert!(batcher.is_empty());
    }

    #[test]
    fn payload_carries_the_mention_flag() {
        let mut batcher = MessageBatcher::new();
        batcher.offer(
            key(),
            BatchItem {
                at: base(),
                text: "@assistant help".into(),
                mentioned: true,
            },
        );
        let payload = batcher.take_payload(&key(), 10).expect("payload");
        assert!(payload.any_mentioned);
    }

    #[test]
    fn overflow_items_stay_queued_past_the_cap() {
        let mut batcher = MessageBatcher::new();
        for index in 0..7 {
            batcher.offer(key(), item(base() + Duration::seconds(index), &format!("m{index}")));
        }

        let payload = batcher.take_payload(&key(), 5).expect("payload");
        assert_eq!(payload.items.len(), 5);
        assert_eq!(batcher.len(&key()), 2);

        let rest = batcher.take_payload(&key(), 5).expect("rest");
        assert_eq!(rest.evidence(), "1. m5\n2. m6");
    }

    #[test]
    fn take_payload_on_empty_key_is_none() {
        let mut batcher = MessageBatcher::new();
        assert!(batcher.take_payload(&key(), 5).is_none());
    }

    // -----------------------------------------------------------------------
    // requeue / drain
    // -----------------------------------------------------------------------

    #[test]
    fn requeue_front_restores_original_order() {
        let mut batcher = MessageBatcher::new();
        batcher.offer(key(), item(base(), "a"));
        batcher.offer(key(), item(base() + Duration::seconds(1), "b"));
        let payload = batcher.take_payload(&key(), 10).expect("payload");

        // A later fragment arrived while the payload was out.
        batcher.offer(key(), item(base() + Duration::seconds(2), "c"));
        batcher.requeue_front(key(), payload.items);

        let merged = batcher.take_payload(&key(), 10).expect("merged");
        assert_eq!(merged.evidence(), "1. a\n2. b\n3. c");
    }

    #[test]
    fn no_item_is_lost_across_flush_and_requeue() {
        let mut batcher = MessageBatcher::new();
        for index in 0..4 {
            batcher.offer(key(), item(base() + Duration::seconds(index), &format!("m{index}")));
        }
        let payload = batcher.take_payload(&key(), 3).expect("payload");
        batcher.requeue_front(key(), payload.items);

        let drained = batcher.drain_all(&key());
        let texts: Vec<&str> = drained.iter().map(|item| item.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1", "m2", "m3"]);
    }

    #[test]
    fn queue_bound_drops_the_oldest_fragment() {
        let mut batcher = MessageBatcher::new();
        for index in 0..(MAX_QUEUED_PER_KEY + 5) {
            batcher.offer(key(), item(base() + Duration::seconds(index as i64), &format!("m{index}")));
        }
        assert_eq!(batcher.len(&key()), MAX_QUEUED_PER_KEY);

        let drained = batcher.drain_all(&key());
        assert_eq!(drained[0].text, "m5", "oldest fragments were dropped first");
    }

    #[test]
    fn drain_all_empties_the_key() {
        let mut batcher = MessageBatcher::new();
        batcher.offer(key(), item(base(), "only"));
        assert_eq!(batcher.drain_all(&key()).len(), 1);
        assert!(batcher.drain_all(&key()).is_empty());
        assert!(batcher.is_empty());
    }
}
