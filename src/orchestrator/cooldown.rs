//! Post-session quiet periods.
//!
//! When a dialogue ends — however it ends — its key goes on cooldown so the
//! next burst of messages from the same person in the same room does not
//! immediately re-trigger triage. Cooldown is measured from session end,
//! never from session start, and is never consulted for turns inside an
//! already-active session.

use crate::SessionKey;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Tracks when each key's last session ended.
#[derive(Debug, Default)]
pub struct CooldownManager {
    ended: HashMap<SessionKey, DateTime<Utc>>,
}

impl CooldownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a session for `key` just ended.
    pub fn record_end(&mut self, key: SessionKey, now: DateTime<Utc>) {
        self.ended.insert(key, now);
    }

    /// Whether `key` is still inside its quiet period.
    pub fn is_cooling(&self, key: &SessionKey, window: Duration, now: DateTime<Utc>) -> bool {
        self.ended
            .get(key)
            .is_some_and(|ended_at| now - *ended_at < window)
    }

    /// Drop entries whose quiet period has fully elapsed. They can never
    /// suppress anything again.
    pub fn cleanup_expired(&mut self, window: Duration, now: DateTime<Utc>) {
        self.ended.retain(|_, ended_at| now - *ended_at < window);
    }

    pub fn len(&self) -> usize {
        self.ended.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ended.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RoomId, UserId};

    fn key() -> SessionKey {
        SessionKey::new(Some(RoomId(12)), UserId(4_200_042))
    }

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T10:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    #[test]
    fn unknown_key_is_not_cooling() {
        let cooldowns = CooldownManager::new();
        assert!(!cooldowns.is_cooling(&key(), Duration::seconds(600), base()));
    }

    #[test]
    fn key_cools_for_exactly_the_window() {
        let mut cooldowns = CooldownManager::new();
        cooldowns.record_end(key(), base());

        let window = Duration::seconds(600);
        assert!(cooldowns.is_cooling(&key(), window, base()));
        assert!(cooldowns.is_cooling(&key(), window, base() + Duration::seconds(599)));
        assert!(!cooldowns.is_cooling(&key(), window, base() + Duration::seconds(600)));
    }

    #[test]
    fn a_new_end_restarts_the_window() {
        let mut cooldowns = CooldownManager::new();
        cooldowns.record_end(key(), base());
        cooldowns.record_end(key(), base() + Duration::seconds(500));

        let window = Duration::seconds(600);
        // 900s after the first end, but only 400s after the second.
        assert!(cooldowns.is_cooling(&key(), window, base() + Duration::seconds(900)));
    }

    #[test]
    fn cleanup_drops_only_expired_entries() {
        let mut cooldowns = CooldownManager::new();
        let fresh = SessionKey::new(None, UserId(7_700_077));
        cooldowns.record_end(key(), base());
        cooldowns.record_end(fresh, base() + Duration::seconds(580));

        cooldowns.cleanup_expired(Duration::seconds(600), base() + Duration::seconds(610));
        assert_eq!(cooldowns.len(), 1);
        assert!(cooldowns.is_cooling(
            &fresh,
            Duration::seconds(600),
            base() + Duration::seconds(610)
        ));
    }
}
