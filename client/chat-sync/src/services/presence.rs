use crate::models::{ChatUser, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Online flag plus last-seen. Unknown users read as offline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct TypingIndicator {
    user_id: UserId,
    label: String,
    expires_at: Instant,
}

/// Per-user presence and the single visible typing label
#[derive(Debug)]
pub struct PresenceTracker {
    local_user: UserId,
    records: HashMap<UserId, PresenceRecord>,
    typing: Option<TypingIndicator>,
    typing_ttl: Duration,
}

impl PresenceTracker {
    pub fn new(local_user: impl Into<UserId>, typing_ttl: Duration) -> Self {
        Self {
            local_user: local_user.into(),
            records: HashMap::new(),
            typing: None,
            typing_ttl,
        }
    }

    /// Upsert; a missing last-seen keeps the previous one
    pub fn update_presence(
        &mut self,
        user_id: &str,
        online: bool,
        last_seen_at: Option<DateTime<Utc>>,
    ) -> &PresenceRecord {
        let record = self.records.entry(user_id.to_string()).or_default();
        record.online = online;
        if last_seen_at.is_some() {
            record.last_seen_at = last_seen_at;
        }
        trace!(%user_id, online, "presence updated");
        record
    }

    pub fn seed<'a>(&mut self, users: impl IntoIterator<Item = &'a ChatUser>) {
        for user in users {
            self.update_presence(&user.id, user.is_online, user.last_seen_at);
        }
    }

    pub fn presence(&self, user_id: &str) -> PresenceRecord {
        self.records.get(user_id).cloned().unwrap_or_default()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.records.get(user_id).map_or(false, |r| r.online)
    }

    /// Shows `label` for `sender_id` and rearms the expiry.
    /// Returns `false` for the local user's own echo.
    pub fn on_typing_event(&mut self, sender_id: &str, label: impl Into<String>, now: Instant) -> bool {
        if sender_id == self.local_user {
            return false;
        }
        self.typing = Some(TypingIndicator {
            user_id: sender_id.to_string(),
            label: label.into(),
            expires_at: now + self.typing_ttl,
        });
        true
    }

    pub fn typing_label(&self, now: Instant) -> Option<&str> {
        self.typing
            .as_ref()
            .filter(|t| now < t.expires_at)
            .map(|t| t.label.as_str())
    }

    pub fn typing_user(&self, now: Instant) -> Option<&str> {
        self.typing
            .as_ref()
            .filter(|t| now < t.expires_at)
            .map(|t| t.user_id.as_str())
    }

    /// Drops an expired label. Returns `true` when one was cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match &self.typing {
            Some(t) if now >= t.expires_at => {
                self.typing = None;
                true
            }
            _ => false,
        }
    }

    /// When the driver should call [`expire`](Self::expire) next
    pub fn next_expiry(&self) -> Option<Instant> {
        self.typing.as_ref().map(|t| t.expires_at)
    }
}

/// Limits outbound `chat:typing` to one per interval
#[derive(Debug)]
pub struct TypingThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl TypingThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TTL: Duration = Duration::from_millis(1500);

    #[test]
    fn test_typing_expires_after_ttl() {
        let mut tracker = PresenceTracker::new("me", TTL);
        let t0 = Instant::now();

        assert!(tracker.on_typing_event("teacher-1", "Ms. Rao is typing", t0));
        assert_eq!(tracker.typing_label(t0 + Duration::from_millis(1499)), Some("Ms. Rao is typing"));
        assert_eq!(tracker.typing_label(t0 + TTL), None);

        assert!(!tracker.expire(t0 + Duration::from_millis(1000)));
        assert!(tracker.expire(t0 + Duration::from_millis(1501)));
        assert!(tracker.next_expiry().is_none());
    }

    #[test]
    fn test_renewal_extends_and_latest_wins() {
        let mut tracker = PresenceTracker::new("me", TTL);
        let t0 = Instant::now();

        tracker.on_typing_event("a", "A is typing", t0);
        tracker.on_typing_event("b", "B is typing", t0 + Duration::from_millis(1000));

        let later = t0 + Duration::from_millis(2000);
        assert_eq!(tracker.typing_label(later), Some("B is typing"));
        assert_eq!(tracker.typing_user(later), Some("b"));
        assert_eq!(tracker.next_expiry(), Some(t0 + Duration::from_millis(2500)));
    }

    #[test]
    fn test_own_typing_echo_ignored() {
        let mut tracker = PresenceTracker::new("me", TTL);
        let t0 = Instant::now();

        assert!(!tracker.on_typing_event("me", "Me", t0));
        assert!(tracker.typing_label(t0).is_none());
    }

    #[test]
    fn test_presence_keeps_last_seen_when_missing() {
        let mut tracker = PresenceTracker::new("me", TTL);
        let seen = Utc.with_ymd_and_hms(2024, 3, 13, 9, 0, 0).unwrap();

        assert!(!tracker.is_online("s1"));
        tracker.update_presence("s1", false, Some(seen));
        tracker.update_presence("s1", true, None);

        let record = tracker.presence("s1");
        assert!(record.online);
        assert_eq!(record.last_seen_at, Some(seen));
    }

    #[test]
    fn test_seed_from_user_list() {
        let mut tracker = PresenceTracker::new("me", TTL);
        let users = vec![
            ChatUser {
                id: "s1".into(),
                name: "Asha".into(),
                role: Some("student".into()),
                is_online: true,
                last_seen_at: None,
            },
            ChatUser {
                id: "s2".into(),
                name: "Ravi".into(),
                role: None,
                is_online: false,
                last_seen_at: None,
            },
        ];

        tracker.seed(&users);
        assert!(tracker.is_online("s1"));
        assert!(!tracker.is_online("s2"));
    }

    #[test]
    fn test_throttle_one_per_interval() {
        let mut throttle = TypingThrottle::new(Duration::from_millis(800));
        let t0 = Instant::now();

        assert!(throttle.should_emit(t0));
        assert!(!throttle.should_emit(t0 + Duration::from_millis(100)));
        assert!(!throttle.should_emit(t0 + Duration::from_millis(799)));
        assert!(throttle.should_emit(t0 + Duration::from_millis(800)));
        assert!(!throttle.should_emit(t0 + Duration::from_millis(1200)));
    }
}
