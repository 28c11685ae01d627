//! Per-identity profile state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stable external user reference the pipeline accumulates state against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable external key (platform user id)
    pub id: String,
    /// Name shown by the platform; never used to infer pronouns
    pub display_name: String,
    /// Address term used when speaking to this identity
    pub pronoun: String,
    /// Whether this identity is the companion's owner
    pub is_owner: bool,
    /// Role tags used to filter knowledge retrieval
    #[serde(default)]
    pub role_tags: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of turns received from this identity
    pub message_count: u64,
}

impl Identity {
    /// Create a fresh identity first seen at `now`
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        pronoun: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            pronoun: pronoun.into(),
            is_owner: false,
            role_tags: BTreeSet::new(),
            first_seen: now,
            last_seen: now,
            message_count: 0,
        }
    }

    /// Mark as owner; owners carry the `owner` role tag
    pub fn with_owner(mut self, is_owner: bool) -> Self {
        self.is_owner = is_owner;
        if is_owner {
            self.role_tags.insert("owner".to_string());
        }
        self
    }

    /// True until the first turn has been recorded
    pub fn is_first_meeting(&self) -> bool {
        self.message_count == 0
    }

    /// Record an incoming message
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
        self.message_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touch_updates_counters() {
        let t0 = Utc::now();
        let mut identity = Identity::new("u1", "Lan", "bạn", t0);
        assert!(identity.is_first_meeting());

        let t1 = t0 + chrono::Duration::seconds(5);
        identity.touch(t1);
        assert_eq!(identity.message_count, 1);
        assert_eq!(identity.last_seen, t1);
        assert_eq!(identity.first_seen, t0);
        assert!(!identity.is_first_meeting());
    }

    #[test]
    fn test_owner_role_tag() {
        let identity = Identity::new("owner", "Boss", "anh", Utc::now()).with_owner(true);
        assert!(identity.is_owner);
        assert!(identity.role_tags.contains("owner"));
    }
}
