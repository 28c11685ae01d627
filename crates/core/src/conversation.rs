//! Conversation turn types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(TurnRole::User),
            "agent" => Some(TurnRole::Agent),
            _ => None,
        }
    }
}

/// One entry of an identity's ordered conversation sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub identity_id: String,
    /// Position in the identity's sequence, strictly increasing
    pub sequence: u64,
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        identity_id: impl Into<String>,
        role: TurnRole,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identity_id: identity_id.into(),
            sequence: 0,
            role,
            text: text.into(),
            timestamp,
        }
    }
}

/// Evict oldest turns until `turns.len() <= window`
pub fn trim_to_window(turns: &mut VecDeque<ConversationTurn>, window: usize) {
    while turns.len() > window {
        turns.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_to_window() {
        let now = Utc::now();
        let mut turns: VecDeque<_> = (0..5)
            .map(|i| {
                let mut t = ConversationTurn::new("u", TurnRole::User, format!("m{i}"), now);
                t.sequence = i;
                t
            })
            .collect();

        trim_to_window(&mut turns, 3);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns.front().map(|t| t.sequence), Some(2));

        trim_to_window(&mut turns, 10);
        assert_eq!(turns.len(), 3);
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(TurnRole::parse(TurnRole::Agent.as_str()), Some(TurnRole::Agent));
        assert_eq!(TurnRole::parse("system"), None);
    }
}
