//! User Profile Store glue
//!
//! [`InMemoryProfileStore`] is the single-process store; [`ProfileManager`] applies the
//! per-turn identity rules (creation, owner flag, explicit pronoun confirmation) on top
//! of any [`ProfileStore`].

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use companion_config::{ConversationConfig, PersonaConfig, PronounRule};
use companion_core::{
    trim_to_window, Clock, ConversationTurn, Error, Identity, ProfileStore, Result, TurnRole,
};

use crate::text::contains_phrase;

#[derive(Default)]
struct History {
    next_sequence: u64,
    turns: VecDeque<ConversationTurn>,
}

/// Process-local profile store
#[derive(Default)]
pub struct InMemoryProfileStore {
    identities: DashMap<String, Identity>,
    histories: DashMap<String, History>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get(&self, id: &str) -> Result<Option<Identity>> {
        Ok(self.identities.get(id).map(|i| i.value().clone()))
    }

    async fn put(&self, identity: &Identity) -> Result<()> {
        self.identities.insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn recent_turns(&self, id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        Ok(self
            .histories
            .get(id)
            .map(|h| {
                let skip = h.turns.len().saturating_sub(limit);
                h.turns.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn append_turns(
        &self,
        id: &str,
        turns: Vec<ConversationTurn>,
        window: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let mut history = self.histories.entry(id.to_string()).or_default();
        let mut appended = Vec::with_capacity(turns.len());

        for mut turn in turns {
            turn.identity_id = id.to_string();
            turn.sequence = history.next_sequence;
            history.next_sequence += 1;
            history.turns.push_back(turn.clone());
            appended.push(turn);
        }

        trim_to_window(&mut history.turns, window);
        Ok(appended)
    }
}

/// Identity for the current turn
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    /// Record after this turn's counters were applied
    pub identity: Identity,
    /// No earlier message was ever received from this identity
    pub first_meeting: bool,
}

/// Default bound on a single profile store call
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct ProfileManager {
    store: Arc<dyn ProfileStore>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    owner_ids: HashSet<String>,
    pronoun_rules: Vec<PronounRule>,
    default_pronoun: String,
    window: usize,
}

impl ProfileManager {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
        conversation: &ConversationConfig,
        persona: &PersonaConfig,
    ) -> Self {
        Self {
            store,
            timeout: DEFAULT_STORE_TIMEOUT,
            clock,
            owner_ids: conversation.owner_ids.iter().cloned().collect(),
            pronoun_rules: conversation.pronoun_rules.clone(),
            default_pronoun: persona.pronouns.default_other.clone(),
            window: conversation.window_size,
        }
    }

    /// Bound every store call; an elapsed call fails as `ProfileStoreUnavailable`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    async fn bounded<T>(
        &self,
        op: &str,
        id: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    identity = %id,
                    op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Profile store call timed out"
                );
                Err(Error::ProfileStoreUnavailable(format!(
                    "{} for {} timed out after {}ms",
                    op,
                    id,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    pub fn is_owner(&self, id: &str) -> bool {
        self.owner_ids.contains(id)
    }

    /// Address term explicitly stated in `text`, if any
    pub fn detect_pronoun(&self, text: &str) -> Option<&str> {
        self.pronoun_rules
            .iter()
            .find(|rule| rule.phrases.iter().any(|p| contains_phrase(text, p)))
            .map(|rule| rule.pronoun.as_str())
    }

    /// Load or create the identity, record the incoming message and persist it
    pub async fn resolve(
        &self,
        id: &str,
        display_name: Option<&str>,
        message: &str,
    ) -> Result<ResolvedIdentity> {
        let now = self.clock.now();

        let mut identity = match self.bounded("get", id, self.store.get(id)).await? {
            Some(existing) => existing,
            None => {
                tracing::info!(identity = %id, "New identity");
                Identity::new(id, display_name.unwrap_or(id), self.default_pronoun.clone(), now)
            }
        };

        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            identity.display_name = name.to_string();
        }

        if self.is_owner(id) && !identity.is_owner {
            identity = identity.with_owner(true);
        }

        if let Some(pronoun) = self.detect_pronoun(message) {
            if identity.pronoun != pronoun {
                tracing::info!(identity = %id, pronoun = %pronoun, "Pronoun confirmed");
                identity.pronoun = pronoun.to_string();
            }
        }

        let first_meeting = identity.is_first_meeting();
        identity.touch(now);
        self.bounded("put", id, self.store.put(&identity)).await?;

        Ok(ResolvedIdentity {
            identity,
            first_meeting,
        })
    }

    /// Last `limit` turns, oldest first
    pub async fn history(&self, id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        self.bounded("recent_turns", id, self.store.recent_turns(id, limit.min(self.window)))
            .await
    }

    /// Append the user message and the reply as one ordered pair
    pub async fn record_exchange(
        &self,
        id: &str,
        user_text: &str,
        agent_text: &str,
    ) -> Result<Vec<ConversationTurn>> {
        let now = self.clock.now();
        let turns = vec![
            ConversationTurn::new(id, TurnRole::User, user_text, now),
            ConversationTurn::new(id, TurnRole::Agent, agent_text, now),
        ];
        self.bounded("append_turns", id, self.store.append_turns(id, turns, self.window))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_core::ManualClock;

    fn manager(owner: Option<&str>, window: usize) -> ProfileManager {
        let conversation = ConversationConfig {
            owner_ids: owner.map(|o| vec![o.to_string()]).unwrap_or_default(),
            window_size: window,
            ..Default::default()
        };
        ProfileManager::new(
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(ManualClock::default()),
            &conversation,
            &PersonaConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_resolve_creates_then_updates() {
        let profiles = manager(None, 20);

        let first = profiles.resolve("u1", Some("Lan"), "Xin chào").await.unwrap();
        assert!(first.first_meeting);
        assert_eq!(first.identity.message_count, 1);
        assert_eq!(first.identity.pronoun, "bạn");

        let second = profiles.resolve("u1", None, "Em khỏe không").await.unwrap();
        assert!(!second.first_meeting);
        assert_eq!(second.identity.message_count, 2);
        assert_eq!(second.identity.display_name, "Lan");
    }

    #[tokio::test]
    async fn test_pronoun_only_from_explicit_statement() {
        let profiles = manager(None, 20);

        // A feminine-sounding name alone changes nothing
        let resolved = profiles.resolve("u2", Some("Thu Hà"), "Chào em").await.unwrap();
        assert_eq!(resolved.identity.pronoun, "bạn");

        let resolved = profiles
            .resolve("u2", None, "Nói cho em biết, tôi là nữ nha")
            .await
            .unwrap();
        assert_eq!(resolved.identity.pronoun, "chị");

        // Sticks on later turns
        let resolved = profiles.resolve("u2", None, "Hôm nay trời đẹp").await.unwrap();
        assert_eq!(resolved.identity.pronoun, "chị");
    }

    #[tokio::test]
    async fn test_owner_flag() {
        let profiles = manager(Some("boss"), 20);
        let resolved = profiles.resolve("boss", Some("Định"), "Hi").await.unwrap();
        assert!(resolved.identity.is_owner);
        assert!(resolved.identity.role_tags.contains("owner"));

        let other = profiles.resolve("guest", None, "Hi").await.unwrap();
        assert!(!other.identity.is_owner);
    }

    #[tokio::test]
    async fn test_history_window() {
        let profiles = manager(None, 4);
        for i in 0..5 {
            profiles
                .record_exchange("u3", &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        let turns = profiles.store().recent_turns("u3", 100).await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].text, "q3");
        assert_eq!(turns[3].text, "a4");
        assert_eq!(turns[3].sequence, 9);

        let recent = profiles.history("u3", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].role, TurnRole::User);
    }

    /// Never answers reads; writes go through
    struct StalledStore(InMemoryProfileStore);

    #[async_trait]
    impl ProfileStore for StalledStore {
        async fn get(&self, _id: &str) -> Result<Option<Identity>> {
            std::future::pending().await
        }

        async fn put(&self, identity: &Identity) -> Result<()> {
            self.0.put(identity).await
        }

        async fn recent_turns(&self, _id: &str, _limit: usize) -> Result<Vec<ConversationTurn>> {
            std::future::pending().await
        }

        async fn append_turns(
            &self,
            id: &str,
            turns: Vec<ConversationTurn>,
            window: usize,
        ) -> Result<Vec<ConversationTurn>> {
            self.0.append_turns(id, turns, window).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_store_times_out() {
        let profiles = ProfileManager::new(
            Arc::new(StalledStore(InMemoryProfileStore::new())),
            Arc::new(ManualClock::default()),
            &ConversationConfig::default(),
            &PersonaConfig::default(),
        )
        .with_timeout(Duration::from_millis(50));

        let err = profiles.resolve("u1", None, "Xin chào").await.unwrap_err();
        assert!(matches!(err, Error::ProfileStoreUnavailable(_)));
        assert_eq!(err.code(), "profile_store_unavailable");

        let err = profiles.history("u1", 3).await.unwrap_err();
        assert!(matches!(err, Error::ProfileStoreUnavailable(_)));

        // Writes are unaffected
        assert_eq!(profiles.record_exchange("u1", "q", "a").await.unwrap().len(), 2);
    }
}
