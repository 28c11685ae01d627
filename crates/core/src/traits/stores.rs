//! State store traits

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::conversation::ConversationTurn;
use crate::identity::Identity;
use crate::provider::AudioClip;
use crate::Result;

/// Identity records and their bounded conversation sequences
#[async_trait]
pub trait ProfileStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> Result<Option<Identity>>;

    /// Insert or replace an identity record
    async fn put(&self, identity: &Identity) -> Result<()>;

    /// The last `limit` turns for `id`, oldest first
    async fn recent_turns(&self, id: &str, limit: usize) -> Result<Vec<ConversationTurn>>;

    /// Append turns in order, assigning sequence numbers, then evict the oldest
    /// entries so that at most `window` remain. Returns the appended turns.
    async fn append_turns(
        &self,
        id: &str,
        turns: Vec<ConversationTurn>,
        window: usize,
    ) -> Result<Vec<ConversationTurn>>;

    /// Whether state is shared across processes
    fn is_distributed(&self) -> bool {
        false
    }
}

/// Key-value storage behind the response cache; performs no normalization
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, trigger_key: &str) -> Result<Option<CacheEntry>>;

    /// Store if the key is absent. First writer wins; returns `false` when the
    /// key already existed and nothing was written.
    async fn insert_if_absent(&self, entry: CacheEntry) -> Result<bool>;

    /// Increment and return the hit count; `None` if the key is unknown
    async fn increment_hits(&self, trigger_key: &str) -> Result<Option<u64>>;

    async fn len(&self) -> Result<usize>;
}

/// Storage for synthesized audio
#[async_trait]
pub trait ArtifactStore: Send + Sync + 'static {
    /// Persist a clip and return its reference
    async fn put(&self, clip: &AudioClip) -> Result<String>;

    async fn get(&self, audio_ref: &str) -> Result<Option<AudioClip>>;
}
