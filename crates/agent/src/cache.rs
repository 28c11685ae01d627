//! Response Cache
//!
//! Pure key-value contract over a [`CacheStore`]: the caller normalizes trigger keys,
//! storing under an existing key is a no-op, and hits are counted separately.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use companion_config::CachePreloadEntry;
use companion_core::{CacheEntry, CacheStore, Result};

/// Process-local cache store
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, trigger_key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.get(trigger_key).map(|e| e.value().clone()))
    }

    async fn insert_if_absent(&self, entry: CacheEntry) -> Result<bool> {
        match self.entries.entry(entry.trigger_key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(true)
            }
        }
    }

    async fn increment_hits(&self, trigger_key: &str) -> Result<Option<u64>> {
        // Shard write lock covers the read-modify-write
        Ok(self.entries.get_mut(trigger_key).map(|mut e| {
            e.hit_count += 1;
            e.hit_count
        }))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()))
    }

    /// Pure read; does not count a hit
    pub async fn lookup(&self, trigger_key: &str) -> Result<Option<CacheEntry>> {
        if trigger_key.is_empty() {
            return Ok(None);
        }
        self.store.get(trigger_key).await
    }

    /// Store an entry; returns `false` if the key already existed
    pub async fn store(&self, entry: CacheEntry) -> Result<bool> {
        let key = entry.trigger_key.clone();
        let stored = self.store.insert_if_absent(entry).await?;
        if stored {
            tracing::info!(trigger_key = %key, "Cached response");
        } else {
            tracing::debug!(trigger_key = %key, "Cache entry exists, store ignored");
        }
        Ok(stored)
    }

    pub async fn record_hit(&self, trigger_key: &str) -> Result<Option<u64>> {
        let hits = self.store.increment_hits(trigger_key).await?;
        metrics::counter!("cache_hits_total").increment(1);
        Ok(hits)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    /// Insert configured entries; existing keys are left untouched
    pub async fn preload(&self, entries: &[CachePreloadEntry]) -> Result<usize> {
        let mut inserted = 0;
        for entry in entries {
            let stored = self
                .store
                .insert_if_absent(CacheEntry::new(
                    entry.trigger_key.clone(),
                    entry.audio_ref.clone(),
                    entry.text.clone(),
                ))
                .await?;
            if stored {
                inserted += 1;
            }
        }
        tracing::info!(inserted, configured = entries.len(), "Preloaded response cache");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let cache = ResponseCache::in_memory();
        assert!(cache
            .store(CacheEntry::new("hi_meilin", "a.mp3", "Em đây!"))
            .await
            .unwrap());
        assert!(!cache
            .store(CacheEntry::new("hi_meilin", "b.mp3", "Dạ?"))
            .await
            .unwrap());

        let entry = cache.lookup("hi_meilin").await.unwrap().unwrap();
        assert_eq!(entry.audio_ref, "a.mp3");
        assert_eq!(cache.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lookup_is_pure_and_hits_are_counted() {
        let cache = ResponseCache::in_memory();
        cache
            .store(CacheEntry::new("hi_meilin", "a.mp3", "Em đây!"))
            .await
            .unwrap();

        cache.lookup("hi_meilin").await.unwrap();
        assert_eq!(cache.lookup("hi_meilin").await.unwrap().unwrap().hit_count, 0);

        assert_eq!(cache.record_hit("hi_meilin").await.unwrap(), Some(1));
        assert_eq!(cache.record_hit("hi_meilin").await.unwrap(), Some(2));
        assert_eq!(cache.record_hit("unknown").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_hits() {
        let cache = Arc::new(ResponseCache::in_memory());
        cache
            .store(CacheEntry::new("hi_meilin", "a.mp3", "Em đây!"))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.record_hit("hi_meilin").await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let entry = cache.lookup("hi_meilin").await.unwrap().unwrap();
        assert_eq!(entry.hit_count, 50);
    }

    #[tokio::test]
    async fn test_preload_skips_existing() {
        let cache = ResponseCache::in_memory();
        cache
            .store(CacheEntry::new("hi_meilin", "generated.mp3", "Em đây!"))
            .await
            .unwrap();

        let preload = vec![
            CachePreloadEntry {
                trigger_key: "hi_meilin".to_string(),
                text: "Dạ!".to_string(),
                audio_ref: "wake.mp3".to_string(),
            },
            CachePreloadEntry {
                trigger_key: "chao_meilin".to_string(),
                text: "Chào bạn!".to_string(),
                audio_ref: "hello.mp3".to_string(),
            },
        ];
        assert_eq!(cache.preload(&preload).await.unwrap(), 1);
        assert_eq!(
            cache.lookup("hi_meilin").await.unwrap().unwrap().audio_ref,
            "generated.mp3"
        );
    }

    #[tokio::test]
    async fn test_empty_key_misses() {
        let cache = ResponseCache::in_memory();
        assert!(cache.lookup("").await.unwrap().is_none());
    }
}
