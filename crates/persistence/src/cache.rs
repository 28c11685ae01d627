//! Response cache persistence using ScyllaDB
//!
//! Entries are written with a lightweight transaction so the first writer wins
//! across processes. Hit counts live in a separate counter table.

use async_trait::async_trait;
use scylla::frame::response::result::{CqlValue, Row};
use scylla::frame::value::Counter;

use companion_core::{CacheEntry, CacheStore, Result};

use crate::{PersistenceError, ScyllaClient};

/// ScyllaDB implementation of the cache store
#[derive(Clone)]
pub struct ScyllaCacheStore {
    client: ScyllaClient,
}

impl ScyllaCacheStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn hits(&self, trigger_key: &str) -> std::result::Result<u64, PersistenceError> {
        let query = format!(
            "SELECT hits FROM {}.response_cache_hits WHERE trigger_key = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (trigger_key,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (hits,): (Counter,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(hits.0.max(0) as u64);
            }
        }

        Ok(0)
    }

    async fn entry(&self, trigger_key: &str) -> std::result::Result<Option<CacheEntry>, PersistenceError> {
        let query = format!(
            "SELECT trigger_key, audio_ref, text FROM {}.response_cache WHERE trigger_key = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (trigger_key,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (trigger_key, audio_ref, text): (String, String, String) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(CacheEntry::new(trigger_key, audio_ref, text)));
            }
        }

        Ok(None)
    }

    async fn insert_new(&self, entry: &CacheEntry) -> std::result::Result<bool, PersistenceError> {
        let query = format!(
            "INSERT INTO {}.response_cache (trigger_key, audio_ref, text)
             VALUES (?, ?, ?) IF NOT EXISTS",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (&entry.trigger_key, &entry.audio_ref, &entry.text))
            .await?;

        let row = result
            .rows
            .and_then(|rows| rows.into_iter().next())
            .ok_or_else(|| PersistenceError::InvalidData("LWT returned no rows".to_string()))?;

        applied(&row)
    }

    async fn increment(&self, trigger_key: &str) -> std::result::Result<Option<u64>, PersistenceError> {
        if self.entry(trigger_key).await?.is_none() {
            return Ok(None);
        }

        let query = format!(
            "UPDATE {}.response_cache_hits SET hits = hits + 1 WHERE trigger_key = ?",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(query, (trigger_key,)).await?;

        Ok(Some(self.hits(trigger_key).await?))
    }

    async fn count(&self) -> std::result::Result<usize, PersistenceError> {
        let query = format!("SELECT COUNT(*) FROM {}.response_cache", self.client.keyspace());
        let result = self.client.session().query_unpaged(query, &[]).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (count,): (i64,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(count.max(0) as usize);
            }
        }

        Ok(0)
    }
}

#[async_trait]
impl CacheStore for ScyllaCacheStore {
    async fn get(&self, trigger_key: &str) -> Result<Option<CacheEntry>> {
        let Some(mut entry) = self.entry(trigger_key).await? else {
            return Ok(None);
        };
        entry.hit_count = self.hits(trigger_key).await?;
        Ok(Some(entry))
    }

    async fn insert_if_absent(&self, entry: CacheEntry) -> Result<bool> {
        let inserted = self.insert_new(&entry).await?;
        if !inserted {
            tracing::debug!(trigger_key = %entry.trigger_key, "Cache entry already present");
        }
        Ok(inserted)
    }

    async fn increment_hits(&self, trigger_key: &str) -> Result<Option<u64>> {
        Ok(self.increment(trigger_key).await?)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.count().await?)
    }
}

/// The `[applied]` column of a lightweight transaction result
fn applied(row: &Row) -> std::result::Result<bool, PersistenceError> {
    match row.columns.first() {
        Some(Some(CqlValue::Boolean(applied))) => Ok(*applied),
        other => Err(PersistenceError::InvalidData(format!(
            "unexpected [applied] column: {:?}",
            other
        ))),
    }
}
