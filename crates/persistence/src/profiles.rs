//! Identity and conversation history persistence using ScyllaDB

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use companion_core::{ConversationTurn, Error, Identity, ProfileStore, Result, TurnRole};

use crate::{PersistenceError, ScyllaClient};

type IdentityRow = (
    String,
    String,
    String,
    bool,
    Option<Vec<String>>,
    i64,
    i64,
    i64,
);

type TurnRow = (String, i64, String, String, i64);

/// ScyllaDB implementation of the profile store
#[derive(Clone)]
pub struct ScyllaProfileStore {
    client: ScyllaClient,
}

impl ScyllaProfileStore {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    async fn load_identity(&self, id: &str) -> std::result::Result<Option<Identity>, PersistenceError> {
        let query = format!(
            "SELECT identity_id, display_name, pronoun, is_owner, role_tags,
                    first_seen, last_seen, message_count
             FROM {}.identities WHERE identity_id = ?",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (id,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let row: IdentityRow = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(identity_from_row(row)));
            }
        }

        Ok(None)
    }

    async fn save_identity(&self, identity: &Identity) -> std::result::Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.identities (
                identity_id, display_name, pronoun, is_owner, role_tags,
                first_seen, last_seen, message_count
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let role_tags: Vec<String> = identity.role_tags.iter().cloned().collect();

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    &identity.id,
                    &identity.display_name,
                    &identity.pronoun,
                    identity.is_owner,
                    role_tags,
                    identity.first_seen.timestamp_millis(),
                    identity.last_seen.timestamp_millis(),
                    identity.message_count as i64,
                ),
            )
            .await?;

        Ok(())
    }

    async fn load_turns(
        &self,
        id: &str,
        limit: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, PersistenceError> {
        let query = format!(
            "SELECT identity_id, sequence, role, text, created_at
             FROM {}.conversation_turns WHERE identity_id = ? LIMIT ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (id, limit as i32))
            .await?;

        let mut turns = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let row: TurnRow = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                turns.push(turn_from_row(row)?);
            }
        }

        // Stored newest first
        turns.reverse();
        Ok(turns)
    }

    async fn latest_sequence(&self, id: &str) -> std::result::Result<Option<u64>, PersistenceError> {
        let query = format!(
            "SELECT sequence FROM {}.conversation_turns WHERE identity_id = ? LIMIT 1",
            self.client.keyspace()
        );

        let result = self.client.session().query_unpaged(query, (id,)).await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (sequence,): (i64,) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                return Ok(Some(sequence as u64));
            }
        }

        Ok(None)
    }

    async fn insert_turns(
        &self,
        id: &str,
        turns: Vec<ConversationTurn>,
        window: usize,
    ) -> std::result::Result<Vec<ConversationTurn>, PersistenceError> {
        let mut next = self.latest_sequence(id).await?.map(|s| s + 1).unwrap_or(0);

        let insert = format!(
            "INSERT INTO {}.conversation_turns (identity_id, sequence, role, text, created_at)
             VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        let mut appended = Vec::with_capacity(turns.len());
        for mut turn in turns {
            turn.identity_id = id.to_string();
            turn.sequence = next;
            next += 1;

            self.client
                .session()
                .query_unpaged(
                    insert.clone(),
                    (
                        id,
                        turn.sequence as i64,
                        turn.role.as_str(),
                        &turn.text,
                        turn.timestamp.timestamp_millis(),
                    ),
                )
                .await?;

            appended.push(turn);
        }

        if let Some(floor) = eviction_floor(next, window) {
            let delete = format!(
                "DELETE FROM {}.conversation_turns WHERE identity_id = ? AND sequence <= ?",
                self.client.keyspace()
            );
            self.client
                .session()
                .query_unpaged(delete, (id, floor as i64))
                .await?;
        }

        Ok(appended)
    }
}

#[async_trait]
impl ProfileStore for ScyllaProfileStore {
    async fn get(&self, id: &str) -> Result<Option<Identity>> {
        self.load_identity(id).await.map_err(unavailable)
    }

    async fn put(&self, identity: &Identity) -> Result<()> {
        self.save_identity(identity).await.map_err(unavailable)
    }

    async fn recent_turns(&self, id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.load_turns(id, limit).await.map_err(unavailable)
    }

    async fn append_turns(
        &self,
        id: &str,
        turns: Vec<ConversationTurn>,
        window: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let appended = self
            .insert_turns(id, turns, window)
            .await
            .map_err(unavailable)?;

        tracing::debug!(identity = %id, appended = appended.len(), "Turns persisted");
        Ok(appended)
    }

    fn is_distributed(&self) -> bool {
        true
    }
}

fn unavailable(err: PersistenceError) -> Error {
    Error::ProfileStoreUnavailable(err.to_string())
}

/// Highest sequence to delete so that at most `window` turns remain below `next`
fn eviction_floor(next: u64, window: usize) -> Option<u64> {
    next.checked_sub(window as u64 + 1)
}

fn millis(value: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn identity_from_row(row: IdentityRow) -> Identity {
    let (id, display_name, pronoun, is_owner, role_tags, first_seen, last_seen, message_count) =
        row;

    Identity {
        id,
        display_name,
        pronoun,
        is_owner,
        role_tags: role_tags
            .unwrap_or_default()
            .into_iter()
            .collect::<BTreeSet<_>>(),
        first_seen: millis(first_seen),
        last_seen: millis(last_seen),
        message_count: message_count.max(0) as u64,
    }
}

fn turn_from_row(row: TurnRow) -> std::result::Result<ConversationTurn, PersistenceError> {
    let (identity_id, sequence, role, text, created_at) = row;
    let role = TurnRole::parse(&role)
        .ok_or_else(|| PersistenceError::InvalidData(format!("unknown turn role: {}", role)))?;

    Ok(ConversationTurn {
        identity_id,
        sequence: sequence.max(0) as u64,
        role,
        text,
        timestamp: millis(created_at),
    })
}
