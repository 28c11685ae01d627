//! ScyllaDB schema creation

use scylla::Session;
use crate::error::PersistenceError;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(session: &Session, keyspace: &str, replication_factor: u8) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session.query_unpaged(query, &[]).await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    for (name, statement) in table_statements(keyspace) {
        session.query_unpaged(statement, &[]).await
            .map_err(|e| PersistenceError::SchemaError(format!("Failed to create {} table: {}", name, e)))?;
    }

    tracing::info!("All tables created successfully");
    Ok(())
}

fn table_statements(keyspace: &str) -> Vec<(&'static str, String)> {
    // Identities are never expired
    let identities = format!(r#"
        CREATE TABLE IF NOT EXISTS {}.identities (
            identity_id TEXT,
            display_name TEXT,
            pronoun TEXT,
            is_owner BOOLEAN,
            role_tags SET<TEXT>,
            first_seen BIGINT,
            last_seen BIGINT,
            message_count BIGINT,
            PRIMARY KEY (identity_id)
        )
    "#, keyspace);

    // Newest first so the history window is a LIMIT query
    let turns = format!(r#"
        CREATE TABLE IF NOT EXISTS {}.conversation_turns (
            identity_id TEXT,
            sequence BIGINT,
            role TEXT,
            text TEXT,
            created_at BIGINT,
            PRIMARY KEY ((identity_id), sequence)
        ) WITH CLUSTERING ORDER BY (sequence DESC)
    "#, keyspace);

    let cache = format!(r#"
        CREATE TABLE IF NOT EXISTS {}.response_cache (
            trigger_key TEXT,
            audio_ref TEXT,
            text TEXT,
            PRIMARY KEY (trigger_key)
        )
    "#, keyspace);

    // Counter columns cannot share a table with regular columns
    let hits = format!(r#"
        CREATE TABLE IF NOT EXISTS {}.response_cache_hits (
            trigger_key TEXT,
            hits COUNTER,
            PRIMARY KEY (trigger_key)
        )
    "#, keyspace);

    vec![
        ("identities", identities),
        ("conversation_turns", turns),
        ("response_cache", cache),
        ("response_cache_hits", hits),
    ]
}
