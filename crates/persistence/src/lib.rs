//! ScyllaDB persistence layer for the companion
//!
//! Provides persistent storage for:
//! - Identities and their bounded conversation history
//! - Response cache entries with hit counters

pub mod cache;
pub mod client;
pub mod error;
pub mod profiles;
pub mod schema;

pub use cache::ScyllaCacheStore;
pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use profiles::ScyllaProfileStore;

/// Connect, ensure the schema and build the stores
pub async fn init(config: ScyllaConfig) -> Result<PersistenceLayer, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;

    Ok(PersistenceLayer {
        profiles: ScyllaProfileStore::new(client.clone()),
        cache: ScyllaCacheStore::new(client),
    })
}

/// Combined persistence layer
pub struct PersistenceLayer {
    pub profiles: ScyllaProfileStore,
    pub cache: ScyllaCacheStore,
}
