//! Wiring from [`Settings`] to a ready [`AppState`]

use std::sync::Arc;
use std::time::Duration;

use companion_agent::{
    AmbientEngine, AmbientRunner, FsArtifactStore, InMemoryCacheStore, InMemoryProfileStore,
    Orchestrator, PipelineComponents, PipelineConfig, ResponseCache,
};
use companion_config::{PersonaConfig, Settings};
use companion_core::{ArtifactStore, CacheStore, Clock, ProfileStore, SystemClock};
use companion_llm::{ProviderFactory, ProviderRegistry};
use companion_persistence::ScyllaConfig;
use companion_rag::RetrievalManager;

use crate::state::AppState;
use crate::ServerError;

/// Build every component from configuration, including providers
pub async fn build_state(settings: Settings) -> Result<AppState, ServerError> {
    let registry = ProviderFactory::build(&settings.providers)
        .map_err(|e| ServerError::Initialization(e.to_string()))?;
    build_state_with_registry(settings, registry).await
}

/// Same as [`build_state`] with an externally built provider registry
pub async fn build_state_with_registry(
    settings: Settings,
    registry: ProviderRegistry,
) -> Result<AppState, ServerError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(registry);
    let persona = PersonaConfig::load_or_default(settings.persona_path.as_deref());

    let (profiles, cache_store, distributed) = init_stores(&settings).await;

    let cache = ResponseCache::new(cache_store);
    if settings.cache.enabled && !settings.cache.preload.is_empty() {
        if let Err(e) = cache.preload(&settings.cache.preload).await {
            tracing::warn!(error = %e, "Cache preload failed");
        }
    }

    let retriever = if settings.rag.enabled {
        match RetrievalManager::from_config(&settings.rag).await {
            Ok(retriever) => Some(Arc::new(retriever)),
            Err(e) => {
                tracing::warn!(error = %e, "Retrieval unavailable at startup, continuing without context");
                None
            }
        }
    } else {
        None
    };

    let artifacts: Arc<dyn ArtifactStore> = Arc::new(
        FsArtifactStore::new(&settings.cache.audio_dir)
            .await
            .map_err(|e| ServerError::Initialization(e.to_string()))?,
    );

    let engine = Arc::new(
        AmbientEngine::from_config(&settings.ambient, clock.clone())
            .map_err(|e| ServerError::Initialization(e.to_string()))?,
    );

    let orchestrator = Orchestrator::new(
        PipelineComponents {
            profiles,
            cache,
            retriever,
            registry: registry.clone(),
            artifacts: artifacts.clone(),
            ambient: engine.clone(),
            clock: clock.clone(),
        },
        PipelineConfig::from_settings(&settings, persona),
    );

    let runner = AmbientRunner::new(
        engine,
        registry,
        artifacts,
        clock,
        Duration::from_secs(settings.ambient.tick_interval_secs.max(1)),
    );

    tracing::info!(
        distributed,
        rag_enabled = settings.rag.enabled,
        persona = %orchestrator.persona().name,
        "Initialized application state"
    );

    Ok(AppState::new(
        settings,
        Arc::new(orchestrator),
        Arc::new(runner),
        distributed,
    ))
}

/// ScyllaDB stores when enabled and reachable, in-memory otherwise
async fn init_stores(settings: &Settings) -> (Arc<dyn ProfileStore>, Arc<dyn CacheStore>, bool) {
    if settings.persistence.enabled {
        tracing::info!("Initializing ScyllaDB persistence layer...");
        match companion_persistence::init(ScyllaConfig::from(&settings.persistence)).await {
            Ok(layer) => {
                tracing::info!(
                    hosts = ?settings.persistence.scylla_hosts,
                    keyspace = %settings.persistence.keyspace,
                    "ScyllaDB persistence initialized"
                );
                return (Arc::new(layer.profiles), Arc::new(layer.cache), true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to initialize ScyllaDB, falling back to in-memory");
            }
        }
    } else {
        tracing::info!("Persistence disabled, using in-memory stores");
    }

    (
        Arc::new(InMemoryProfileStore::new()),
        Arc::new(InMemoryCacheStore::new()),
        false,
    )
}
