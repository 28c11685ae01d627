//! Response Orchestration Pipeline
//!
//! `handle_turn` runs one message through:
//!
//! 1. identity resolution (terminal on profile store failure)
//! 2. response cache check on the normalized trigger key
//! 3. role-filtered retrieval (degrades to an empty context)
//! 4. prompt assembly from persona, context, recent history and the message
//! 5. text generation with provider fallback (terminal when exhausted)
//! 6. history append, trimmed to the window
//! 7. speech synthesis with provider fallback (text-only when exhausted)
//!
//! Turns for one identity are serialized through a keyed mutex; different identities
//! run concurrently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use companion_config::{CacheConfig, ConversationConfig, PersonaConfig, Settings};
use companion_core::{
    ArtifactStore, CacheEntry, Clock, Error, GenerationParams, ProfileStore, ProviderError,
    ResponseEnvelope, Result, SpeechParams,
};
use companion_llm::ProviderRegistry;
use companion_rag::RetrievalManager;

use crate::ambient::AmbientEngine;
use crate::cache::ResponseCache;
use crate::profile::{ProfileManager, DEFAULT_STORE_TIMEOUT};
use crate::prompt::{PromptAssembler, PromptInput};
use crate::roles::RoleDetector;
use crate::text::{clean_response, shorten, trigger_key};

/// Keyed mutex: one lock per identity, dropped once nobody holds or waits on it
#[derive(Default)]
struct IdentityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdentityLocks {
    fn handle(&self, id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(id.to_string()).or_default().clone()
    }

    fn release(&self, id: &str) {
        self.locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the duration of a turn; releases the identity slot on drop
struct TurnPermit<'a> {
    locks: &'a IdentityLocks,
    id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for TurnPermit<'_> {
    fn drop(&mut self) {
        // The guard owns an Arc to the lock; drop it before pruning
        self.guard.take();
        self.locks.release(&self.id);
    }
}

/// Marks the ambient engine ENGAGED until the envelope is returned
struct EngagedGuard<'a>(&'a AmbientEngine);

impl<'a> EngagedGuard<'a> {
    fn new(engine: &'a AmbientEngine) -> Self {
        engine.begin_turn();
        Self(engine)
    }
}

impl Drop for EngagedGuard<'_> {
    fn drop(&mut self) {
        self.0.end_turn();
    }
}

/// Pipeline tunables, usually taken from [`Settings`]
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub conversation: ConversationConfig,
    pub cache: CacheConfig,
    /// Chunks retrieved per turn
    pub top_k: usize,
    pub persona: PersonaConfig,
    pub generation: GenerationParams,
    pub speech: SpeechParams,
    /// Bound on each profile store call
    pub profile_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings, persona: PersonaConfig) -> Self {
        Self {
            conversation: settings.conversation.clone(),
            cache: settings.cache.clone(),
            top_k: settings.rag.top_k,
            persona,
            generation: GenerationParams::default(),
            speech: SpeechParams::default(),
            profile_timeout: Duration::from_millis(settings.persistence.timeout_ms),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            conversation: ConversationConfig::default(),
            cache: CacheConfig::default(),
            top_k: 3,
            persona: PersonaConfig::default(),
            generation: GenerationParams::default(),
            speech: SpeechParams::default(),
            profile_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Collaborators the pipeline coordinates
pub struct PipelineComponents {
    pub profiles: Arc<dyn ProfileStore>,
    pub cache: ResponseCache,
    /// `None` runs every turn with an empty context
    pub retriever: Option<Arc<RetrievalManager>>,
    pub registry: Arc<ProviderRegistry>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub ambient: Arc<AmbientEngine>,
    pub clock: Arc<dyn Clock>,
}

pub struct Orchestrator {
    profiles: ProfileManager,
    cache: ResponseCache,
    retriever: Option<Arc<RetrievalManager>>,
    registry: Arc<ProviderRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    ambient: Arc<AmbientEngine>,
    prompts: PromptAssembler,
    roles: RoleDetector,
    locks: IdentityLocks,
    config: PipelineConfig,
    cacheable: HashSet<String>,
}

impl Orchestrator {
    pub fn new(components: PipelineComponents, config: PipelineConfig) -> Self {
        let profiles = ProfileManager::new(
            components.profiles,
            components.clock,
            &config.conversation,
            &config.persona,
        )
        .with_timeout(config.profile_timeout);
        let prompts = PromptAssembler::new(
            config.persona.clone(),
            config.conversation.max_response_words,
        );
        let roles = RoleDetector::from_config(&config.conversation);
        let cacheable = config
            .cache
            .trigger_phrases
            .iter()
            .map(|p| trigger_key(p))
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            profiles,
            cache: components.cache,
            retriever: components.retriever,
            registry: components.registry,
            artifacts: components.artifacts,
            ambient: components.ambient,
            prompts,
            roles,
            locks: IdentityLocks::default(),
            config,
            cacheable,
        }
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn ambient(&self) -> &Arc<AmbientEngine> {
        &self.ambient
    }

    pub fn persona(&self) -> &PersonaConfig {
        self.prompts.persona()
    }

    /// Identities with a turn running or queued
    pub fn active_identities(&self) -> usize {
        self.locks.len()
    }

    /// Run one turn, queueing behind any in-flight turn for the same identity
    pub async fn handle_turn(&self, identity_id: &str, raw_text: &str) -> ResponseEnvelope {
        self.handle_turn_as(identity_id, None, raw_text).await
    }

    /// [`handle_turn`](Self::handle_turn) with a display name supplied by the adapter
    pub async fn handle_turn_as(
        &self,
        identity_id: &str,
        display_name: Option<&str>,
        raw_text: &str,
    ) -> ResponseEnvelope {
        let started = Instant::now();
        if let Err(e) = validate_turn(identity_id, raw_text) {
            return self.fail(identity_id, e, started);
        }

        let _engaged = EngagedGuard::new(&self.ambient);
        let handle = self.locks.handle(identity_id);
        let _permit = TurnPermit {
            locks: &self.locks,
            id: identity_id.to_string(),
            guard: Some(handle.lock_owned().await),
        };

        self.run_turn(identity_id, display_name, raw_text, started).await
    }

    /// Like [`handle_turn`](Self::handle_turn) but rejects with `TurnInProgress`
    /// instead of queueing
    pub async fn try_handle_turn(
        &self,
        identity_id: &str,
        display_name: Option<&str>,
        raw_text: &str,
    ) -> Result<ResponseEnvelope> {
        let started = Instant::now();
        validate_turn(identity_id, raw_text)?;

        let handle = self.locks.handle(identity_id);
        let guard = match handle.try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.locks.release(identity_id);
                metrics::counter!("turns_total", "outcome" => "rejected").increment(1);
                return Err(Error::TurnInProgress(identity_id.to_string()));
            }
        };

        let _engaged = EngagedGuard::new(&self.ambient);
        let _permit = TurnPermit {
            locks: &self.locks,
            id: identity_id.to_string(),
            guard: Some(guard),
        };

        Ok(self.run_turn(identity_id, display_name, raw_text, started).await)
    }

    async fn run_turn(
        &self,
        identity_id: &str,
        display_name: Option<&str>,
        raw_text: &str,
        started: Instant,
    ) -> ResponseEnvelope {
        let resolved = match self.profiles.resolve(identity_id, display_name, raw_text).await {
            Ok(resolved) => resolved,
            Err(e) => return self.fail(identity_id, e, started),
        };

        let key = trigger_key(raw_text);
        if self.config.cache.enabled {
            if let Some(envelope) = self.try_cache(&key, started).await {
                return envelope;
            }
        }

        let filter = self.roles.filter_for(&resolved.identity, raw_text);
        let context = match &self.retriever {
            Some(retriever) => match retriever.retrieve(raw_text, &filter, self.config.top_k).await {
                Ok(retrieved) => retrieved.context,
                Err(e) => {
                    metrics::counter!("retrieval_degraded_total").increment(1);
                    tracing::warn!(identity = %identity_id, error = %e, "Retrieval degraded to empty context");
                    String::new()
                }
            },
            None => String::new(),
        };

        let history = match self
            .profiles
            .history(identity_id, self.config.conversation.prompt_history_turns)
            .await
        {
            Ok(history) => history,
            Err(e) => return self.fail(identity_id, e, started),
        };

        let prompt = self.prompts.assemble(PromptInput {
            identity: &resolved.identity,
            first_meeting: resolved.first_meeting,
            context: &context,
            history: &history,
            message: raw_text,
        });

        let generated = match self
            .registry
            .generate_text(prompt, self.config.generation.clone())
            .await
        {
            Ok(generated) => generated,
            Err(e) => return self.fail(identity_id, e, started),
        };

        let mut reply = shorten(
            &clean_response(&generated.value, &self.config.persona.name),
            self.config.conversation.max_response_words,
            self.config.conversation.max_response_sentences,
        );
        if reply.is_empty() {
            let err = Error::Provider {
                provider: generated.provider,
                source: ProviderError::MalformedResponse("nothing left after cleanup".to_string()),
            };
            return self.fail(identity_id, err, started);
        }

        if let Some(sound) = self.ambient.accent(accent_context(&reply)) {
            reply = format!("{} {}", sound, reply);
        }

        if let Err(e) = self
            .profiles
            .record_exchange(identity_id, raw_text, &reply)
            .await
        {
            return self.fail(identity_id, e, started);
        }

        let audio_ref = self.voice(&reply).await;

        if let Some(audio_ref) = &audio_ref {
            if self.config.cache.enabled && self.cacheable.contains(&key) {
                let entry = CacheEntry::new(key.clone(), audio_ref.clone(), reply.clone());
                if let Err(e) = self.cache.store(entry).await {
                    tracing::warn!(trigger_key = %key, error = %e, "Failed to cache response");
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        metrics::counter!("turns_total", "outcome" => "generated").increment(1);
        metrics::histogram!("turn_latency_ms").record(latency_ms as f64);
        tracing::info!(
            identity = %identity_id,
            provider = %generated.provider,
            fallbacks = generated.failed_attempts(),
            audio = audio_ref.is_some(),
            latency_ms,
            "Turn completed"
        );

        ResponseEnvelope {
            text: reply,
            audio_ref,
            used_provider: Some(generated.provider),
            used_cache: false,
            latency_ms,
            failure: None,
        }
    }

    async fn try_cache(&self, key: &str, started: Instant) -> Option<ResponseEnvelope> {
        let entry = match self.cache.lookup(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                metrics::counter!("cache_misses_total").increment(1);
                return None;
            }
            Err(e) => {
                tracing::warn!(trigger_key = %key, error = %e, "Cache lookup failed");
                return None;
            }
        };

        if let Err(e) = self.cache.record_hit(key).await {
            tracing::warn!(trigger_key = %key, error = %e, "Failed to record cache hit");
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        metrics::counter!("turns_total", "outcome" => "cached").increment(1);
        metrics::histogram!("turn_latency_ms").record(latency_ms as f64);
        tracing::info!(trigger_key = %key, latency_ms, "Served from response cache");

        Some(ResponseEnvelope::cached(entry.text, entry.audio_ref, latency_ms))
    }

    /// Synthesize and store audio; `None` on failure
    async fn voice(&self, text: &str) -> Option<String> {
        let clip = match self
            .registry
            .synthesize_speech(text, self.config.speech.clone())
            .await
        {
            Ok(invocation) => invocation.value,
            Err(e) => {
                tracing::warn!(error = %e, "Speech synthesis unavailable, returning text only");
                return None;
            }
        };

        match self.artifacts.put(&clip).await {
            Ok(audio_ref) => Some(audio_ref),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to store audio artifact");
                None
            }
        }
    }

    fn fail(&self, identity_id: &str, err: Error, started: Instant) -> ResponseEnvelope {
        let latency_ms = started.elapsed().as_millis() as u64;
        metrics::counter!("turns_total", "outcome" => "failed").increment(1);
        tracing::error!(
            identity = %identity_id,
            code = err.code(),
            error = %err,
            latency_ms,
            "Turn failed"
        );
        ResponseEnvelope::failed(&self.config.conversation.fallback_message, &err, latency_ms)
    }
}

fn validate_turn(identity_id: &str, raw_text: &str) -> Result<()> {
    if identity_id.trim().is_empty() {
        return Err(Error::InvalidInput("identity id is empty".to_string()));
    }
    if raw_text.trim().is_empty() {
        return Err(Error::InvalidInput("message is empty".to_string()));
    }
    Ok(())
}

/// Catalog context matching the tone of a reply
fn accent_context(reply: &str) -> &'static str {
    if reply.contains('!') {
        "excited"
    } else if reply.contains('?') {
        "confused"
    } else {
        "happy"
    }
}
