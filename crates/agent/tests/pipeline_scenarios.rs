//! End-to-end pipeline scenarios
//!
//! Scripted providers stand in for the language and speech backends; the clock and
//! random source are injected so the ambient scenarios are deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use companion_agent::{
    AmbientEngine, AmbientState, InMemoryArtifactStore, InMemoryProfileStore, Orchestrator,
    PipelineComponents, PipelineConfig, ResponseCache,
};
use companion_config::{
    AmbientCatalogConfig, AmbientConfig, CacheConfig, CachePreloadEntry, ConversationConfig,
};
use companion_core::{
    AudioClip, Capability, ConversationTurn, Error, GenerationParams, Identity, KnowledgeStore,
    ManualClock, ProfileStore, Prompt, ProviderError, Result, RoleFilter, ScoredChunk,
    SpeechParams, SpeechSynthesizer, TextGenerator, TurnRole,
};
use companion_llm::{ProviderRegistry, RecordingOutcomeSink};
use companion_rag::{HashEmbedder, InMemoryKnowledgeStore, RetrievalManager, RetrieverConfig};

/// Echoes the user message; tracks overlapping calls
struct EchoText {
    name: &'static str,
    fail: bool,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl EchoText {
    fn new(name: &'static str) -> Arc<Self> {
        Self::build(name, false, Duration::ZERO)
    }

    fn failing(name: &'static str) -> Arc<Self> {
        Self::build(name, true, Duration::ZERO)
    }

    fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
        Self::build(name, false, delay)
    }

    fn build(name: &'static str, fail: bool, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail,
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for EchoText {
    fn name(&self) -> &str {
        self.name
    }

    async fn generate_text(
        &self,
        prompt: &Prompt,
        _params: &GenerationParams,
    ) -> std::result::Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Network("connection refused".to_string()));
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(format!("Dạ, {}", prompt.user))
    }
}

struct CountingSpeech {
    calls: AtomicUsize,
}

impl CountingSpeech {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for CountingSpeech {
    fn name(&self) -> &str {
        "tts"
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        _params: &SpeechParams,
    ) -> std::result::Result<AudioClip, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(AudioClip::new(text.as_bytes().to_vec(), "audio/mpeg"))
    }
}

/// Knowledge backend that is always unreachable
struct DownKnowledgeStore;

#[async_trait]
impl KnowledgeStore for DownKnowledgeStore {
    async fn search(&self, _: &[f32], _: &RoleFilter, _: usize) -> Result<Vec<ScoredChunk>> {
        Err(Error::RetrievalUnavailable("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "down"
    }
}

/// In-memory profiles with switchable outages
#[derive(Default)]
struct FlakyProfileStore {
    inner: InMemoryProfileStore,
    fail_get: bool,
    stall_get: bool,
    fail_append: bool,
}

#[async_trait]
impl ProfileStore for FlakyProfileStore {
    async fn get(&self, id: &str) -> Result<Option<Identity>> {
        if self.stall_get {
            std::future::pending::<()>().await;
        }
        if self.fail_get {
            return Err(Error::ProfileStoreUnavailable("node down".to_string()));
        }
        self.inner.get(id).await
    }

    async fn put(&self, identity: &Identity) -> Result<()> {
        self.inner.put(identity).await
    }

    async fn recent_turns(&self, id: &str, limit: usize) -> Result<Vec<ConversationTurn>> {
        self.inner.recent_turns(id, limit).await
    }

    async fn append_turns(
        &self,
        id: &str,
        turns: Vec<ConversationTurn>,
        window: usize,
    ) -> Result<Vec<ConversationTurn>> {
        if self.fail_append {
            return Err(Error::ProfileStoreUnavailable("write timeout".to_string()));
        }
        self.inner.append_turns(id, turns, window).await
    }
}

struct Harness {
    pipeline: Orchestrator,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<ManualClock>,
    speech: Arc<CountingSpeech>,
    sink: Arc<RecordingOutcomeSink>,
}

struct HarnessBuilder {
    text: Vec<Arc<EchoText>>,
    config: PipelineConfig,
    ambient: AmbientConfig,
    retriever: Option<Arc<RetrievalManager>>,
    profiles: Option<Arc<dyn ProfileStore>>,
}

impl HarnessBuilder {
    fn new(text: Vec<Arc<EchoText>>) -> Self {
        Self {
            text,
            config: PipelineConfig::default(),
            ambient: AmbientConfig::default(),
            retriever: None,
            profiles: None,
        }
    }

    fn conversation(mut self, conversation: ConversationConfig) -> Self {
        self.config.conversation = conversation;
        self
    }

    fn cache(mut self, cache: CacheConfig) -> Self {
        self.config.cache = cache;
        self
    }

    fn ambient(mut self, ambient: AmbientConfig) -> Self {
        self.ambient = ambient;
        self
    }

    fn retriever(mut self, retriever: RetrievalManager) -> Self {
        self.retriever = Some(Arc::new(retriever));
        self
    }

    fn profiles(mut self, store: FlakyProfileStore) -> Self {
        self.profiles = Some(Arc::new(store));
        self
    }

    fn profile_timeout(mut self, timeout: Duration) -> Self {
        self.config.profile_timeout = timeout;
        self
    }

    fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::default());
        let profiles = self
            .profiles
            .unwrap_or_else(|| Arc::new(InMemoryProfileStore::new()));
        let speech = CountingSpeech::new();
        let sink = Arc::new(RecordingOutcomeSink::new());

        let mut registry = ProviderRegistry::builder().outcome_sink(sink.clone());
        for (rank, provider) in self.text.into_iter().enumerate() {
            registry = registry.text_generator(rank as u32, provider);
        }
        let registry = registry
            .speech_synthesizer(0, speech.clone())
            .build()
            .unwrap();

        let ambient = AmbientEngine::new(
            AmbientCatalogConfig::builtin().unwrap(),
            &self.ambient,
            clock.clone(),
            Box::new(StdRng::seed_from_u64(2024)),
        )
        .unwrap();

        let pipeline = Orchestrator::new(
            PipelineComponents {
                profiles: profiles.clone(),
                cache: ResponseCache::in_memory(),
                retriever: self.retriever,
                registry: Arc::new(registry),
                artifacts: Arc::new(InMemoryArtifactStore::new()),
                ambient: Arc::new(ambient),
                clock: clock.clone(),
            },
            self.config,
        );

        Harness {
            pipeline,
            profiles,
            clock,
            speech,
            sink,
        }
    }
}

fn greeting_cache() -> CacheConfig {
    CacheConfig {
        trigger_phrases: vec!["Hi MeiLin".to_string()],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_identical_trigger_served_from_cache() {
    let llm = EchoText::new("llm");
    let h = HarnessBuilder::new(vec![llm.clone()])
        .cache(greeting_cache())
        .build();

    let first = h.pipeline.handle_turn("u1", "Hi MeiLin").await;
    assert!(!first.used_cache);
    assert!(first.audio_ref.is_some());
    assert_eq!(llm.calls(), 1);
    assert_eq!(h.speech.calls(), 1);

    let second = h.pipeline.handle_turn("u2", "hi,  meilin!").await;
    assert!(second.used_cache);
    assert!(second.used_provider.is_none());
    assert_eq!(second.audio_ref, first.audio_ref);
    assert_eq!(second.text, first.text);
    assert_eq!(llm.calls(), 1);
    assert_eq!(h.speech.calls(), 1);

    let entry = h.pipeline.cache().lookup("hi_meilin").await.unwrap().unwrap();
    assert_eq!(entry.hit_count, 1);
}

#[tokio::test]
async fn test_history_never_exceeds_window() {
    let h = HarnessBuilder::new(vec![EchoText::new("llm")])
        .conversation(ConversationConfig {
            window_size: 6,
            ..Default::default()
        })
        .build();

    for i in 0..10 {
        let envelope = h.pipeline.handle_turn("u1", &format!("câu hỏi {}", i)).await;
        assert!(!envelope.is_failure());
        let turns = h.profiles.recent_turns("u1", usize::MAX).await.unwrap();
        assert!(turns.len() <= 6);
    }

    let turns = h.profiles.recent_turns("u1", usize::MAX).await.unwrap();
    assert_eq!(turns.len(), 6);
    assert_eq!(turns.last().unwrap().text, "Dạ, câu hỏi 9");

    let identity = h.profiles.get("u1").await.unwrap().unwrap();
    assert_eq!(identity.message_count, 10);
}

#[tokio::test]
async fn test_fallback_after_n_minus_one_failures() {
    let h = HarnessBuilder::new(vec![
        EchoText::failing("primary"),
        EchoText::failing("secondary"),
        EchoText::new("tertiary"),
    ])
    .build();

    let envelope = h.pipeline.handle_turn("u1", "Em ơi").await;
    assert_eq!(envelope.used_provider.as_deref(), Some("tertiary"));
    assert_eq!(envelope.text, "Dạ, Em ơi");

    let text_outcomes: Vec<_> = h
        .sink
        .outcomes()
        .into_iter()
        .filter(|o| o.capability == Capability::GenerateText)
        .collect();
    assert_eq!(text_outcomes.len(), 3);
    assert_eq!(text_outcomes.iter().filter(|o| !o.success).count(), 2);
    assert_eq!(text_outcomes[2].provider, "tertiary");
    assert!(text_outcomes[2].success);

    // No memory across turns: the primary is attempted again
    h.sink.clear();
    h.pipeline.handle_turn("u1", "Em ơi").await;
    assert_eq!(h.sink.outcomes()[0].provider, "primary");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_identity_turns_never_interleave() {
    let llm = EchoText::slow("llm", Duration::from_millis(50));
    let h = Arc::new(HarnessBuilder::new(vec![llm.clone()]).build());

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move { h.pipeline.handle_turn("u1", &format!("tin {}", i)).await })
        })
        .collect();
    for task in tasks {
        assert!(!task.await.unwrap().is_failure());
    }

    assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 1);

    let turns: Vec<ConversationTurn> = h.profiles.recent_turns("u1", usize::MAX).await.unwrap();
    assert_eq!(turns.len(), 8);
    for (i, pair) in turns.chunks(2).enumerate() {
        assert_eq!(pair[0].role, TurnRole::User);
        assert_eq!(pair[1].role, TurnRole::Agent);
        assert_eq!(pair[1].text, format!("Dạ, {}", pair[0].text));
        assert_eq!(pair[0].sequence, 2 * i as u64);
        assert_eq!(pair[1].sequence, 2 * i as u64 + 1);
    }
    assert_eq!(h.pipeline.active_identities(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_identities_run_concurrently() {
    let llm = EchoText::slow("llm", Duration::from_millis(100));
    let h = HarnessBuilder::new(vec![llm.clone()]).build();

    let (a, b) = tokio::join!(
        h.pipeline.handle_turn("alice", "Chào em"),
        h.pipeline.handle_turn("bob", "Chào em")
    );
    assert!(!a.is_failure() && !b.is_failure());
    assert_eq!(llm.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_empty_knowledge_store_degrades_gracefully() {
    let retriever = RetrievalManager::new(
        Arc::new(HashEmbedder::new(64)),
        Arc::new(InMemoryKnowledgeStore::new()),
        RetrieverConfig::default(),
    );
    let h = HarnessBuilder::new(vec![EchoText::new("primary"), EchoText::new("backup")])
        .retriever(retriever)
        .build();

    let envelope = h.pipeline.handle_turn("u1", "Xin chào").await;
    assert!(!envelope.text.is_empty());
    assert!(!envelope.used_cache);
    assert_eq!(envelope.used_provider.as_deref(), Some("primary"));
    assert!(envelope.failure.is_none());
}

#[tokio::test]
async fn test_unreachable_knowledge_store_degrades_to_empty_context() {
    let retriever = RetrievalManager::new(
        Arc::new(HashEmbedder::new(64)),
        Arc::new(DownKnowledgeStore),
        RetrieverConfig::default(),
    );
    let h = HarnessBuilder::new(vec![EchoText::new("primary"), EchoText::new("backup")])
        .retriever(retriever)
        .build();

    let envelope = h.pipeline.handle_turn("u1", "Xin chào").await;
    assert!(envelope.failure.is_none());
    assert_eq!(envelope.used_provider.as_deref(), Some("primary"));
    assert!(envelope.text.contains("Xin chào"));
    assert_eq!(h.profiles.recent_turns("u1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_profile_store_outage_is_terminal() {
    let conversation = ConversationConfig::default();
    let fallback = conversation.fallback_message.clone();
    let llm = EchoText::new("llm");
    let h = HarnessBuilder::new(vec![llm.clone()])
        .conversation(conversation)
        .profiles(FlakyProfileStore {
            fail_get: true,
            ..Default::default()
        })
        .build();

    let envelope = h.pipeline.handle_turn("u1", "Xin chào").await;
    assert_eq!(envelope.failure.unwrap().code, "profile_store_unavailable");
    assert_eq!(envelope.text, fallback);
    assert!(envelope.audio_ref.is_none());
    assert_eq!(llm.calls(), 0);
    assert_eq!(h.speech.calls(), 0);
}

#[tokio::test]
async fn test_history_write_failure_discards_reply() {
    let llm = EchoText::new("llm");
    let h = HarnessBuilder::new(vec![llm.clone()])
        .cache(greeting_cache())
        .profiles(FlakyProfileStore {
            fail_append: true,
            ..Default::default()
        })
        .build();

    let envelope = h.pipeline.handle_turn("u1", "Hi MeiLin").await;
    assert_eq!(envelope.failure.unwrap().code, "profile_store_unavailable");
    assert!(envelope.audio_ref.is_none());
    assert_eq!(llm.calls(), 1);
    assert_eq!(h.speech.calls(), 0);
    assert_eq!(h.pipeline.cache().len().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_profile_store_releases_identity() {
    let llm = EchoText::new("llm");
    let h = HarnessBuilder::new(vec![llm.clone()])
        .profiles(FlakyProfileStore {
            stall_get: true,
            ..Default::default()
        })
        .profile_timeout(Duration::from_millis(100))
        .build();

    // The second turn queues behind the first and still gets an answer
    let (first, second) = tokio::join!(
        h.pipeline.handle_turn("u1", "Xin chào"),
        h.pipeline.handle_turn("u1", "Em ơi")
    );
    assert_eq!(first.failure.unwrap().code, "profile_store_unavailable");
    assert_eq!(second.failure.unwrap().code, "profile_store_unavailable");
    assert_eq!(llm.calls(), 0);
    assert_eq!(h.pipeline.active_identities(), 0);
}

#[tokio::test]
async fn test_preloaded_trigger_needs_no_providers() {
    let llm = EchoText::new("llm");
    let h = HarnessBuilder::new(vec![llm.clone()]).build();
    h.pipeline
        .cache()
        .preload(&[CachePreloadEntry {
            trigger_key: "hi_meilin".to_string(),
            text: "Dạ, em đây!".to_string(),
            audio_ref: "A".to_string(),
        }])
        .await
        .unwrap();

    let envelope = h.pipeline.handle_turn("u1", "Hi MeiLin").await;
    assert_eq!(envelope.audio_ref.as_deref(), Some("A"));
    assert!(envelope.used_cache);
    assert_eq!(llm.calls(), 0);
    assert_eq!(h.speech.calls(), 0);
    assert!(h.sink.outcomes().is_empty());
}

#[tokio::test]
async fn test_all_generators_failing_yields_fallback() {
    let conversation = ConversationConfig::default();
    let fallback = conversation.fallback_message.clone();
    let h = HarnessBuilder::new(vec![EchoText::failing("a"), EchoText::failing("b")])
        .conversation(conversation)
        .build();

    let envelope = h.pipeline.handle_turn("u1", "Kể chuyện đi").await;
    assert_eq!(envelope.text, fallback);
    assert!(envelope.audio_ref.is_none());
    assert_eq!(envelope.failure.unwrap().code, "all_providers_exhausted");
    assert_eq!(h.speech.calls(), 0);

    // Failed turns leave no history behind
    assert!(h.profiles.recent_turns("u1", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_calm_mode_fires_only_after_threshold() {
    let h = HarnessBuilder::new(vec![EchoText::new("llm")])
        .ambient(AmbientConfig {
            idle_threshold_secs: 60,
            default_mode: "calm".to_string(),
            ..Default::default()
        })
        .build();
    let ambient = h.pipeline.ambient().clone();

    h.clock.advance_secs(600);
    h.pipeline.handle_turn("u1", "Chào em").await;
    assert_eq!(ambient.state(), AmbientState::Idle);

    h.clock.advance_secs(59);
    assert!((0..1000).all(|_| ambient.tick().is_none()));

    h.clock.advance_secs(1);
    let behavior = (0..1000).find_map(|_| ambient.tick());
    assert!(behavior.is_some());
    assert_eq!(ambient.state(), AmbientState::BehaviorActive);

    // A real message preempts the behavior
    h.pipeline.handle_turn("u1", "Em đang làm gì đó?").await;
    assert_eq!(ambient.state(), AmbientState::Idle);
}
