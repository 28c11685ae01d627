//! Provider registry with rank-ordered fallback
//!
//! Each capability owns a strictly ordered list of providers; index 0 is the
//! primary. [`ProviderRegistry::invoke`] walks the list under a per-capability
//! timeout and returns the first well-formed result. A provider that fails is
//! skipped only for the current call; the next call starts again from rank 0.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use companion_core::{
    AudioClip, Capability, Error, GenerationParams, Prompt, ProviderDescriptor, ProviderError,
    ProviderStatus, Result, SpeechParams, SpeechSynthesizer, TextGenerator,
};

use crate::LlmError;

/// Request for a single capability
#[derive(Debug, Clone)]
pub enum ProviderRequest {
    GenerateText {
        prompt: Prompt,
        params: GenerationParams,
    },
    SynthesizeSpeech {
        text: String,
        params: SpeechParams,
    },
}

impl ProviderRequest {
    pub fn capability(&self) -> Capability {
        match self {
            ProviderRequest::GenerateText { .. } => Capability::GenerateText,
            ProviderRequest::SynthesizeSpeech { .. } => Capability::SynthesizeSpeech,
        }
    }
}

/// Result of a single capability call
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutput {
    Text(String),
    Audio(AudioClip),
}

/// Structured record of one provider attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptOutcome {
    pub capability: Capability,
    pub provider: String,
    pub rank: u32,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Successful invocation: the value, who produced it, and every attempt made
#[derive(Debug, Clone)]
pub struct Invocation<T> {
    pub value: T,
    pub provider: String,
    pub attempts: Vec<AttemptOutcome>,
}

impl<T> Invocation<T> {
    pub fn failed_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| !a.success).count()
    }
}

/// Receives one outcome per attempt
pub trait OutcomeSink: Send + Sync + 'static {
    fn record(&self, outcome: &AttemptOutcome);
}

/// Logs each attempt and updates provider metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutcomeSink;

impl OutcomeSink for TracingOutcomeSink {
    fn record(&self, outcome: &AttemptOutcome) {
        let status = if outcome.success { "success" } else { "failure" };

        if outcome.success {
            tracing::debug!(
                capability = %outcome.capability,
                provider = %outcome.provider,
                rank = outcome.rank,
                latency_ms = outcome.latency_ms,
                "Provider attempt succeeded"
            );
        } else {
            tracing::warn!(
                capability = %outcome.capability,
                provider = %outcome.provider,
                rank = outcome.rank,
                latency_ms = outcome.latency_ms,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Provider attempt failed"
            );
        }

        metrics::counter!(
            "provider_attempts_total",
            "capability" => outcome.capability.as_str(),
            "provider" => outcome.provider.clone(),
            "outcome" => status
        )
        .increment(1);
        metrics::histogram!(
            "provider_latency_ms",
            "capability" => outcome.capability.as_str(),
            "provider" => outcome.provider.clone()
        )
        .record(outcome.latency_ms as f64);
    }
}

/// Keeps every outcome in memory
#[derive(Debug, Default)]
pub struct RecordingOutcomeSink {
    outcomes: Mutex<Vec<AttemptOutcome>>,
}

impl RecordingOutcomeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outcomes(&self) -> Vec<AttemptOutcome> {
        self.outcomes.lock().clone()
    }

    pub fn clear(&self) {
        self.outcomes.lock().clear();
    }
}

impl OutcomeSink for RecordingOutcomeSink {
    fn record(&self, outcome: &AttemptOutcome) {
        self.outcomes.lock().push(outcome.clone());
    }
}

#[derive(Clone)]
enum Backend {
    Text(Arc<dyn TextGenerator>),
    Speech(Arc<dyn SpeechSynthesizer>),
}

#[derive(Clone)]
struct Registered {
    name: String,
    backend: Backend,
}

impl Registered {
    async fn call(
        &self,
        request: &ProviderRequest,
    ) -> std::result::Result<ProviderOutput, ProviderError> {
        match (&self.backend, request) {
            (Backend::Text(p), ProviderRequest::GenerateText { prompt, params }) => {
                p.generate_text(prompt, params).await.map(ProviderOutput::Text)
            }
            (Backend::Speech(p), ProviderRequest::SynthesizeSpeech { text, params }) => {
                p.synthesize_speech(text, params)
                    .await
                    .map(ProviderOutput::Audio)
            }
            _ => Err(ProviderError::Configuration(format!(
                "{} does not support {}",
                self.name,
                request.capability()
            ))),
        }
    }

    async fn is_available(&self) -> bool {
        match &self.backend {
            Backend::Text(p) => p.is_available().await,
            Backend::Speech(p) => p.is_available().await,
        }
    }
}

/// Reject results that cannot be delivered
fn validate(output: ProviderOutput) -> std::result::Result<ProviderOutput, ProviderError> {
    let malformed = match &output {
        ProviderOutput::Text(text) => text.trim().is_empty().then_some("empty text"),
        ProviderOutput::Audio(clip) => clip.data.is_empty().then_some("empty audio"),
    };
    match malformed {
        Some(reason) => Err(ProviderError::MalformedResponse(reason.to_string())),
        None => Ok(output),
    }
}

/// Registry of interchangeable providers per capability
pub struct ProviderRegistry {
    text: RwLock<Vec<Registered>>,
    speech: RwLock<Vec<Registered>>,
    text_timeout: Duration,
    speech_timeout: Duration,
    sink: Arc<dyn OutcomeSink>,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    fn slots(&self, capability: Capability) -> &RwLock<Vec<Registered>> {
        match capability {
            Capability::GenerateText => &self.text,
            Capability::SynthesizeSpeech => &self.speech,
        }
    }

    /// Per-attempt timeout for `capability`
    pub fn timeout(&self, capability: Capability) -> Duration {
        match capability {
            Capability::GenerateText => self.text_timeout,
            Capability::SynthesizeSpeech => self.speech_timeout,
        }
    }

    pub fn has_providers(&self, capability: Capability) -> bool {
        !self.slots(capability).read().is_empty()
    }

    /// Try providers in rank order until one returns a well-formed result
    ///
    /// Fails with `AllProvidersExhausted` when every provider for the capability
    /// failed, or none is configured.
    pub async fn invoke(
        &self,
        capability: Capability,
        request: ProviderRequest,
    ) -> Result<Invocation<ProviderOutput>> {
        if request.capability() != capability {
            return Err(Error::InvalidInput(format!(
                "{} request sent to {}",
                request.capability(),
                capability
            )));
        }

        // Snapshot so a concurrent promote does not affect an in-flight call
        let providers = self.slots(capability).read().clone();
        let timeout = self.timeout(capability);
        let mut attempts = Vec::with_capacity(providers.len());

        for (rank, provider) in providers.iter().enumerate() {
            let start = Instant::now();
            let result = match tokio::time::timeout(timeout, provider.call(&request)).await {
                Ok(result) => result.and_then(validate),
                Err(_) => Err(ProviderError::Timeout {
                    after_ms: timeout.as_millis() as u64,
                }),
            };

            let outcome = AttemptOutcome {
                capability,
                provider: provider.name.clone(),
                rank: rank as u32,
                latency_ms: start.elapsed().as_millis() as u64,
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            };
            self.sink.record(&outcome);
            attempts.push(outcome);

            if let Ok(value) = result {
                return Ok(Invocation {
                    value,
                    provider: provider.name.clone(),
                    attempts,
                });
            }
        }

        Err(Error::AllProvidersExhausted {
            capability,
            attempts: attempts.len(),
        })
    }

    pub async fn generate_text(
        &self,
        prompt: Prompt,
        params: GenerationParams,
    ) -> Result<Invocation<String>> {
        let invocation = self
            .invoke(
                Capability::GenerateText,
                ProviderRequest::GenerateText { prompt, params },
            )
            .await?;

        let Invocation {
            value,
            provider,
            attempts,
        } = invocation;
        match value {
            ProviderOutput::Text(text) => Ok(Invocation {
                value: text,
                provider,
                attempts,
            }),
            ProviderOutput::Audio(_) => Err(Error::Provider {
                provider,
                source: ProviderError::MalformedResponse("audio returned for text".to_string()),
            }),
        }
    }

    pub async fn synthesize_speech(
        &self,
        text: impl Into<String>,
        params: SpeechParams,
    ) -> Result<Invocation<AudioClip>> {
        let invocation = self
            .invoke(
                Capability::SynthesizeSpeech,
                ProviderRequest::SynthesizeSpeech {
                    text: text.into(),
                    params,
                },
            )
            .await?;

        let Invocation {
            value,
            provider,
            attempts,
        } = invocation;
        match value {
            ProviderOutput::Audio(clip) => Ok(Invocation {
                value: clip,
                provider,
                attempts,
            }),
            ProviderOutput::Text(_) => Err(Error::Provider {
                provider,
                source: ProviderError::MalformedResponse("text returned for audio".to_string()),
            }),
        }
    }

    /// Move `name` to rank 0, keeping the relative order of the others
    pub fn promote(&self, capability: Capability, name: &str) -> std::result::Result<(), LlmError> {
        let mut slots = self.slots(capability).write();
        let index = slots
            .iter()
            .position(|p| p.name == name)
            .ok_or_else(|| LlmError::ProviderNotFound {
                capability,
                name: name.to_string(),
            })?;

        let provider = slots.remove(index);
        slots.insert(0, provider);

        tracing::info!(capability = %capability, provider = %name, "Promoted provider to primary");
        Ok(())
    }

    /// Current fallback order for `capability`
    pub fn descriptors(&self, capability: Capability) -> Vec<ProviderDescriptor> {
        self.slots(capability)
            .read()
            .iter()
            .enumerate()
            .map(|(rank, p)| ProviderDescriptor {
                capability,
                name: p.name.clone(),
                priority_rank: rank as u32,
            })
            .collect()
    }

    /// Descriptors for every capability with availability probed concurrently
    pub async fn statuses(&self) -> Vec<ProviderStatus> {
        let mut probes = Vec::new();
        for capability in [Capability::GenerateText, Capability::SynthesizeSpeech] {
            let providers = self.slots(capability).read().clone();
            for (rank, provider) in providers.into_iter().enumerate() {
                probes.push(async move {
                    ProviderStatus {
                        descriptor: ProviderDescriptor {
                            capability,
                            name: provider.name.clone(),
                            priority_rank: rank as u32,
                        },
                        is_available: provider.is_available().await,
                    }
                });
            }
        }
        futures::future::join_all(probes).await
    }
}

/// Collects providers with declared ranks and validates the order
pub struct ProviderRegistryBuilder {
    text: Vec<(u32, Registered)>,
    speech: Vec<(u32, Registered)>,
    text_timeout: Duration,
    speech_timeout: Duration,
    sink: Arc<dyn OutcomeSink>,
}

impl Default for ProviderRegistryBuilder {
    fn default() -> Self {
        Self {
            text: Vec::new(),
            speech: Vec::new(),
            text_timeout: Duration::from_secs(15),
            speech_timeout: Duration::from_secs(10),
            sink: Arc::new(TracingOutcomeSink),
        }
    }
}

impl ProviderRegistryBuilder {
    pub fn text_generator(mut self, rank: u32, provider: Arc<dyn TextGenerator>) -> Self {
        self.text.push((
            rank,
            Registered {
                name: provider.name().to_string(),
                backend: Backend::Text(provider),
            },
        ));
        self
    }

    pub fn speech_synthesizer(mut self, rank: u32, provider: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech.push((
            rank,
            Registered {
                name: provider.name().to_string(),
                backend: Backend::Speech(provider),
            },
        ));
        self
    }

    pub fn timeout(mut self, capability: Capability, timeout: Duration) -> Self {
        match capability {
            Capability::GenerateText => self.text_timeout = timeout,
            Capability::SynthesizeSpeech => self.speech_timeout = timeout,
        }
        self
    }

    pub fn outcome_sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sort by rank and renumber densely from 0
    ///
    /// Duplicate ranks or names within a capability are rejected.
    pub fn build(self) -> std::result::Result<ProviderRegistry, LlmError> {
        let text = Self::order(Capability::GenerateText, self.text)?;
        let speech = Self::order(Capability::SynthesizeSpeech, self.speech)?;

        tracing::info!(
            text = ?text.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            speech = ?speech.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "Provider registry built"
        );

        Ok(ProviderRegistry {
            text: RwLock::new(text),
            speech: RwLock::new(speech),
            text_timeout: self.text_timeout,
            speech_timeout: self.speech_timeout,
            sink: self.sink,
        })
    }

    fn order(
        capability: Capability,
        mut entries: Vec<(u32, Registered)>,
    ) -> std::result::Result<Vec<Registered>, LlmError> {
        let mut ranks = HashSet::new();
        let mut names = HashSet::new();
        for (rank, provider) in &entries {
            if !ranks.insert(*rank) {
                return Err(LlmError::Configuration(format!(
                    "Duplicate {} rank {}",
                    capability, rank
                )));
            }
            if !names.insert(provider.name.clone()) {
                return Err(LlmError::Configuration(format!(
                    "Duplicate {} provider {}",
                    capability, provider.name
                )));
            }
        }

        entries.sort_by_key(|(rank, _)| *rank);
        Ok(entries.into_iter().map(|(_, p)| p).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedText {
        name: &'static str,
        reply: std::result::Result<&'static str, ProviderError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedText {
        fn ok(name: &'static str, reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok(reply),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Err(ProviderError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                }),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Ok("late"),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedText {
        fn name(&self) -> &str {
            self.name
        }

        async fn generate_text(
            &self,
            _prompt: &Prompt,
            _params: &GenerationParams,
        ) -> std::result::Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.reply.clone().map(str::to_string)
        }
    }

    struct EmptySpeech;

    #[async_trait]
    impl SpeechSynthesizer for EmptySpeech {
        fn name(&self) -> &str {
            "empty"
        }

        async fn synthesize_speech(
            &self,
            _text: &str,
            _params: &SpeechParams,
        ) -> std::result::Result<AudioClip, ProviderError> {
            Ok(AudioClip::new(Vec::new(), "audio/mpeg"))
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            user: "Xin chào".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_last_provider() {
        let sink = Arc::new(RecordingOutcomeSink::new());
        let a = ScriptedText::failing("a");
        let b = ScriptedText::failing("b");
        let c = ScriptedText::ok("c", "Chào bạn!");
        let registry = ProviderRegistry::builder()
            .text_generator(0, a.clone())
            .text_generator(1, b.clone())
            .text_generator(2, c.clone())
            .outcome_sink(sink.clone())
            .build()
            .unwrap();

        let result = registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(result.value, "Chào bạn!");
        assert_eq!(result.provider, "c");
        assert_eq!(result.failed_attempts(), 2);

        let outcomes = sink.outcomes();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes.iter().filter(|o| !o.success).count(), 2);
        assert_eq!(outcomes[2].rank, 2);
    }

    #[tokio::test]
    async fn test_no_memory_between_calls() {
        let a = ScriptedText::failing("a");
        let b = ScriptedText::ok("b", "ok");
        let registry = ProviderRegistry::builder()
            .text_generator(0, a.clone())
            .text_generator(1, b.clone())
            .build()
            .unwrap();

        registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap();
        registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_all_exhausted() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::failing("a"))
            .text_generator(1, ScriptedText::failing("b"))
            .build()
            .unwrap();

        let err = registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::AllProvidersExhausted {
                capability: Capability::GenerateText,
                attempts: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_empty_capability_is_exhausted() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("a", "hi"))
            .build()
            .unwrap();

        let err = registry
            .synthesize_speech("Em đây", SpeechParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllProvidersExhausted { attempts: 0, .. }));
    }

    #[tokio::test]
    async fn test_timeout_advances() {
        let slow = ScriptedText::slow("slow", Duration::from_millis(200));
        let registry = ProviderRegistry::builder()
            .text_generator(0, slow)
            .text_generator(1, ScriptedText::ok("fast", "kịp rồi"))
            .timeout(Capability::GenerateText, Duration::from_millis(20))
            .build()
            .unwrap();

        let result = registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(result.provider, "fast");
        assert!(result.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Timed out"));
    }

    #[tokio::test]
    async fn test_malformed_results_are_failures() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("blank", "   "))
            .text_generator(1, ScriptedText::ok("real", "Dạ"))
            .speech_synthesizer(0, Arc::new(EmptySpeech))
            .build()
            .unwrap();

        let text = registry
            .generate_text(prompt(), GenerationParams::default())
            .await
            .unwrap();
        assert_eq!(text.provider, "real");

        let audio = registry
            .synthesize_speech("Dạ", SpeechParams::default())
            .await;
        assert!(matches!(audio, Err(Error::AllProvidersExhausted { .. })));
    }

    #[test]
    fn test_builder_orders_and_renumbers() {
        let registry = ProviderRegistry::builder()
            .text_generator(10, ScriptedText::ok("second", "x"))
            .text_generator(3, ScriptedText::ok("first", "x"))
            .build()
            .unwrap();

        let descriptors = registry.descriptors(Capability::GenerateText);
        assert_eq!(descriptors[0].name, "first");
        assert_eq!(descriptors[0].priority_rank, 0);
        assert_eq!(descriptors[1].priority_rank, 1);
    }

    #[test]
    fn test_builder_rejects_duplicate_rank() {
        let result = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("a", "x"))
            .text_generator(0, ScriptedText::ok("b", "x"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_promote() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("a", "x"))
            .text_generator(1, ScriptedText::ok("b", "x"))
            .text_generator(2, ScriptedText::ok("c", "x"))
            .build()
            .unwrap();

        registry.promote(Capability::GenerateText, "c").unwrap();
        let names: Vec<_> = registry
            .descriptors(Capability::GenerateText)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        assert!(registry.promote(Capability::GenerateText, "zzz").is_err());
    }

    #[tokio::test]
    async fn test_mismatched_request_rejected() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("a", "x"))
            .build()
            .unwrap();
        let err = registry
            .invoke(
                Capability::SynthesizeSpeech,
                ProviderRequest::GenerateText {
                    prompt: prompt(),
                    params: GenerationParams::default(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_statuses() {
        let registry = ProviderRegistry::builder()
            .text_generator(0, ScriptedText::ok("a", "x"))
            .build()
            .unwrap();
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].is_available);
        assert_eq!(statuses[0].descriptor.priority_rank, 0);
    }
}
