//! Provider factory
//!
//! Builds a [`ProviderRegistry`] from `ProvidersConfig`. Each enabled entry is
//! turned into a concrete backend; entries that cannot be constructed (missing
//! API key, bad client settings) are skipped with a warning so the remaining
//! providers still serve. At least one text generator must survive.

use std::sync::Arc;
use std::time::Duration;

use companion_config::{ProviderEntry, ProviderKind, ProvidersConfig};
use companion_core::{Capability, SpeechSynthesizer, TextGenerator};

use crate::backend::{LlmConfig, OllamaBackend, OpenAIBackend, OpenAIConfig};
use crate::registry::{OutcomeSink, ProviderRegistry, TracingOutcomeSink};
use crate::speech::{ElevenLabsSpeech, HttpSpeech, OpenAISpeech, SpeechConfig};
use crate::LlmError;

/// Creates providers from configuration
pub struct ProviderFactory;

impl ProviderFactory {
    /// Build the registry with the default tracing/metrics outcome sink
    pub fn build(config: &ProvidersConfig) -> Result<ProviderRegistry, LlmError> {
        Self::build_with_sink(config, Arc::new(TracingOutcomeSink))
    }

    pub fn build_with_sink(
        config: &ProvidersConfig,
        sink: Arc<dyn OutcomeSink>,
    ) -> Result<ProviderRegistry, LlmError> {
        let text_timeout = Duration::from_millis(config.generate_text_timeout_ms);
        let speech_timeout = Duration::from_millis(config.synthesize_speech_timeout_ms);

        let mut builder = ProviderRegistry::builder()
            .timeout(Capability::GenerateText, text_timeout)
            .timeout(Capability::SynthesizeSpeech, speech_timeout)
            .outcome_sink(sink);

        let mut text_count = 0;
        for entry in config.text.iter().filter(|e| e.enabled) {
            match Self::create_text(entry, text_timeout) {
                Ok(provider) => {
                    builder = builder.text_generator(entry.rank, provider);
                    text_count += 1;
                }
                Err(e) => {
                    tracing::warn!(provider = %entry.name, error = %e, "Skipping text provider");
                }
            }
        }

        for entry in config.speech.iter().filter(|e| e.enabled) {
            match Self::create_speech(entry, speech_timeout) {
                Ok(provider) => builder = builder.speech_synthesizer(entry.rank, provider),
                Err(e) => {
                    tracing::warn!(provider = %entry.name, error = %e, "Skipping speech provider");
                }
            }
        }

        if text_count == 0 {
            return Err(LlmError::Configuration(
                "No usable text generation provider".to_string(),
            ));
        }

        builder.build()
    }

    /// Create a text generator for one entry
    pub fn create_text(
        entry: &ProviderEntry,
        timeout: Duration,
    ) -> Result<Arc<dyn TextGenerator>, LlmError> {
        match entry.kind {
            ProviderKind::Ollama => {
                let defaults = LlmConfig::default();
                let config = LlmConfig {
                    model: entry.model.clone().unwrap_or(defaults.model),
                    endpoint: entry.endpoint.clone().unwrap_or(defaults.endpoint),
                    max_tokens: entry.max_tokens,
                    temperature: entry.temperature,
                    timeout,
                    ..defaults
                };
                Ok(Arc::new(OllamaBackend::new(&entry.name, config)?))
            }
            ProviderKind::OpenAi => {
                let defaults = OpenAIConfig::default();
                let config = OpenAIConfig {
                    endpoint: entry.endpoint.clone().unwrap_or(defaults.endpoint),
                    api_key: entry.api_key().unwrap_or_default(),
                    model: entry.model.clone().unwrap_or(defaults.model),
                    max_tokens: entry.max_tokens,
                    temperature: entry.temperature,
                    timeout,
                    api_version: None,
                };
                Ok(Arc::new(OpenAIBackend::new(&entry.name, config)?))
            }
            ProviderKind::Azure => {
                let endpoint = entry.endpoint.clone().ok_or_else(|| {
                    LlmError::Configuration(format!("{} requires an endpoint", entry.name))
                })?;
                let deployment = entry.model.clone().ok_or_else(|| {
                    LlmError::Configuration(format!("{} requires a deployment model", entry.name))
                })?;
                let api_version = entry
                    .api_version
                    .clone()
                    .unwrap_or_else(|| "2024-02-01".to_string());
                let config = OpenAIConfig {
                    max_tokens: entry.max_tokens,
                    temperature: entry.temperature,
                    timeout,
                    ..OpenAIConfig::azure(
                        endpoint,
                        entry.api_key().unwrap_or_default(),
                        deployment,
                        api_version,
                    )
                };
                Ok(Arc::new(OpenAIBackend::new(&entry.name, config)?))
            }
            kind => Err(LlmError::Configuration(format!(
                "{:?} is not a text generation provider",
                kind
            ))),
        }
    }

    /// Create a speech synthesizer for one entry
    pub fn create_speech(
        entry: &ProviderEntry,
        timeout: Duration,
    ) -> Result<Arc<dyn SpeechSynthesizer>, LlmError> {
        let config = |default_endpoint: &str, default_voice: &str| SpeechConfig {
            timeout,
            ..SpeechConfig::new(
                entry.endpoint.as_deref().unwrap_or(default_endpoint),
                entry.voice.as_deref().unwrap_or(default_voice),
            )
            .with_api_key(entry.api_key())
            .with_model(entry.model.clone())
        };

        match entry.kind {
            ProviderKind::OpenAiSpeech => Ok(Arc::new(OpenAISpeech::new(
                &entry.name,
                config("https://api.openai.com/v1", "nova"),
            )?)),
            ProviderKind::ElevenLabs => Ok(Arc::new(ElevenLabsSpeech::new(
                &entry.name,
                config("https://api.elevenlabs.io", "d5HVupAWCwe4e6GvMCAL"),
            )?)),
            ProviderKind::HttpSpeech => {
                let endpoint = entry.endpoint.as_deref().ok_or_else(|| {
                    LlmError::Configuration(format!("{} requires an endpoint", entry.name))
                })?;
                Ok(Arc::new(HttpSpeech::new(&entry.name, config(endpoint, "default"))?))
            }
            kind => Err(LlmError::Configuration(format!(
                "{:?} is not a speech provider",
                kind
            ))),
        }
    }
}
