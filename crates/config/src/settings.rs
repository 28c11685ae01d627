//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// History window, response shaping, owners and pronoun rules
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Text and speech providers in fallback order
    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ambient: AmbientConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Persona YAML; the built-in persona is used when unset
    #[serde(default)]
    pub persona_path: Option<String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_conversation()?;
        self.validate_providers()?;
        self.validate_rag()?;
        self.validate_ambient()?;
        self.validate_persistence()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        let server = &self.server;

        if server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if server.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.timeout_seconds".to_string(),
                message: "Timeout must be at least 1 second".to_string(),
            });
        }

        if self.environment.is_production() && server.cors_enabled && server.cors_origins.is_empty()
        {
            tracing::warn!(
                "CORS is enabled in production but no origins are configured. \
                 This may block legitimate requests."
            );
        }

        Ok(())
    }

    fn validate_conversation(&self) -> Result<(), ConfigError> {
        let conversation = &self.conversation;

        if conversation.window_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.window_size".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if conversation.prompt_history_turns > conversation.window_size {
            return Err(ConfigError::InvalidValue {
                field: "conversation.prompt_history_turns".to_string(),
                message: format!(
                    "Cannot exceed window_size ({})",
                    conversation.window_size
                ),
            });
        }

        if conversation.max_response_sentences == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.max_response_sentences".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if conversation.fallback_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "conversation.fallback_message".to_string(),
                message: "Fallback message cannot be empty".to_string(),
            });
        }

        for (i, rule) in conversation.pronoun_rules.iter().enumerate() {
            if rule.pronoun.trim().is_empty() || rule.phrases.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("conversation.pronoun_rules[{}]", i),
                    message: "Rule needs a pronoun and at least one phrase".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Ranks must form a strict order among enabled providers of each capability
    fn validate_providers(&self) -> Result<(), ConfigError> {
        let providers = &self.providers;

        if providers.generate_text_timeout_ms == 0 || providers.synthesize_speech_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "providers.*_timeout_ms".to_string(),
                message: "Provider timeouts must be positive".to_string(),
            });
        }

        if !providers.text.iter().any(|p| p.enabled) {
            return Err(ConfigError::InvalidValue {
                field: "providers.text".to_string(),
                message: "At least one text provider must be enabled".to_string(),
            });
        }

        for (field, entries, speech) in [
            ("providers.text", &providers.text, false),
            ("providers.speech", &providers.speech, true),
        ] {
            let mut ranks = HashSet::new();
            let mut names = HashSet::new();

            for entry in entries.iter().filter(|p| p.enabled) {
                if entry.kind.is_speech() != speech {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.{}.kind", field, entry.name),
                        message: format!("Provider kind {:?} does not belong in {}", entry.kind, field),
                    });
                }
                if !ranks.insert(entry.rank) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.{}.rank", field, entry.name),
                        message: format!("Duplicate rank {}", entry.rank),
                    });
                }
                if !names.insert(entry.name.as_str()) {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.{}", field, entry.name),
                        message: "Duplicate provider name".to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_rag(&self) -> Result<(), ConfigError> {
        let rag = &self.rag;

        if rag.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.top_k".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(-1.0..=1.0).contains(&rag.min_score) {
            return Err(ConfigError::InvalidValue {
                field: "rag.min_score".to_string(),
                message: format!("Must be between -1.0 and 1.0, got {}", rag.min_score),
            });
        }

        if rag.embedding.dim == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.embedding.dim".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if rag.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rag.timeout_ms".to_string(),
                message: "Must be positive".to_string(),
            });
        }

        Ok(())
    }

    fn validate_ambient(&self) -> Result<(), ConfigError> {
        let ambient = &self.ambient;

        if ambient.idle_threshold_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ambient.idle_threshold_secs".to_string(),
                message: "Must be at least 1 second".to_string(),
            });
        }

        if ambient.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ambient.tick_interval_secs".to_string(),
                message: "Must be at least 1 second".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&ambient.accent_probability) {
            return Err(ConfigError::InvalidValue {
                field: "ambient.accent_probability".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    ambient.accent_probability
                ),
            });
        }

        Ok(())
    }

    fn validate_persistence(&self) -> Result<(), ConfigError> {
        if self.persistence.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "persistence.timeout_ms".to_string(),
                message: "Must be at least 1ms".to_string(),
            });
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_timeout() -> u64 {
    60
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_seconds: default_timeout(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    /// OTLP endpoint for traces (requires the `telemetry` feature)
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            tracing_enabled: true,
            otlp_endpoint: None,
            metrics_enabled: true,
        }
    }
}

/// Explicit self-statement that confirms how an identity wants to be addressed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronounRule {
    pub pronoun: String,
    pub phrases: Vec<String>,
}

/// Conversation state and response shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum turns kept per identity
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Recent turns included in the prompt
    #[serde(default = "default_prompt_history_turns")]
    pub prompt_history_turns: usize,

    /// Responses longer than this are shortened
    #[serde(default = "default_max_response_words")]
    pub max_response_words: usize,

    /// Sentences kept when shortening
    #[serde(default = "default_max_response_sentences")]
    pub max_response_sentences: usize,

    /// Identity ids treated as the owner; `OWNER_USER_ID` is appended when set
    #[serde(default = "default_owner_ids")]
    pub owner_ids: Vec<String>,

    /// Roles always included in a non-empty retrieval filter
    #[serde(default = "default_roles")]
    pub default_roles: Vec<String>,

    /// Role name -> keywords that select it for a turn
    #[serde(default)]
    pub role_keywords: BTreeMap<String, Vec<String>>,

    #[serde(default = "default_pronoun_rules")]
    pub pronoun_rules: Vec<PronounRule>,

    /// In-character text returned when a turn fails
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

fn default_window_size() -> usize {
    20
}
fn default_prompt_history_turns() -> usize {
    3
}
fn default_max_response_words() -> usize {
    50
}
fn default_max_response_sentences() -> usize {
    2
}
fn default_owner_ids() -> Vec<String> {
    std::env::var("OWNER_USER_ID")
        .ok()
        .filter(|id| !id.trim().is_empty())
        .map(|id| vec![id.trim().to_string()])
        .unwrap_or_default()
}
fn default_roles() -> Vec<String> {
    vec!["general".to_string()]
}
fn default_pronoun_rules() -> Vec<PronounRule> {
    vec![
        PronounRule {
            pronoun: "chị".to_string(),
            phrases: ["em là nữ", "tôi là nữ", "mình là nữ", "em là con gái", "tôi là con gái"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
        PronounRule {
            pronoun: "anh".to_string(),
            phrases: ["em là nam", "tôi là nam", "mình là nam", "em là con trai", "tôi là con trai"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        },
    ]
}
fn default_fallback_message() -> String {
    "Xin lỗi, em hơi bối rối chút. Có vẻ kết nối bị trục trặc rồi. Bạn có thể nói lại được không?"
        .to_string()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            prompt_history_turns: default_prompt_history_turns(),
            max_response_words: default_max_response_words(),
            max_response_sentences: default_max_response_sentences(),
            owner_ids: default_owner_ids(),
            default_roles: default_roles(),
            role_keywords: BTreeMap::new(),
            pronoun_rules: default_pronoun_rules(),
            fallback_message: default_fallback_message(),
        }
    }
}

/// Provider adapter type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Ollama `/api/chat`
    Ollama,
    /// OpenAI-compatible chat completions
    #[serde(alias = "openai")]
    OpenAi,
    /// Azure OpenAI deployment
    Azure,
    /// OpenAI `/v1/audio/speech`
    #[serde(alias = "openai_tts")]
    OpenAiSpeech,
    ElevenLabs,
    /// JSON-in, audio-out HTTP endpoint
    HttpSpeech,
}

impl ProviderKind {
    pub fn is_speech(&self) -> bool {
        matches!(self, Self::OpenAiSpeech | Self::ElevenLabs | Self::HttpSpeech)
    }
}

/// One configured provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    /// Fallback position, 0 first
    pub rank: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Name of the environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Azure API version
    #[serde(default)]
    pub api_version: Option<String>,
}

impl ProviderEntry {
    pub fn new(name: impl Into<String>, kind: ProviderKind, rank: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            rank,
            enabled: true,
            endpoint: None,
            model: None,
            api_key_env: None,
            voice: None,
            max_tokens: None,
            temperature: None,
            api_version: None,
        }
    }

    /// Resolve the API key from `api_key_env`
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
    }
}

/// Providers per capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Per-attempt bound for `generate_text`
    #[serde(default = "default_generate_timeout_ms")]
    pub generate_text_timeout_ms: u64,

    /// Per-attempt bound for `synthesize_speech`
    #[serde(default = "default_speech_timeout_ms")]
    pub synthesize_speech_timeout_ms: u64,

    #[serde(default = "default_text_providers")]
    pub text: Vec<ProviderEntry>,

    #[serde(default = "default_speech_providers")]
    pub speech: Vec<ProviderEntry>,
}

fn default_generate_timeout_ms() -> u64 {
    15_000
}
fn default_speech_timeout_ms() -> u64 {
    10_000
}
fn default_text_providers() -> Vec<ProviderEntry> {
    vec![
        ProviderEntry {
            endpoint: Some("http://localhost:11434".to_string()),
            model: Some("qwen2.5:7b".to_string()),
            ..ProviderEntry::new("ollama", ProviderKind::Ollama, 0)
        },
        ProviderEntry {
            endpoint: Some("https://api.openai.com/v1".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            ..ProviderEntry::new("openai", ProviderKind::OpenAi, 1)
        },
    ]
}
fn default_speech_providers() -> Vec<ProviderEntry> {
    vec![
        ProviderEntry {
            endpoint: Some("https://api.openai.com/v1".to_string()),
            model: Some("tts-1".to_string()),
            voice: Some("nova".to_string()),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            ..ProviderEntry::new("openai_tts", ProviderKind::OpenAiSpeech, 0)
        },
        ProviderEntry {
            endpoint: Some("https://api.elevenlabs.io".to_string()),
            model: Some("eleven_multilingual_v2".to_string()),
            voice: Some("EXAVITQu4vr4xnSDxMaL".to_string()),
            api_key_env: Some("ELEVENLABS_API_KEY".to_string()),
            ..ProviderEntry::new("elevenlabs", ProviderKind::ElevenLabs, 1)
        },
    ]
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            generate_text_timeout_ms: default_generate_timeout_ms(),
            synthesize_speech_timeout_ms: default_speech_timeout_ms(),
            text: default_text_providers(),
            speech: default_speech_providers(),
        }
    }
}

/// Knowledge store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBackend {
    #[default]
    Memory,
    Qdrant,
}

/// Embedding backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingKind {
    /// Deterministic feature hashing, no external service
    #[default]
    Hash,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub kind: EmbeddingKind,
    #[serde(default = "default_ollama_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_vector_dim")]
    pub dim: usize,
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_vector_dim() -> usize {
    384
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: EmbeddingKind::default(),
            endpoint: default_ollama_endpoint(),
            model: default_embedding_model(),
            dim: default_vector_dim(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QdrantConfig {
    #[serde(default = "default_qdrant_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_qdrant_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_qdrant_endpoint() -> String {
    "http://localhost:6334".to_string()
}
fn default_qdrant_collection() -> String {
    "companion_knowledge".to_string()
}

impl Default for QdrantConfig {
    fn default() -> Self {
        Self {
            endpoint: default_qdrant_endpoint(),
            collection: default_qdrant_collection(),
            api_key: None,
        }
    }
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: KnowledgeBackend,

    /// Chunks returned per query
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Chunks scoring below this are dropped
    #[serde(default)]
    pub min_score: f32,

    /// Bound on embed + search
    #[serde(default = "default_rag_timeout_ms")]
    pub timeout_ms: u64,

    /// Joins chunks in the context string
    #[serde(default = "default_separator")]
    pub separator: String,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub qdrant: QdrantConfig,

    /// YAML knowledge file loaded into the in-memory store at startup
    #[serde(default)]
    pub knowledge_path: Option<String>,
}

fn default_top_k() -> usize {
    3
}
fn default_rag_timeout_ms() -> u64 {
    8_000
}
fn default_separator() -> String {
    "\n---\n".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: KnowledgeBackend::default(),
            top_k: default_top_k(),
            min_score: 0.0,
            timeout_ms: default_rag_timeout_ms(),
            separator: default_separator(),
            embedding: EmbeddingConfig::default(),
            qdrant: QdrantConfig::default(),
            knowledge_path: None,
        }
    }
}

/// Cache entry inserted at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePreloadEntry {
    pub trigger_key: String,
    pub text: String,
    pub audio_ref: String,
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Phrases whose first generated response is cached; normalized before use
    #[serde(default = "default_trigger_phrases")]
    pub trigger_phrases: Vec<String>,

    /// Directory for synthesized audio artifacts
    #[serde(default = "default_audio_dir")]
    pub audio_dir: String,

    #[serde(default)]
    pub preload: Vec<CachePreloadEntry>,
}

fn default_trigger_phrases() -> Vec<String> {
    ["hi meilin", "hey meilin", "meilin ơi", "chào meilin"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_audio_dir() -> String {
    "data/audio".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_phrases: default_trigger_phrases(),
            audio_dir: default_audio_dir(),
            preload: Vec::new(),
        }
    }
}

/// Ambient behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbientConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Idle time before a behavior may fire, scaled by the mode multiplier
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Scheduler tick period
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(default = "default_mode")]
    pub default_mode: String,

    /// Chance of prefixing a reply with a context-matched behavior sound
    #[serde(default)]
    pub accent_probability: f64,

    /// Behavior catalog YAML; the built-in catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<String>,
}

fn default_idle_threshold() -> u64 {
    60
}
fn default_tick_interval() -> u64 {
    5
}
fn default_mode() -> String {
    crate::ambient::DEFAULT_MODE.to_string()
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            idle_threshold_secs: default_idle_threshold(),
            tick_interval_secs: default_tick_interval(),
            default_mode: default_mode(),
            accent_probability: 0.0,
            catalog_path: None,
        }
    }
}

/// Persistence configuration for ScyllaDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable ScyllaDB persistence (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,

    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,

    /// Bound on each profile store call, in-memory stores included
    #[serde(default = "default_persistence_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}

fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| "companion".to_string())
}

fn default_replication_factor() -> u8 {
    1
}

fn default_persistence_timeout_ms() -> u64 {
    2_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
            timeout_ms: default_persistence_timeout_ms(),
        }
    }
}

/// Load settings from `config/` and the environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (`COMPANION__` prefix, e.g. `COMPANION__SERVER__PORT`)
/// 2. config/{env}.yaml|toml (if env specified)
/// 3. config/default.yaml|toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    load_settings_from(Path::new("config"), env)
}

/// Same as [`load_settings`] with an explicit config directory
pub fn load_settings_from(dir: &Path, env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    let base = dir.join("default");
    builder = builder.add_source(File::with_name(&base.to_string_lossy()).required(false));

    if let Some(env_name) = env {
        let overlay = dir.join(env_name);
        builder =
            builder.add_source(File::with_name(&overlay.to_string_lossy()).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("COMPANION")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.conversation.window_size, 20);
        assert_eq!(settings.ambient.idle_threshold_secs, 60);
        assert_eq!(settings.providers.text[0].rank, 0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_server_validation() {
        let mut settings = Settings::default();

        settings.server.port = 0;
        assert!(settings.validate_server().is_err());
        settings.server.port = 8080;

        settings.server.timeout_seconds = 0;
        assert!(settings.validate_server().is_err());
        settings.server.timeout_seconds = 30;

        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn test_conversation_validation() {
        let mut settings = Settings::default();

        settings.conversation.window_size = 0;
        assert!(settings.validate_conversation().is_err());

        settings.conversation.window_size = 2;
        settings.conversation.prompt_history_turns = 3;
        assert!(settings.validate_conversation().is_err());

        settings.conversation.prompt_history_turns = 2;
        assert!(settings.validate_conversation().is_ok());

        settings.conversation.fallback_message = "  ".to_string();
        assert!(settings.validate_conversation().is_err());
    }

    #[test]
    fn test_duplicate_rank_rejected() {
        let mut settings = Settings::default();
        settings.providers.text[1].rank = 0;
        assert!(settings.validate_providers().is_err());

        // A disabled entry does not take part in ordering
        settings.providers.text[1].enabled = false;
        assert!(settings.validate_providers().is_ok());
    }

    #[test]
    fn test_no_text_provider_rejected() {
        let mut settings = Settings::default();
        for entry in &mut settings.providers.text {
            entry.enabled = false;
        }
        assert!(settings.validate_providers().is_err());
    }

    #[test]
    fn test_speech_kind_in_text_list_rejected() {
        let mut settings = Settings::default();
        settings
            .providers
            .text
            .push(ProviderEntry::new("tts", ProviderKind::ElevenLabs, 5));
        assert!(settings.validate_providers().is_err());
    }

    #[test]
    fn test_ambient_validation() {
        let mut settings = Settings::default();
        settings.ambient.accent_probability = 1.5;
        assert!(settings.validate_ambient().is_err());

        settings.ambient.accent_probability = 0.1;
        settings.ambient.idle_threshold_secs = 0;
        assert!(settings.validate_ambient().is_err());
    }

    #[test]
    fn test_persistence_timeout_validation() {
        let mut settings = Settings::default();
        assert_eq!(settings.persistence.timeout_ms, 2_000);

        settings.persistence.timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[server]
port = 9100

[conversation]
window_size = 8
owner_ids = ["UC-owner"]

[ambient]
default_mode = "calm"
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.yaml"),
            "server:\n  port: 9200\n",
        )
        .unwrap();

        let settings = load_settings_from(dir.path(), None).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.conversation.window_size, 8);
        assert_eq!(settings.conversation.owner_ids, vec!["UC-owner".to_string()]);
        assert_eq!(settings.ambient.default_mode, "calm");

        let staging = load_settings_from(dir.path(), Some("staging")).unwrap();
        assert_eq!(staging.server.port, 9200);
        assert_eq!(staging.conversation.window_size, 8);
    }

    #[test]
    fn test_provider_kind_serde() {
        let entry: ProviderEntry = serde_yaml::from_str(
            "name: tts\nkind: openai_tts\nrank: 0\nvoice: nova\n",
        )
        .unwrap();
        assert_eq!(entry.kind, ProviderKind::OpenAiSpeech);
        assert!(entry.enabled);
        assert!(entry.kind.is_speech());
    }
}
