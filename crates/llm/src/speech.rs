//! Speech synthesis backends
//!
//! - [`OpenAISpeech`]: `POST {endpoint}/audio/speech`
//! - [`ElevenLabsSpeech`]: `POST {endpoint}/v1/text-to-speech/{voice_id}`
//! - [`HttpSpeech`]: any server accepting `{"text", "voice", "speed"}` and returning audio bytes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use companion_core::{AudioClip, ProviderError, SpeechParams, SpeechSynthesizer};

use crate::backend::{auth_headers, is_local};
use crate::LlmError;

/// Shared speech backend configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Voice used when the request does not name one
    pub default_voice: String,
    pub timeout: Duration,
}

impl SpeechConfig {
    pub fn new(endpoint: impl Into<String>, default_voice: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: None,
            default_voice: default_voice.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    fn voice<'a>(&'a self, params: &'a SpeechParams) -> &'a str {
        params.voice.as_deref().unwrap_or(&self.default_voice)
    }

    fn require_key(&self) -> Result<&str, LlmError> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ if is_local(&self.endpoint) => Ok(""),
            _ => Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            )),
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

/// Read an audio response, mapping HTTP failures and empty bodies to errors
async fn read_audio(
    response: reqwest::Response,
    default_mime: &str,
    timeout: Duration,
) -> Result<AudioClip, LlmError> {
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(if status.is_server_error() {
            LlmError::Network(format!("Server error {}: {}", status, message))
        } else {
            LlmError::Api {
                status: status.as_u16(),
                message,
            }
        });
    }

    let mime_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|v| v.starts_with("audio/"))
        .unwrap_or_else(|| default_mime.to_string());

    let data = response
        .bytes()
        .await
        .map_err(|e| LlmError::from_request(e, timeout))?;

    if data.is_empty() {
        return Err(LlmError::InvalidResponse("Empty audio body".to_string()));
    }

    Ok(AudioClip::new(data.to_vec(), mime_type))
}

// =============================================================================
// OpenAI
// =============================================================================

pub struct OpenAISpeech {
    name: String,
    config: SpeechConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct OpenAISpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    response_format: &'a str,
}

impl OpenAISpeech {
    pub fn new(name: impl Into<String>, config: SpeechConfig) -> Result<Self, LlmError> {
        config.require_key()?;
        Ok(Self {
            name: name.into(),
            client: build_client(config.timeout)?,
            config,
        })
    }

    fn speech_url(&self) -> String {
        format!("{}/audio/speech", self.config.endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAISpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioClip, ProviderError> {
        let api_key = self.config.require_key()?;
        let request = OpenAISpeechRequest {
            model: self.config.model.as_deref().unwrap_or("tts-1"),
            input: text,
            voice: self.config.voice(params),
            speed: params.speed,
            response_format: "mp3",
        };

        let response = self
            .client
            .post(self.speech_url())
            .headers(auth_headers(api_key, false))
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_request(e, self.config.timeout))?;

        Ok(read_audio(response, "audio/mpeg", self.config.timeout).await?)
    }
}

// =============================================================================
// ElevenLabs
// =============================================================================

pub struct ElevenLabsSpeech {
    name: String,
    config: SpeechConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Debug, Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    style: f32,
    use_speaker_boost: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

impl ElevenLabsSpeech {
    pub fn new(name: impl Into<String>, config: SpeechConfig) -> Result<Self, LlmError> {
        config.require_key()?;
        Ok(Self {
            name: name.into(),
            client: build_client(config.timeout)?,
            config,
        })
    }

    fn speech_url(&self, voice: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.endpoint.trim_end_matches('/'),
            voice
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioClip, ProviderError> {
        let api_key = self.config.require_key()?;
        let request = ElevenLabsRequest {
            text,
            model_id: self
                .config
                .model
                .as_deref()
                .unwrap_or("eleven_multilingual_v2"),
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.7,
                style: 0.5,
                use_speaker_boost: true,
                speed: params.speed,
            },
        };

        let response = self
            .client
            .post(self.speech_url(self.config.voice(params)))
            .header("xi-api-key", api_key)
            .header(reqwest::header::ACCEPT, "audio/mpeg")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_request(e, self.config.timeout))?;

        Ok(read_audio(response, "audio/mpeg", self.config.timeout).await?)
    }
}

// =============================================================================
// Generic HTTP
// =============================================================================

/// Self-hosted synthesis server (Piper, Coqui and similar)
pub struct HttpSpeech {
    name: String,
    config: SpeechConfig,
    client: Client,
}

#[derive(Debug, Serialize)]
struct HttpSpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

impl HttpSpeech {
    pub fn new(name: impl Into<String>, config: SpeechConfig) -> Result<Self, LlmError> {
        Ok(Self {
            name: name.into(),
            client: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeech {
    fn name(&self) -> &str {
        &self.name
    }

    async fn synthesize_speech(
        &self,
        text: &str,
        params: &SpeechParams,
    ) -> Result<AudioClip, ProviderError> {
        let mut request = self.client.post(&self.config.endpoint).json(&HttpSpeechRequest {
            text,
            voice: self.config.voice(params),
            speed: params.speed,
        });
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| LlmError::from_request(e, self.config.timeout))?;

        Ok(read_audio(response, "audio/wav", self.config.timeout).await?)
    }
}
