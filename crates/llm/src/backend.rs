//! Text generation backends
//!
//! Both backends implement [`TextGenerator`] and are registered with the
//! [`ProviderRegistry`](crate::ProviderRegistry) under their configured names.
//! Transient network failures are retried in-process with exponential backoff;
//! anything else is returned immediately so the registry can fall back.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use companion_core::{ChatMessage, ChatRole, GenerationParams, Prompt, ProviderError, TextGenerator};

use crate::LlmError;

/// Ollama backend configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Model name/ID
    pub model: String,
    /// API endpoint
    pub endpoint: String,
    /// Overrides `GenerationParams::max_tokens` when set
    pub max_tokens: Option<usize>,
    /// Overrides `GenerationParams::temperature` when set
    pub temperature: Option<f32>,
    pub top_p: f32,
    /// HTTP request timeout
    pub timeout: Duration,
    /// Retries for transient failures
    pub max_retries: u32,
    /// Initial backoff (doubles each retry)
    pub initial_backoff: Duration,
    /// Keep model loaded in memory between calls ("5m", "1h", "-1", "0")
    pub keep_alive: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5:7b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            max_tokens: None,
            temperature: None,
            top_p: 0.9,
            timeout: Duration::from_secs(30),
            max_retries: 1,
            initial_backoff: Duration::from_millis(100),
            keep_alive: "5m".to_string(),
        }
    }
}

/// Ollama `/api/chat` backend
#[derive(Clone)]
pub struct OllamaBackend {
    name: String,
    client: Client,
    config: LlmConfig,
}

impl OllamaBackend {
    pub fn new(name: impl Into<String>, config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            client,
            config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn build_request(&self, prompt: &Prompt, params: &GenerationParams) -> OllamaChatRequest {
        OllamaChatRequest {
            model: self.config.model.clone(),
            messages: prompt.messages().iter().map(Into::into).collect(),
            stream: false,
            options: Some(OllamaOptions {
                temperature: Some(self.config.temperature.unwrap_or(params.temperature)),
                top_p: Some(self.config.top_p),
                num_predict: Some(self.config.max_tokens.unwrap_or(params.max_tokens) as i32),
            }),
            keep_alive: Some(self.config.keep_alive.clone()),
            think: Some(false),
        }
    }

    async fn generate(&self, request: &OllamaChatRequest) -> Result<String, LlmError> {
        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::warn!(
                    provider = %self.name,
                    "Request failed, retrying in {:?} (attempt {}/{})",
                    backoff,
                    attempt,
                    self.config.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            match self.execute_request(request).await {
                Ok(response) => return Ok(response.message.content),
                Err(e) if Self::is_retryable(&e) => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("Max retries exceeded".to_string())))
    }

    async fn execute_request(
        &self,
        request: &OllamaChatRequest,
    ) -> Result<OllamaChatResponse, LlmError> {
        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(request)
            .send()
            .await
            .map_err(|e| LlmError::from_request(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error = response.text().await.unwrap_or_default();
            // 5xx errors are retryable, 4xx are not
            if status.is_server_error() {
                return Err(LlmError::Network(format!("Server error {}: {}", status, error)));
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn is_retryable(error: &LlmError) -> bool {
        matches!(error, LlmError::Network(_))
    }
}

#[async_trait]
impl TextGenerator for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let request = self.build_request(prompt, params);
        Ok(self.generate(&request).await?)
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keep_alive: Option<String>,
    /// Disable extended thinking for models like qwen3/deepseek-r1
    #[serde(skip_serializing_if = "Option::is_none")]
    think: Option<bool>,
}

/// Chat message shape shared by Ollama and OpenAI-compatible APIs
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role: role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: WireMessage,
}

// =============================================================================
// OpenAI-compatible Backend
// =============================================================================

/// Configuration for OpenAI-compatible backends
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API endpoint (OpenAI: https://api.openai.com/v1, Azure: resource URL)
    pub endpoint: String,
    pub api_key: String,
    /// Model name, or deployment name on Azure
    pub model: String,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout: Duration,
    /// Azure API version (Azure specific)
    pub api_version: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: None,
            timeout: Duration::from_secs(30),
            api_version: None,
        }
    }
}

impl OpenAIConfig {
    /// Create config for OpenAI
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            ..Default::default()
        }
    }

    /// Create config for Azure OpenAI
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: deployment.into(),
            api_version: Some(api_version.into()),
            ..Default::default()
        }
    }

    /// Create config for a local OpenAI-compatible server (vLLM, llama.cpp)
    pub fn local(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: "not-needed".to_string(),
            model: model.into(),
            ..Default::default()
        }
    }
}

/// OpenAI-compatible chat completions backend
///
/// Works with OpenAI, Azure OpenAI, Groq, vLLM and other compatible servers.
pub struct OpenAIBackend {
    name: String,
    config: OpenAIConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(name: impl Into<String>, config: OpenAIConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() && !is_local(&config.endpoint) {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }

    /// Full API URL for chat completions
    fn chat_url(&self) -> String {
        if let Some(ref api_version) = self.config.api_version {
            // Azure format: {endpoint}/openai/deployments/{model}/chat/completions?api-version={version}
            format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.config.endpoint.trim_end_matches('/'),
                self.config.model,
                api_version
            )
        } else {
            format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
        }
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        auth_headers(&self.config.api_key, self.config.api_version.is_some())
    }
}

#[async_trait]
impl TextGenerator for OpenAIBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate_text(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let request = OpenAIChatRequest {
            model: self.config.model.clone(),
            messages: prompt.messages().iter().map(Into::into).collect(),
            max_tokens: Some(self.config.max_tokens.unwrap_or(params.max_tokens)),
            temperature: Some(self.config.temperature.unwrap_or(params.temperature)),
            stream: Some(false),
        };

        let response = self
            .client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::from_request(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_text,
            }
            .into());
        }

        let response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        Ok(choice.message.content)
    }

    async fn is_available(&self) -> bool {
        if self.config.api_version.is_some() {
            // Azure has no cheap deployment-agnostic probe
            return true;
        }
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

pub(crate) fn is_local(endpoint: &str) -> bool {
    endpoint.starts_with("http://localhost") || endpoint.starts_with("http://127.0.0.1")
}

/// Bearer auth for OpenAI, `api-key` for Azure
pub(crate) fn auth_headers(api_key: &str, azure: bool) -> reqwest::header::HeaderMap {
    use reqwest::header::HeaderValue;

    let mut headers = reqwest::header::HeaderMap::new();

    if azure {
        if let Ok(val) = HeaderValue::from_str(api_key) {
            headers.insert("api-key", val);
        }
    } else if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", api_key)) {
        headers.insert(reqwest::header::AUTHORIZATION, val);
    }

    headers.insert(
        reqwest::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    headers
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: WireMessage,
}
