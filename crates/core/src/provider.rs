//! Provider descriptors and capability request/response types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named unit of external work with interchangeable implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    GenerateText,
    SynthesizeSpeech,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GenerateText => "generate_text",
            Capability::SynthesizeSpeech => "synthesize_speech",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generate_text" | "llm" | "text" => Some(Capability::GenerateText),
            "synthesize_speech" | "tts" | "speech" => Some(Capability::SynthesizeSpeech),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured provider slot; rank 0 is the primary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub capability: Capability,
    pub name: String,
    pub priority_rank: u32,
}

/// Descriptor with its derived availability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub descriptor: ProviderDescriptor,
    pub is_available: bool,
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Assembled generation prompt
///
/// Chat-style adapters send `messages()`; completion-style adapters send `render()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Persona, instructions and retrieved context
    pub system: String,
    /// Bounded recent history, oldest first
    pub history: Vec<ChatMessage>,
    /// The new user message
    pub user: String,
}

impl Prompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system.is_empty() {
            messages.push(ChatMessage::system(self.system.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(self.user.clone()));
        messages
    }

    /// Flatten into a single completion prompt
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.system.is_empty() {
            out.push_str(&self.system);
            out.push_str("\n\n");
        }
        for message in &self.history {
            let label = match message.role {
                ChatRole::System => "System",
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            out.push_str(label);
            out.push_str(": ");
            out.push_str(&message.content);
            out.push('\n');
        }
        out.push_str("User: ");
        out.push_str(&self.user);
        out.push_str("\nAssistant:");
        out
    }
}

/// Text generation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.8,
        }
    }
}

/// Speech synthesis parameters; `None` means the provider's configured default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeechParams {
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Synthesized audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// File extension matching the mime type
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/ogg" | "audio/opus" => "ogg",
            "audio/pcm" | "audio/L16" => "pcm",
            _ => "bin",
        }
    }
}
