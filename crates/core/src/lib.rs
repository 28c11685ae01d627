//! Core traits and types for the companion pipeline
//!
//! This crate provides foundational types used across all other crates:
//! - Identity and conversation history types
//! - Knowledge chunks and retrieval results
//! - Provider descriptors, prompts and audio clips
//! - Response cache entries and the per-turn response envelope
//! - Capability and store traits for pluggable backends
//! - The shared error taxonomy

pub mod cache;
pub mod clock;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod knowledge;
pub mod provider;
pub mod traits;

pub use cache::CacheEntry;
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{trim_to_window, ConversationTurn, TurnRole};
pub use envelope::{ResponseEnvelope, TurnFailure};
pub use error::{Error, ProviderError, Result};
pub use identity::Identity;
pub use knowledge::{rank_chunks, KnowledgeChunk, RoleFilter, ScoredChunk};
pub use provider::{
    AudioClip, Capability, ChatMessage, ChatRole, GenerationParams, Prompt, ProviderDescriptor,
    ProviderStatus, SpeechParams,
};

pub use traits::{
    ArtifactStore, CacheStore, Embedder, KnowledgeStore, ProfileStore, SpeechSynthesizer,
    TextGenerator,
};
