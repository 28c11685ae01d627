//! Core traits for the companion pipeline
//!
//! Every external collaborator sits behind one of these traits so backends can be
//! swapped by configuration and replaced by scripted fakes in tests.
//!
//! ```text
//! Capabilities (registered with the provider registry):
//!   - TextGenerator: prompt -> text
//!   - SpeechSynthesizer: text -> audio
//!
//! Retrieval:
//!   - Embedder: text -> dense vector
//!   - KnowledgeStore: nearest-neighbour search over role-tagged chunks
//!
//! State:
//!   - ProfileStore: identities and bounded conversation history
//!   - CacheStore: trigger key -> cached response
//!   - ArtifactStore: synthesized audio blobs
//! ```

mod llm;
mod retrieval;
mod speech;
mod stores;

pub use llm::TextGenerator;
pub use retrieval::{Embedder, KnowledgeStore};
pub use speech::SpeechSynthesizer;
pub use stores::{ArtifactStore, CacheStore, ProfileStore};
