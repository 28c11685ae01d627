//! Audio artifact storage
//!
//! References are opaque file names (`<uuid>.<ext>`); callers resolve them back
//! through the same store.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use companion_core::{ArtifactStore, AudioClip, Error, Result};

fn new_ref(clip: &AudioClip) -> String {
    format!("{}.{}", Uuid::new_v4(), clip.extension())
}

fn mime_for(audio_ref: &str) -> &'static str {
    match Path::new(audio_ref).extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("pcm") => "audio/pcm",
        _ => "application/octet-stream",
    }
}

/// Reject references that could escape the artifact directory
fn validate_ref(audio_ref: &str) -> Result<()> {
    let valid = !audio_ref.is_empty()
        && !audio_ref.starts_with('.')
        && audio_ref
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid audio reference: {}", audio_ref)))
    }
}

/// Artifacts written as files under a directory
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    /// Create the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, clip: &AudioClip) -> Result<String> {
        let audio_ref = new_ref(clip);
        let path = self.dir.join(&audio_ref);
        tokio::fs::write(&path, &clip.data)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {}", path.display(), e)))?;

        tracing::debug!(audio_ref = %audio_ref, bytes = clip.data.len(), "Stored audio artifact");
        Ok(audio_ref)
    }

    async fn get(&self, audio_ref: &str) -> Result<Option<AudioClip>> {
        validate_ref(audio_ref)?;
        match tokio::fs::read(self.dir.join(audio_ref)).await {
            Ok(data) => Ok(Some(AudioClip::new(data, mime_for(audio_ref)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(e.to_string())),
        }
    }
}

/// Process-local artifacts, for tests and ephemeral deployments
#[derive(Default)]
pub struct InMemoryArtifactStore {
    clips: DashMap<String, AudioClip>,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, clip: &AudioClip) -> Result<String> {
        let audio_ref = new_ref(clip);
        self.clips.insert(audio_ref.clone(), clip.clone());
        Ok(audio_ref)
    }

    async fn get(&self, audio_ref: &str) -> Result<Option<AudioClip>> {
        Ok(self.clips.get(audio_ref).map(|c| c.value().clone()))
    }
}
