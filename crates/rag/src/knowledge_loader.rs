//! Knowledge Base Loader
//!
//! Loads knowledge documents from YAML/JSON files and embeds them into
//! [`KnowledgeChunk`]s for either knowledge store.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use companion_config::substitute_env_vars;
use companion_core::{Embedder, KnowledgeChunk};

use crate::RagError;

/// Knowledge document format for YAML/JSON files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Unique document ID
    pub id: String,
    /// Text that is embedded and returned as context
    #[serde(alias = "content")]
    pub text: String,
    /// Roles allowed to see this document; empty means only unrestricted queries match
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Overrides the file-level source
    #[serde(default)]
    pub source: Option<String>,
}

/// Knowledge base file format
#[derive(Debug, Serialize, Deserialize)]
pub struct KnowledgeFile {
    /// Version for format compatibility
    #[serde(default)]
    pub version: Option<String>,
    /// Default source label for documents in this file
    #[serde(default)]
    pub source: Option<String>,
    /// Roles applied to documents that declare none
    #[serde(default)]
    pub default_roles: BTreeSet<String>,
    pub documents: Vec<KnowledgeDocument>,
}

/// Knowledge loader
pub struct KnowledgeLoader;

impl KnowledgeLoader {
    /// Parse a knowledge file, expanding `${VAR}` references first
    pub fn parse_file(path: &Path) -> Result<KnowledgeFile, RagError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RagError::Index(format!("Failed to read file: {}", e)))?;
        let content = substitute_env_vars(&content);

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match extension {
            "json" => serde_json::from_str(&content)
                .map_err(|e| RagError::Index(format!("JSON parse error: {}", e))),
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| RagError::Index(format!("YAML parse error: {}", e))),
            _ => Err(RagError::Index(format!(
                "Unsupported file type: {}",
                extension
            ))),
        }
    }

    /// Embed every document of a parsed file
    pub async fn embed_file(
        file: KnowledgeFile,
        default_source: &str,
        embedder: &dyn Embedder,
    ) -> Result<Vec<KnowledgeChunk>, RagError> {
        let file_source = file.source.unwrap_or_else(|| default_source.to_string());
        let mut chunks = Vec::with_capacity(file.documents.len());

        for doc in file.documents {
            let embedding = embedder
                .embed(&doc.text)
                .await
                .map_err(|e| RagError::Embedding(e.to_string()))?;

            let role_tags = if doc.roles.is_empty() {
                file.default_roles.clone()
            } else {
                doc.roles
            };

            chunks.push(KnowledgeChunk {
                id: doc.id,
                text: doc.text,
                embedding,
                role_tags,
                source: doc.source.unwrap_or_else(|| file_source.clone()),
            });
        }

        Ok(chunks)
    }

    /// Load a single file, or every YAML/JSON file of a directory
    ///
    /// Files that fail to parse are logged and skipped; a missing path yields no chunks.
    pub async fn load_path(
        path: &Path,
        embedder: &dyn Embedder,
    ) -> Result<Vec<KnowledgeChunk>, RagError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Knowledge path does not exist");
            return Ok(Vec::new());
        }

        let files = if path.is_dir() {
            let mut files = Vec::new();
            let entries = std::fs::read_dir(path)
                .map_err(|e| RagError::Index(format!("Failed to read directory: {}", e)))?;
            for entry in entries {
                let entry =
                    entry.map_err(|e| RagError::Index(format!("Failed to read entry: {}", e)))?;
                let file = entry.path();
                let extension = file.extension().and_then(|e| e.to_str()).unwrap_or("");
                if matches!(extension, "yaml" | "yml" | "json") {
                    files.push(file);
                }
            }
            // Stable ingestion order
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut chunks = Vec::new();
        for file in files {
            let source = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match Self::parse_file(&file) {
                Ok(parsed) => {
                    let loaded = Self::embed_file(parsed, &source, embedder).await?;
                    tracing::info!(
                        file = %file.display(),
                        documents = loaded.len(),
                        "Loaded knowledge file"
                    );
                    chunks.extend(loaded);
                }
                Err(e) => {
                    tracing::error!(
                        file = %file.display(),
                        error = %e,
                        "Failed to load knowledge file"
                    );
                }
            }
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HashEmbedder;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
version: "1.0"
source: persona
default_roles: [general]
documents:
  - id: meilin_001
    text: MeiLin là một AI VTuber 19 tuổi, thích hát và trò chuyện.
  - id: owner_001
    content: Chủ nhân của MeiLin thích cà phê sữa đá.
    roles: [owner]
    source: owner_notes
"#;

    #[tokio::test]
    async fn test_load_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persona.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let chunks = KnowledgeLoader::load_path(&path, &HashEmbedder::new(32))
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source, "persona");
        assert!(chunks[0].role_tags.contains("general"));
        assert_eq!(chunks[1].source, "owner_notes");
        assert!(chunks[1].role_tags.contains("owner"));
        assert!(!chunks[1].role_tags.contains("general"));
        assert_eq!(chunks[0].embedding.len(), 32);
    }

    #[tokio::test]
    async fn test_load_directory_skips_bad_files() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.yaml"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("b.yaml"), "documents: [oops").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let chunks = KnowledgeLoader::load_path(dir.path(), &HashEmbedder::new(16))
            .await
            .unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_path_is_empty() {
        let chunks = KnowledgeLoader::load_path(Path::new("/nonexistent/kb"), &HashEmbedder::default())
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
