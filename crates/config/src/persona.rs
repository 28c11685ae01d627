//! Persona definition

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::env::substitute_env_vars;
use crate::ConfigError;

/// Static persona the prompt is built around
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub age: Option<u32>,

    /// One-line role description ("AI VTuber thân thiện")
    #[serde(default = "default_description")]
    pub description: String,

    #[serde(default = "default_traits")]
    pub traits: Vec<String>,

    #[serde(default = "default_speaking_style")]
    pub speaking_style: Vec<String>,

    #[serde(default)]
    pub interests: Vec<String>,

    #[serde(default)]
    pub pronouns: PronounConfig,

    /// Display name of the owner, used in the owner instruction
    #[serde(default)]
    pub owner_name: Option<String>,

    /// Extra behavioral rules appended to the system prompt
    #[serde(default)]
    pub rules: Vec<String>,
}

/// How the persona refers to itself and to others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronounConfig {
    #[serde(default = "default_self_term", rename = "self")]
    pub self_term: String,
    #[serde(default = "default_other")]
    pub default_other: String,
}

fn default_name() -> String {
    "MeiLin".to_string()
}
fn default_description() -> String {
    "AI VTuber thân thiện".to_string()
}
fn default_traits() -> Vec<String> {
    vec![
        "Thân thiện".to_string(),
        "Nhiệt tình".to_string(),
        "Ham học hỏi".to_string(),
    ]
}
fn default_speaking_style() -> Vec<String> {
    vec!["Dùng ngôn ngữ tự nhiên".to_string(), "Vui vẻ".to_string()]
}
fn default_self_term() -> String {
    "Em".to_string()
}
fn default_other() -> String {
    "bạn".to_string()
}

impl Default for PronounConfig {
    fn default() -> Self {
        Self {
            self_term: default_self_term(),
            default_other: default_other(),
        }
    }
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            age: Some(19),
            description: default_description(),
            traits: default_traits(),
            speaking_style: default_speaking_style(),
            interests: vec!["AI".to_string(), "Công nghệ".to_string()],
            pronouns: PronounConfig::default(),
            owner_name: None,
            rules: Vec::new(),
        }
    }
}

impl PersonaConfig {
    /// Load a persona YAML file, expanding `${VAR}` references first
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let persona: PersonaConfig = serde_yaml::from_str(&substitute_env_vars(raw))?;
        if persona.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "persona.name".to_string(),
                message: "Persona name cannot be empty".to_string(),
            });
        }
        Ok(persona)
    }

    /// Load from `path` if given, falling back to the built-in persona on any error
    pub fn load_or_default(path: Option<&str>) -> Self {
        match path {
            Some(p) => match Self::load(p) {
                Ok(persona) => {
                    tracing::info!(path = %p, name = %persona.name, "Loaded persona");
                    persona
                }
                Err(e) => {
                    tracing::warn!(path = %p, error = %e, "Failed to load persona, using default");
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }
}
