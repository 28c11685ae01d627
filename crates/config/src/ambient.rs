//! Ambient behavior catalog
//!
//! Behaviors, personality modes and context groups live in YAML. A built-in catalog is
//! compiled in; deployments can override it with `ambient.catalog_path`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::env::substitute_env_vars;
use crate::ConfigError;

const BUILTIN_CATALOG: &str = include_str!("../data/ambient_catalog.yaml");

/// Mode every catalog must define; used when no other mode is selected
pub const DEFAULT_MODE: &str = "normal";

/// One idle behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    pub label: String,
    pub weight: f64,
    pub min_interval_secs: u64,
    #[serde(default)]
    pub sounds: Vec<String>,
    pub lines: Vec<String>,
}

/// Personality mode: reshapes weights and the idle trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub label: String,
    #[serde(default)]
    pub description: String,
    /// Scales the configured idle threshold
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: f64,
    /// Probability gate evaluated once the idle threshold has passed
    #[serde(default = "default_trigger_probability")]
    pub trigger_probability: f64,
    #[serde(default)]
    pub multipliers: BTreeMap<String, f64>,
    #[serde(default)]
    pub suppress: Vec<String>,
}

fn default_idle_multiplier() -> f64 {
    1.0
}
fn default_trigger_probability() -> f64 {
    0.3
}

/// Complete behavior catalog
///
/// `BTreeMap` keeps iteration order stable so weighted selection is reproducible
/// for a given random source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientCatalogConfig {
    pub behaviors: BTreeMap<String, BehaviorConfig>,
    pub modes: BTreeMap<String, ModeConfig>,
    /// Context name -> preferred behaviors, for in-reply accents
    #[serde(default)]
    pub contexts: BTreeMap<String, Vec<String>>,
}

impl AmbientCatalogConfig {
    /// The compiled-in catalog
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_yaml(&raw)
    }

    /// Load `path` when given, otherwise the built-in catalog
    pub fn load_or_builtin(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => Self::builtin(),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let catalog: AmbientCatalogConfig = serde_yaml::from_str(&substitute_env_vars(raw))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Named modes besides the default
    pub fn named_modes(&self) -> impl Iterator<Item = &str> {
        self.modes
            .keys()
            .map(String::as_str)
            .filter(|m| *m != DEFAULT_MODE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.behaviors.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ambient.behaviors".to_string(),
                message: "Catalog must define at least one behavior".to_string(),
            });
        }

        if !self.modes.contains_key(DEFAULT_MODE) {
            return Err(ConfigError::MissingField(format!("ambient.modes.{}", DEFAULT_MODE)));
        }

        for (key, behavior) in &self.behaviors {
            if behavior.weight <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("ambient.behaviors.{}.weight", key),
                    message: format!("Must be positive, got {}", behavior.weight),
                });
            }
            if behavior.lines.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("ambient.behaviors.{}.lines", key),
                    message: "At least one line is required".to_string(),
                });
            }
        }

        for (key, mode) in &self.modes {
            if !(0.0..=1.0).contains(&mode.trigger_probability) {
                return Err(ConfigError::InvalidValue {
                    field: format!("ambient.modes.{}.trigger_probability", key),
                    message: format!("Must be between 0.0 and 1.0, got {}", mode.trigger_probability),
                });
            }
            if mode.idle_multiplier <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("ambient.modes.{}.idle_multiplier", key),
                    message: format!("Must be positive, got {}", mode.idle_multiplier),
                });
            }
            if let Some((behavior, m)) = mode.multipliers.iter().find(|(_, m)| **m <= 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("ambient.modes.{}.multipliers.{}", key, behavior),
                    message: format!("Must be positive, got {}", m),
                });
            }
            for name in mode.multipliers.keys().chain(mode.suppress.iter()) {
                if !self.behaviors.contains_key(name) {
                    tracing::warn!(mode = %key, behavior = %name, "Mode references unknown behavior");
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = AmbientCatalogConfig::builtin().unwrap();
        assert!(catalog.behaviors.len() >= 25);
        assert_eq!(catalog.named_modes().count(), 8);
        assert!(catalog.modes.contains_key("calm"));

        let calm = &catalog.modes["calm"];
        assert!(calm.suppress.contains(&"excitement".to_string()));
        assert_eq!(calm.multipliers.get("hum"), Some(&2.0));
    }

    #[test]
    fn test_missing_default_mode_rejected() {
        let yaml = r#"
behaviors:
  hum: { label: hum, weight: 1, min_interval_secs: 10, lines: ["Hmm~"] }
modes:
  calm: { label: calm }
"#;
        assert!(AmbientCatalogConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_probability_rejected() {
        let yaml = r#"
behaviors:
  hum: { label: hum, weight: 1, min_interval_secs: 10, lines: ["Hmm~"] }
modes:
  normal: { label: normal, trigger_probability: 1.5 }
"#;
        assert!(AmbientCatalogConfig::from_yaml(yaml).is_err());
    }
}
