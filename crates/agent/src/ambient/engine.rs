//! Ambient Behavior Engine
//!
//! State machine evaluated between real turns:
//!
//! ```text
//! IDLE --(idle >= threshold * mode multiplier, gate passes)--> BEHAVIOR_ACTIVE
//! BEHAVIOR_ACTIVE --(line emitted)--> IDLE
//! any --(user message)--> ENGAGED --(last envelope returned)--> IDLE
//! ```
//!
//! Time and randomness are injected so selection is reproducible in tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;

use companion_config::{AmbientCatalogConfig, AmbientConfig, BehaviorConfig, ModeConfig};
use companion_core::Clock;

use crate::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AmbientState {
    Idle,
    Engaged,
    BehaviorActive,
}

/// Behavior chosen by a tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbientBehavior {
    pub key: String,
    pub label: String,
    pub line: String,
    pub sound: Option<String>,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeSummary {
    pub key: String,
    pub label: String,
    pub description: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeightedBehavior {
    pub key: String,
    pub weight: f64,
}

/// Effective parameters of the active mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeStats {
    pub mode: String,
    pub label: String,
    pub idle_threshold_secs: f64,
    pub trigger_probability: f64,
    /// Selectable behaviors, heaviest first
    pub behaviors: Vec<WeightedBehavior>,
    pub suppressed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbientSnapshot {
    pub state: AmbientState,
    pub mode: String,
    pub enabled: bool,
    pub idle_secs: i64,
    pub behaviors_emitted: u64,
    pub active: Option<AmbientBehavior>,
}

struct EngineState {
    state: AmbientState,
    in_flight: usize,
    mode: String,
    enabled: bool,
    /// Later of the last ENGAGED -> IDLE transition and the last emitted behavior
    idle_since: DateTime<Utc>,
    last_fired: HashMap<String, DateTime<Utc>>,
    emitted: u64,
    active: Option<AmbientBehavior>,
}

pub struct AmbientEngine {
    catalog: AmbientCatalogConfig,
    idle_threshold: Duration,
    accent_probability: f64,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    inner: Mutex<EngineState>,
}

impl AmbientEngine {
    pub fn new(
        catalog: AmbientCatalogConfig,
        config: &AmbientConfig,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
    ) -> Result<Self, AgentError> {
        if !catalog.modes.contains_key(&config.default_mode) {
            return Err(AgentError::UnknownMode(config.default_mode.clone()));
        }

        let now = clock.now();
        Ok(Self {
            idle_threshold: Duration::seconds(config.idle_threshold_secs as i64),
            accent_probability: config.accent_probability,
            inner: Mutex::new(EngineState {
                state: AmbientState::Idle,
                in_flight: 0,
                mode: config.default_mode.clone(),
                enabled: config.enabled,
                idle_since: now,
                last_fired: HashMap::new(),
                emitted: 0,
                active: None,
            }),
            catalog,
            clock,
            rng: Mutex::new(rng),
        })
    }

    /// Load the configured catalog and seed randomness from the OS
    pub fn from_config(config: &AmbientConfig, clock: Arc<dyn Clock>) -> Result<Self, AgentError> {
        let catalog = AmbientCatalogConfig::load_or_builtin(config.catalog_path.as_deref())?;
        Self::new(catalog, config, clock, Box::new(StdRng::from_entropy()))
    }

    pub fn state(&self) -> AmbientState {
        self.inner.lock().state
    }

    pub fn mode(&self) -> String {
        self.inner.lock().mode.clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().enabled = enabled;
        tracing::info!(enabled, "Ambient behaviors toggled");
    }

    /// A genuine user message arrived
    pub fn begin_turn(&self) {
        let mut inner = self.inner.lock();
        inner.in_flight += 1;
        inner.state = AmbientState::Engaged;
        inner.active = None;
    }

    /// The envelope for a message was returned; IDLE once no turn is in flight
    pub fn end_turn(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if inner.in_flight == 0 && inner.state == AmbientState::Engaged {
            inner.state = AmbientState::Idle;
            inner.idle_since = now;
        }
    }

    /// The active behavior's line was emitted
    pub fn complete_behavior(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if inner.state == AmbientState::BehaviorActive {
            inner.state = AmbientState::Idle;
            inner.idle_since = now;
            inner.active = None;
        }
    }

    fn active_mode<'a>(&'a self, inner: &EngineState) -> &'a ModeConfig {
        // Mode keys are validated on every write
        &self.catalog.modes[&inner.mode]
    }

    fn effective_weight(mode: &ModeConfig, key: &str, behavior: &BehaviorConfig) -> f64 {
        behavior.weight * mode.multipliers.get(key).copied().unwrap_or(1.0)
    }

    fn in_cooldown(inner: &EngineState, key: &str, behavior: &BehaviorConfig, now: DateTime<Utc>) -> bool {
        inner
            .last_fired
            .get(key)
            .map(|last| now - *last < Duration::seconds(behavior.min_interval_secs as i64))
            .unwrap_or(false)
    }

    /// Idle time required before a behavior may fire in the active mode
    pub fn threshold(&self) -> Duration {
        let inner = self.inner.lock();
        self.scaled_threshold(self.active_mode(&inner))
    }

    fn scaled_threshold(&self, mode: &ModeConfig) -> Duration {
        Duration::milliseconds(
            (self.idle_threshold.num_milliseconds() as f64 * mode.idle_multiplier).round() as i64,
        )
    }

    /// Evaluate one scheduler tick; returns the behavior to emit, if any
    pub fn tick(&self) -> Option<AmbientBehavior> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if !inner.enabled || inner.state != AmbientState::Idle {
            return None;
        }

        let mode = self.active_mode(&inner);
        if now - inner.idle_since < self.scaled_threshold(mode) {
            return None;
        }

        let mut rng = self.rng.lock();
        if rng.gen::<f64>() >= mode.trigger_probability {
            return None;
        }

        let candidates: Vec<(&String, &BehaviorConfig, f64)> = self
            .catalog
            .behaviors
            .iter()
            .filter(|(key, _)| !mode.suppress.contains(*key))
            .filter(|(key, behavior)| !Self::in_cooldown(&inner, key, behavior, now))
            .map(|(key, behavior)| (key, behavior, Self::effective_weight(mode, key, behavior)))
            .collect();

        let index = WeightedIndex::new(candidates.iter().map(|(_, _, w)| *w)).ok()?;
        let (key, behavior, _) = candidates[index.sample(&mut *rng)];

        let line = behavior.lines[rng.gen_range(0..behavior.lines.len())].clone();
        let sound = if behavior.sounds.is_empty() {
            None
        } else {
            Some(behavior.sounds[rng.gen_range(0..behavior.sounds.len())].clone())
        };

        let selected = AmbientBehavior {
            key: key.clone(),
            label: behavior.label.clone(),
            line,
            sound,
            mode: inner.mode.clone(),
        };

        inner.last_fired.insert(key.clone(), now);
        inner.emitted += 1;
        inner.state = AmbientState::BehaviorActive;
        inner.active = Some(selected.clone());

        metrics::counter!(
            "ambient_behaviors_total",
            "behavior" => selected.key.clone(),
            "mode" => selected.mode.clone()
        )
        .increment(1);
        tracing::debug!(behavior = %selected.key, mode = %selected.mode, "Ambient behavior selected");

        Some(selected)
    }

    /// Context-matched sound to prefix a reply with, gated by `accent_probability`
    pub fn accent(&self, context: &str) -> Option<String> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return None;
        }

        let mut rng = self.rng.lock();
        if rng.gen::<f64>() >= self.accent_probability {
            return None;
        }

        let mode = self.active_mode(&inner);
        let candidates: Vec<(&String, &BehaviorConfig)> = self
            .catalog
            .contexts
            .get(context)?
            .iter()
            .filter(|key| !mode.suppress.contains(*key))
            .filter_map(|key| self.catalog.behaviors.get_key_value(key))
            .filter(|(key, behavior)| {
                !behavior.sounds.is_empty() && !Self::in_cooldown(&inner, key, behavior, now)
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        let (key, behavior) = candidates[rng.gen_range(0..candidates.len())];
        let sound = behavior.sounds[rng.gen_range(0..behavior.sounds.len())].clone();
        inner.last_fired.insert(key.clone(), now);
        Some(sound)
    }

    /// Switch personality mode; the state machine position is unchanged
    pub fn set_mode(&self, mode: &str) -> Result<(), AgentError> {
        if !self.catalog.modes.contains_key(mode) {
            return Err(AgentError::UnknownMode(mode.to_string()));
        }
        let mut inner = self.inner.lock();
        let previous = std::mem::replace(&mut inner.mode, mode.to_string());
        tracing::info!(from = %previous, to = %mode, "Ambient mode changed");
        Ok(())
    }

    pub fn list_modes(&self) -> Vec<ModeSummary> {
        let current = self.mode();
        self.catalog
            .modes
            .iter()
            .map(|(key, mode)| ModeSummary {
                key: key.clone(),
                label: mode.label.clone(),
                description: mode.description.clone(),
                active: *key == current,
            })
            .collect()
    }

    pub fn mode_stats(&self) -> ModeStats {
        let inner = self.inner.lock();
        let mode = self.active_mode(&inner);

        let mut behaviors: Vec<WeightedBehavior> = self
            .catalog
            .behaviors
            .iter()
            .filter(|(key, _)| !mode.suppress.contains(*key))
            .map(|(key, behavior)| WeightedBehavior {
                key: key.clone(),
                weight: Self::effective_weight(mode, key, behavior),
            })
            .collect();
        behaviors.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });

        ModeStats {
            mode: inner.mode.clone(),
            label: mode.label.clone(),
            idle_threshold_secs: self.scaled_threshold(mode).num_milliseconds() as f64 / 1000.0,
            trigger_probability: mode.trigger_probability,
            behaviors,
            suppressed: mode.suppress.clone(),
        }
    }

    /// Forget per-behavior cooldowns and restart the idle timer
    pub fn reset_timers(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.last_fired.clear();
        inner.idle_since = now;
    }

    pub fn snapshot(&self) -> AmbientSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();
        AmbientSnapshot {
            state: inner.state,
            mode: inner.mode.clone(),
            enabled: inner.enabled,
            idle_secs: (now - inner.idle_since).num_seconds().max(0),
            behaviors_emitted: inner.emitted,
            active: inner.active.clone(),
        }
    }

    /// Last emission time per behavior
    pub fn last_fired(&self) -> BTreeMap<String, DateTime<Utc>> {
        self.inner
            .lock()
            .last_fired
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}
