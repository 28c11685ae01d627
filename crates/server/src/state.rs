//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use companion_agent::{AmbientEngine, AmbientRunner, Orchestrator};
use companion_config::Settings;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub ambient: Arc<AmbientRunner>,
    /// Profiles and cache live in ScyllaDB rather than process memory
    pub distributed: bool,
}

impl AppState {
    pub fn new(
        config: Settings,
        orchestrator: Arc<Orchestrator>,
        ambient: Arc<AmbientRunner>,
        distributed: bool,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            ambient,
            distributed,
        }
    }

    pub fn engine(&self) -> &Arc<AmbientEngine> {
        self.ambient.engine()
    }
}
