//! Timer loop that voices ambient behaviors

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use companion_core::{ArtifactStore, Clock, SpeechParams};
use companion_llm::ProviderRegistry;

use super::engine::AmbientEngine;

const EVENT_CAPACITY: usize = 64;

/// An emitted ambient line, as pushed to listeners
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmbientEvent {
    pub behavior: String,
    pub label: String,
    pub mode: String,
    pub text: String,
    pub sound: Option<String>,
    /// `None` when speech synthesis failed; the line is still delivered as text
    pub audio_ref: Option<String>,
    pub provider: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

pub struct AmbientRunner {
    engine: Arc<AmbientEngine>,
    registry: Arc<ProviderRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<AmbientEvent>,
    interval: Duration,
}

impl AmbientRunner {
    pub fn new(
        engine: Arc<AmbientEngine>,
        registry: Arc<ProviderRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            engine,
            registry,
            artifacts,
            clock,
            events,
            interval,
        }
    }

    pub fn engine(&self) -> &Arc<AmbientEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AmbientEvent> {
        self.events.subscribe()
    }

    /// One tick: select, synthesize, store, broadcast
    ///
    /// The engine always returns to IDLE afterwards, even when synthesis fails.
    pub async fn run_once(&self) -> Option<AmbientEvent> {
        let behavior = self.engine.tick()?;

        let (audio_ref, provider) = match self
            .registry
            .synthesize_speech(behavior.line.clone(), SpeechParams::default())
            .await
        {
            Ok(invocation) => match self.artifacts.put(&invocation.value).await {
                Ok(audio_ref) => (Some(audio_ref), Some(invocation.provider)),
                Err(e) => {
                    tracing::warn!(error = %e, behavior = %behavior.key, "Failed to store ambient audio");
                    (None, Some(invocation.provider))
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, behavior = %behavior.key, "Ambient speech unavailable, emitting text only");
                (None, None)
            }
        };

        let event = AmbientEvent {
            behavior: behavior.key,
            label: behavior.label,
            mode: behavior.mode,
            text: behavior.line,
            sound: behavior.sound,
            audio_ref,
            provider,
            emitted_at: self.clock.now(),
        };

        self.engine.complete_behavior();

        // No receivers is fine
        let _ = self.events.send(event.clone());
        tracing::info!(behavior = %event.behavior, mode = %event.mode, "Ambient behavior emitted");
        Some(event)
    }

    /// Tick every `interval` until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(self.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Ambient runner shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use crate::testing::{registry, ScriptedSpeech, ScriptedText};
    use crate::ambient::AmbientState;
    use companion_config::{AmbientCatalogConfig, AmbientConfig};
    use companion_core::ManualClock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CATALOG: &str = r#"
behaviors:
  hum: { label: hum, weight: 1, min_interval_secs: 0, sounds: ["Hmm~"], lines: ["Hmm~ em đang nghĩ~"] }
modes:
  normal: { label: normal, trigger_probability: 1.0 }
"#;

    fn runner(speech: Arc<ScriptedSpeech>) -> (AmbientRunner, Arc<ManualClock>, Arc<InMemoryArtifactStore>) {
        let clock = Arc::new(ManualClock::default());
        let engine = AmbientEngine::new(
            AmbientCatalogConfig::from_yaml(CATALOG).unwrap(),
            &AmbientConfig::default(),
            clock.clone(),
            Box::new(StdRng::seed_from_u64(1)),
        )
        .unwrap();
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let runner = AmbientRunner::new(
            Arc::new(engine),
            Arc::new(registry(vec![ScriptedText::ok("llm", "ok")], vec![speech])),
            artifacts.clone(),
            clock.clone(),
            Duration::from_millis(10),
        );
        (runner, clock, artifacts)
    }

    #[tokio::test]
    async fn test_run_once_voices_and_broadcasts() {
        let (runner, clock, artifacts) = runner(ScriptedSpeech::ok("tts"));
        let mut events = runner.subscribe();

        assert!(runner.run_once().await.is_none());

        clock.advance_secs(61);
        let event = runner.run_once().await.unwrap();
        assert_eq!(event.behavior, "hum");
        assert_eq!(event.provider.as_deref(), Some("tts"));
        assert!(event.audio_ref.is_some());
        assert_eq!(artifacts.len(), 1);
        assert_eq!(runner.engine().state(), AmbientState::Idle);

        assert_eq!(events.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_speech_failure_still_emits_text() {
        let (runner, clock, artifacts) = runner(ScriptedSpeech::failing("tts"));
        clock.advance_secs(61);

        let event = runner.run_once().await.unwrap();
        assert_eq!(event.text, "Hmm~ em đang nghĩ~");
        assert!(event.audio_ref.is_none());
        assert!(artifacts.is_empty());
        assert_eq!(runner.engine().state(), AmbientState::Idle);
    }

    #[tokio::test]
    async fn test_spawn_stops_on_shutdown() {
        let (runner, clock, _) = runner(ScriptedSpeech::ok("tts"));
        clock.advance_secs(61);
        let runner = Arc::new(runner);
        let mut events = runner.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runner.clone().spawn(shutdown_rx);

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.behavior, "hum");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
