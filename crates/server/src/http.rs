//! HTTP Endpoints
//!
//! REST API for turns, audio artifacts, profiles, providers and ambient control.

use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use companion_agent::{AmbientSnapshot, ModeStats, ModeSummary};
use companion_core::{Capability, ConversationTurn, Identity, ResponseEnvelope};
use companion_llm::LlmError;

use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::websocket::ambient_ws_handler;
use crate::ServerError;

const DEFAULT_ORIGIN: &str = "http://localhost:3000";

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.config.server.cors_origins,
        state.config.server.cors_enabled,
    );
    let timeout = Duration::from_secs(state.config.server.timeout_seconds.max(1));

    Router::new()
        // Conversation
        .route("/api/turn", post(handle_turn))
        .route("/api/audio/:audio_ref", get(get_audio))
        .route("/api/profiles/:id", get(get_profile))
        // Providers
        .route("/api/providers", get(list_providers))
        .route("/api/providers/:capability/promote", post(promote_provider))
        // Ambient behaviors
        .route("/api/ambient", get(ambient_status))
        .route("/api/ambient/modes", get(list_modes))
        .route("/api/ambient/mode", put(set_mode))
        .route("/api/ambient/enabled", put(set_enabled))
        .route("/ws/ambient", get(ambient_ws_handler))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - If cors_enabled is false, returns permissive layer (for dev)
/// - If cors_origins is empty or all invalid, defaults to localhost:3000
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    let methods = [Method::GET, Method::POST, Method::PUT, Method::OPTIONS];
    if parsed_origins.is_empty() {
        tracing::info!("No usable CORS origins configured, defaulting to {}", DEFAULT_ORIGIN);
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static(DEFAULT_ORIGIN))
            .allow_methods(methods)
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods(methods)
        .allow_headers(Any)
}

#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    pub identity_id: String,
    pub text: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Reject with 409 instead of queueing behind an in-flight turn
    #[serde(default)]
    pub no_wait: bool,
}

/// Run one turn; failure envelopes are still 200 with the fallback text
async fn handle_turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<ResponseEnvelope>, ServerError> {
    let display_name = request.display_name.as_deref();
    let envelope = if request.no_wait {
        state
            .orchestrator
            .try_handle_turn(&request.identity_id, display_name, &request.text)
            .await?
    } else {
        state
            .orchestrator
            .handle_turn_as(&request.identity_id, display_name, &request.text)
            .await
    };
    Ok(Json(envelope))
}

/// Stream a stored audio artifact
async fn get_audio(
    State(state): State<AppState>,
    Path(audio_ref): Path<String>,
) -> Result<Response, ServerError> {
    let clip = state
        .orchestrator
        .artifacts()
        .get(&audio_ref)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("audio {}", audio_ref)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, clip.mime_type.clone())],
        Body::from(clip.data),
    )
        .into_response())
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub identity: Identity,
    pub history: Vec<ConversationTurn>,
}

async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProfileResponse>, ServerError> {
    let profiles = state.orchestrator.profiles();
    let identity = profiles
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("identity {}", id)))?;
    let history = profiles
        .history(&id, state.config.conversation.window_size)
        .await?;

    Ok(Json(ProfileResponse { identity, history }))
}

async fn list_providers(State(state): State<AppState>) -> Json<serde_json::Value> {
    let statuses = state.orchestrator.registry().statuses().await;
    Json(serde_json::json!({ "providers": statuses }))
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub name: String,
}

/// Move a provider to rank 0 for its capability
async fn promote_provider(
    State(state): State<AppState>,
    Path(capability): Path<String>,
    Json(request): Json<PromoteRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let capability = Capability::parse(&capability)
        .ok_or_else(|| ServerError::InvalidRequest(format!("unknown capability {}", capability)))?;

    let registry = state.orchestrator.registry();
    registry
        .promote(capability, &request.name)
        .map_err(|e| match e {
            LlmError::ProviderNotFound { .. } => ServerError::NotFound(e.to_string()),
            other => ServerError::InvalidRequest(other.to_string()),
        })?;

    tracing::info!(capability = %capability, provider = %request.name, "Provider promoted");
    Ok(Json(serde_json::json!({
        "capability": capability,
        "order": registry.descriptors(capability),
    })))
}

#[derive(Debug, Serialize)]
pub struct AmbientStatus {
    #[serde(flatten)]
    pub snapshot: AmbientSnapshot,
    pub stats: ModeStats,
}

async fn ambient_status(State(state): State<AppState>) -> Json<AmbientStatus> {
    let engine = state.engine();
    Json(AmbientStatus {
        snapshot: engine.snapshot(),
        stats: engine.mode_stats(),
    })
}

async fn list_modes(State(state): State<AppState>) -> Json<Vec<ModeSummary>> {
    Json(state.engine().list_modes())
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

async fn set_mode(
    State(state): State<AppState>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<ModeStats>, ServerError> {
    let engine = state.engine();
    engine
        .set_mode(&request.mode)
        .map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
    Ok(Json(engine.mode_stats()))
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

async fn set_enabled(
    State(state): State<AppState>,
    Json(request): Json<EnabledRequest>,
) -> Json<AmbientSnapshot> {
    let engine = state.engine();
    engine.set_enabled(request.enabled);
    if request.enabled {
        engine.reset_timers();
    }
    Json(engine.snapshot())
}

/// Liveness plus a summary of the configured components
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let registry = state.orchestrator.registry();
    let text = registry.descriptors(Capability::GenerateText).len();
    let speech = registry.descriptors(Capability::SynthesizeSpeech).len();
    let cache_entries = state.orchestrator.cache().len().await.ok();

    let healthy = text > 0;
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "providers": { "generate_text": text, "synthesize_speech": speech },
                "cache": { "entries": cache_entries },
                "persistence": { "distributed": state.distributed },
                "rag": { "enabled": state.config.rag.enabled },
                "ambient": { "mode": state.engine().mode(), "enabled": state.engine().is_enabled() },
            }
        })),
    )
}

/// Ready once at least one text provider answers its health probe
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let statuses = state.orchestrator.registry().statuses().await;
    let ready = statuses
        .iter()
        .any(|s| s.descriptor.capability == Capability::GenerateText && s.is_available);

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "ready": ready,
            "providers": statuses,
            "active_identities": state.orchestrator.active_identities(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_fallback() {
        // Invalid origins fall back to the default instead of panicking
        let _ = build_cors_layer(&["\n".to_string()], true);
        let _ = build_cors_layer(&[], false);
    }

    #[test]
    fn test_turn_request_defaults() {
        let request: TurnRequest =
            serde_json::from_str(r#"{"identity_id":"u1","text":"Xin chào"}"#).unwrap();
        assert!(!request.no_wait);
        assert!(request.display_name.is_none());
    }
}
