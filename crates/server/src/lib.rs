//! Companion Server
//!
//! HTTP and WebSocket endpoints around the orchestration pipeline.

pub mod bootstrap;
pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use bootstrap::build_state;
pub use http::create_router;
pub use metrics::{init_metrics, metrics_handler};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Turn in progress for identity {0}")]
    Busy(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Busy(_) => StatusCode::CONFLICT,
            ServerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Initialization(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<companion_core::Error> for ServerError {
    fn from(err: companion_core::Error) -> Self {
        use companion_core::Error;
        match err {
            Error::InvalidInput(msg) => ServerError::InvalidRequest(msg),
            Error::TurnInProgress(id) => ServerError::Busy(id),
            Error::ProfileStoreUnavailable(_) | Error::RetrievalUnavailable(_) => {
                ServerError::Unavailable(err.to_string())
            }
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let status: StatusCode = self.into();
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
