//! WebSocket push of ambient behaviors
//!
//! Each connection receives every [`AmbientEvent`] emitted while it is open, plus
//! turn results for `turn` messages sent over the same socket.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use companion_agent::AmbientEvent;
use companion_core::ResponseEnvelope;

use crate::state::AppState;

/// Messages sent to the client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutbound {
    Ambient(AmbientEvent),
    Turn(ResponseEnvelope),
    Error { message: String },
}

/// Messages accepted from the client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInbound {
    Turn {
        identity_id: String,
        text: String,
        #[serde(default)]
        display_name: Option<String>,
    },
}

pub async fn ambient_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<WsOutbound>(32);

    // Ambient events -> outbound queue
    let mut events = BroadcastStream::new(state.ambient.subscribe());
    let event_tx = out_tx.clone();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if event_tx.send(WsOutbound::Ambient(event)).await.is_err() {
                        break;
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Ambient subscriber lagged");
                }
            }
        }
    });

    // Outbound queue -> socket
    let send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to serialize WebSocket message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let reply = match serde_json::from_str::<WsInbound>(&text) {
            Ok(WsInbound::Turn {
                identity_id,
                text,
                display_name,
            }) => WsOutbound::Turn(
                state
                    .orchestrator
                    .handle_turn_as(&identity_id, display_name.as_deref(), &text)
                    .await,
            ),
            Err(e) => WsOutbound::Error {
                message: format!("invalid message: {}", e),
            },
        };

        if out_tx.send(reply).await.is_err() {
            break;
        }
    }

    event_task.abort();
    send_task.abort();
    tracing::debug!("Ambient WebSocket closed");
}
