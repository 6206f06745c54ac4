//! WebSocket indexing session.
//!
//! The client sends `{"action": "index", "dirs": [...]}` to start a run over
//! the files found under `dirs` and `{"action": "stop"}` to cancel it. Run
//! events are streamed back as JSON tagged by `type`. Closing the socket
//! cancels the active run; its open batch is still written.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::index::{event_channel, Indexer, ProgressEvent};
use crate::scan::collect_files;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    Index {
        #[serde(default)]
        dirs: Vec<String>,
    },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Active,
    Progress { progress: f32 },
    Error { error: String, item: String },
    Fail { error: String },
    Complete { total_processed: usize, time_elapsed: f64 },
}

impl ServerMessage {
    /// Wire form of a run event. Batch notifications stay server-side.
    pub fn from_event(event: ProgressEvent) -> Option<Self> {
        match event {
            ProgressEvent::Active => Some(Self::Active),
            ProgressEvent::Progress(progress) => Some(Self::Progress { progress }),
            ProgressEvent::Error { item, error } => Some(Self::Error { error, item }),
            ProgressEvent::Fail { error } => Some(Self::Fail { error }),
            ProgressEvent::Complete {
                total_processed,
                time_elapsed,
            } => Some(Self::Complete {
                total_processed,
                time_elapsed: time_elapsed.as_secs_f64(),
            }),
            ProgressEvent::BatchComplete(_) => None,
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_index(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let indexer = Arc::new(Indexer::new(state.coordinator.clone(), state.index_options()));
    let (tx, mut rx) = event_channel();
    tracing::info!("indexing client connected");

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                let Some(message) = ServerMessage::from_event(event) else {
                    continue;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(text.as_str()) {
                            Ok(ClientMessage::Index { dirs }) => {
                                // Reserved before anything else so a following
                                // stop or disconnect reaches this run.
                                let ticket = match indexer.start() {
                                    Ok(ticket) => ticket,
                                    Err(e) => {
                                        tracing::warn!(error = %e, "index request ignored");
                                        continue;
                                    }
                                };
                                let extensions = state.config().indexing.all_extensions();
                                let files = match tokio::task::spawn_blocking(move || {
                                    collect_files(&dirs, &extensions)
                                })
                                .await
                                {
                                    Ok(files) => files,
                                    Err(e) => {
                                        tracing::error!(error = %e, "directory scan failed");
                                        continue;
                                    }
                                };

                                let indexer = indexer.clone();
                                let tx = tx.clone();
                                tokio::spawn(async move {
                                    indexer.execute(ticket, files, tx).await;
                                });
                            }
                            Ok(ClientMessage::Stop) => indexer.stop(),
                            Err(e) => tracing::warn!(error = %e, "ignoring malformed message"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket receive failed");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    indexer.stop();
    tracing::info!("indexing client disconnected");
}
