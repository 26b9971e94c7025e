use axum::{
    Json, Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use blob_core::events::Event;
use blob_core::snapshot::FrameSnapshot;
use blob_core::tempo::TempoEvent;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

/// Task that keeps the current snapshot updated from the watch channel.
/// This allows async handlers to read the latest snapshot without blocking.
pub async fn start_snapshot_task(
    mut snapshot_rx: watch::Receiver<FrameSnapshot>,
    current_snapshot: Arc<RwLock<FrameSnapshot>>,
) {
    loop {
        // Wait for a new snapshot from the engine
        if snapshot_rx.changed().await.is_err() {
            // Channel closed, exit
            break;
        }

        let snapshot = snapshot_rx.borrow().clone();
        *current_snapshot.write().await = snapshot;
    }
}

#[derive(Clone)]
pub struct AppState {
    pub event_tx: mpsc::Sender<Event>,
    pub current_snapshot: Arc<RwLock<FrameSnapshot>>,
    pub snapshot_rx: watch::Receiver<FrameSnapshot>,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventRequest {
    Resize { width: f64, height: f64 },
    Tempo { tempo: f64, support_count: u32 },
    Stable { tempo: f64 },
}

impl From<EventRequest> for Event {
    fn from(req: EventRequest) -> Self {
        match req {
            EventRequest::Resize { width, height } => Event::Resize { width, height },
            EventRequest::Tempo {
                tempo,
                support_count,
            } => Event::Tempo(TempoEvent::Candidate {
                tempo,
                support_count,
            }),
            EventRequest::Stable { tempo } => Event::Tempo(TempoEvent::Stable { tempo }),
        }
    }
}

pub fn create_router(
    event_tx: mpsc::Sender<Event>,
    current_snapshot: Arc<RwLock<FrameSnapshot>>,
    snapshot_rx: watch::Receiver<FrameSnapshot>,
) -> Router {
    let state = AppState {
        event_tx,
        current_snapshot,
        snapshot_rx,
    };
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/particles", get(get_particles))
        .route("/event", post(event))
        .route("/ws", get(ws))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "ok"
}

#[axum::debug_handler]
async fn get_state(State(app_state): State<AppState>) -> impl IntoResponse {
    let snapshot = app_state.current_snapshot.read().await;
    Json(snapshot.analyzer().clone())
}

async fn get_particles(State(app_state): State<AppState>) -> impl IntoResponse {
    let snapshot = app_state.current_snapshot.read().await.clone();
    Json(snapshot)
}

async fn event(
    State(app_state): State<AppState>,
    Json(req): Json<EventRequest>,
) -> impl IntoResponse {
    match app_state.event_tx.send(req.into()).await {
        Ok(_) => (StatusCode::OK, "Event sent").into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to send event: channel closed",
        )
            .into_response(),
    }
}

async fn ws(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_snapshots(socket, app_state.snapshot_rx))
}

/// Pushes every new frame snapshot to the client as JSON text.
async fn stream_snapshots(socket: WebSocket, snapshot_rx: watch::Receiver<FrameSnapshot>) {
    let (mut sender, mut receiver) = socket.split();
    let mut snapshots = WatchStream::from_changes(snapshot_rx);
    info!("WebSocket client connected");

    loop {
        tokio::select! {
            maybe = snapshots.next() => {
                let Some(snapshot) = maybe else { break };
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        debug!("Skipping snapshot that failed to serialize: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_request_resize() {
        let req: EventRequest =
            serde_json::from_str(r#"{"type":"resize","width":640.0,"height":480.0}"#).unwrap();
        assert_eq!(
            Event::from(req),
            Event::Resize {
                width: 640.0,
                height: 480.0
            }
        );
    }

    #[test]
    fn test_event_request_tempo() {
        let req: EventRequest =
            serde_json::from_str(r#"{"type":"tempo","tempo":122.0,"support_count":30}"#).unwrap();
        assert_eq!(
            Event::from(req),
            Event::Tempo(TempoEvent::Candidate {
                tempo: 122.0,
                support_count: 30
            })
        );
        let req: EventRequest = serde_json::from_str(r#"{"type":"stable","tempo":122.0}"#).unwrap();
        assert_eq!(Event::from(req), Event::Tempo(TempoEvent::Stable { tempo: 122.0 }));
    }

    #[test]
    fn test_unknown_event_rejected() {
        let result: Result<EventRequest, _> = serde_json::from_str(r#"{"type":"explode"}"#);
        assert!(result.is_err());
    }
}
