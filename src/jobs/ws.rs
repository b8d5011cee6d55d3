//! WebSocket server + REST endpoints for the job list.

use std::str::FromStr;
use std::sync::Arc;

use alloy_primitives::{Address, U256};
use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use super::board::BoardEvent;
use super::tracker::JobTracker;
use crate::error::CancellationError;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
}

/// Actions a WS client can send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    Connect { owner: String },
    Disconnect,
    Refresh,
    Cancel { job_id: String },
}

#[derive(Debug, Deserialize)]
struct OwnerBody {
    address: String,
}

/// Build the Axum router with job WebSocket and REST routes.
pub fn job_routes(tracker: Arc<JobTracker>) -> Router {
    let state = AppState { tracker };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs))
        .route("/api/owner", put(connect_owner).delete(disconnect_owner))
        .route("/api/refresh", post(refresh))
        .route("/api/jobs/{id}/cancel", post(cancel_job))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn parse_job_id(raw: &str) -> Option<U256> {
    U256::from_str(raw.trim()).ok()
}

fn error_body(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "recurring-jobs"
    }))
}

// ── REST ────────────────────────────────────────────────────────────────

async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.tracker.board().snapshot().await)
}

async fn connect_owner(
    State(state): State<AppState>,
    Json(body): Json<OwnerBody>,
) -> impl IntoResponse {
    let owner = match Address::from_str(body.address.trim()) {
        Ok(owner) => owner,
        Err(_) => return error_body(StatusCode::BAD_REQUEST, "Invalid owner address"),
    };

    let ticket = state.tracker.connect(owner).await;
    (StatusCode::ACCEPTED, Json(serde_json::json!(ticket)))
}

async fn disconnect_owner(State(state): State<AppState>) -> impl IntoResponse {
    state.tracker.disconnect().await;
    StatusCode::NO_CONTENT
}

async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    match state.tracker.refresh().await {
        Ok(ticket) => (StatusCode::ACCEPTED, Json(serde_json::json!(ticket))),
        Err(e) => error_body(StatusCode::CONFLICT, e.to_string()),
    }
}

async fn cancel_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    let Some(job_id) = parse_job_id(&id) else {
        return error_body(StatusCode::BAD_REQUEST, "Invalid job ID");
    };

    match state.tracker.cancel(job_id).await {
        Ok(view) => (StatusCode::ACCEPTED, Json(serde_json::json!(view))),
        Err(e @ CancellationError::NotFound { .. }) => error_body(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error_body(StatusCode::CONFLICT, e.to_string()),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.tracker))
}

async fn send_sync(socket: &mut WebSocket, tracker: &JobTracker) -> bool {
    let sync = BoardEvent::JobsSync {
        snapshot: tracker.board().snapshot().await,
    };
    match serde_json::to_string(&sync) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize job sync");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, tracker: Arc<JobTracker>) {
    info!("WebSocket client connected");

    // Subscribe before the snapshot so no event falls between the two.
    let mut rx = tracker.board().subscribe();

    if !send_sync(&mut socket, &tracker).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_sync(&mut socket, &tracker).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &tracker).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn handle_client_message(text: &str, tracker: &Arc<JobTracker>) {
    match serde_json::from_str::<ClientAction>(text) {
        Ok(ClientAction::Connect { owner }) => match Address::from_str(owner.trim()) {
            Ok(owner) => {
                tracker.connect(owner).await;
            }
            Err(e) => warn!(owner = %owner, error = %e, "Invalid owner address via WS"),
        },
        Ok(ClientAction::Disconnect) => tracker.disconnect().await,
        Ok(ClientAction::Refresh) => {
            if let Err(e) = tracker.refresh().await {
                warn!(error = %e, "Refresh failed via WS");
            }
        }
        Ok(ClientAction::Cancel { job_id }) => match parse_job_id(&job_id) {
            // Outcome is broadcast as cancel_confirmed / cancel_failed.
            Some(id) => {
                if let Err(e) = tracker.cancel(id).await {
                    warn!(job_id = %id, error = %e, "Cancel refused via WS");
                }
            }
            None => warn!(job_id = %job_id, "Invalid job ID via WS"),
        },
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
        }
    }
}
