use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::access;
use super::api::{ApiError, SharedState};
use super::models::*;
use super::session::CurrentUser;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    IssueCreated {
        issue: Issue,
    },
    IssueUpdated {
        issue: Issue,
    },
    IssueMoved {
        issue_id: i64,
        from_status_id: i64,
        to_status_id: i64,
        status_order: i64,
    },
    IssueDeleted {
        issue_id: i64,
    },
    StatusCreated {
        status: Status,
    },
    StatusesReordered {
        statuses: Vec<Status>,
    },
    StatusUpdated {
        status: Status,
    },
    LabelCreated {
        label: Label,
    },
    CommentCreated {
        issue_id: i64,
        comment: Comment,
    },
}

/// A serialized message tagged with the project it concerns. Sockets only
/// forward events of the project they subscribed to.
#[derive(Debug, Clone)]
pub struct BoardEvent {
    pub project_id: i64,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub project_id: i64,
}

// ── Handler ──────────────────────────────────────────────────────────

/// `GET /ws?project_id=N`. The caller must be signed in and a member of the
/// project's team.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = params.project_id;
    state
        .db
        .read(move |conn| access::project_access(conn, project_id, user.id).map(|_| ()))
        .await?;

    let rx = state.ws_tx.subscribe();
    tracing::debug!(project_id, "WebSocket subscribed");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, project_id, rx)))
}

async fn handle_socket(socket: WebSocket, project_id: i64, rx: broadcast::Receiver<BoardEvent>) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, project_id).await;
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards this project's broadcast events, watches for client frames and
/// pings periodically. If no Pong arrives within [`PONG_TIMEOUT`] after a
/// Ping, the connection is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<BoardEvent>,
    project_id: i64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(project_id, "WebSocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Broadcast forwarding ────────────────────────────────
            result = rx.recv() => {
                match result {
                    Ok(event) if event.project_id == project_id => {
                        if sender.send(Message::Text(event.payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(project_id, skipped, "WebSocket receiver lagged");
                    }
                }
            }

            // ── Client messages (pong, close, etc.) ─────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a message for one project. Having no connected
/// clients is not an error.
pub fn broadcast_message(tx: &broadcast::Sender<BoardEvent>, project_id: i64, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(BoardEvent { project_id, payload });
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize WsMessage");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
