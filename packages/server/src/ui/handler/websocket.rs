//! WebSocket connection handlers.
//!
//! The accept surface of the hub. Authentication itself is an external
//! collaborator: this endpoint receives only an already-resolved identity
//! (user id, display name, role) plus an optional initial room name.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    domain::{PeerIdentity, RoomName, UserId},
    hub::{ConnectionHandle, DisconnectReason, egress_pump, ingress_pump},
    ui::state::AppState,
};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Initial room to join (optional; empty means global scope only)
    #[serde(default)]
    pub room: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = match UserId::new(query.user_id.clone()) {
        Ok(user_id) => user_id,
        Err(_) => {
            tracing::warn!("Invalid user_id format: '{}'", query.user_id);
            return Err(StatusCode::BAD_REQUEST);
        }
    };
    let room = match query.room.filter(|r| !r.is_empty()) {
        None => None,
        Some(raw) => match RoomName::new(raw.clone()) {
            Ok(room) => Some(room),
            Err(_) => {
                tracing::warn!("Invalid room name: '{}'", raw);
                return Err(StatusCode::BAD_REQUEST);
            }
        },
    };
    let identity = PeerIdentity::new(
        user_id,
        query.display_name,
        query.role.unwrap_or_else(|| "member".to_string()),
    );

    let (handle, rx) = match state.hub.register_connection(identity, room).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "failed to register connection");
            return Err(StatusCode::CONFLICT);
        }
    };

    tracing::info!(
        connection_id = %handle.id(),
        user_id = %handle.user_id(),
        "WebSocket connection accepted"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, handle, rx)))
}

/// Run the two pumps for an accepted connection.
///
/// The egress pump owns the sink half and the queue receiver; the ingress
/// pump owns the stream half and runs inline. Whichever pump hits a terminal
/// condition first initiates deregistration, which wakes the other.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<String>,
) {
    let (sender, receiver) = socket.split();

    let egress = tokio::spawn(egress_pump(
        state.hub.clone(),
        handle.clone(),
        rx,
        sender,
    ));
    ingress_pump(state.hub.clone(), handle.clone(), receiver).await;

    // The pumps deregister on their own terminal paths; this covers the rest
    // and is idempotent.
    state
        .hub
        .disconnect(handle.id(), DisconnectReason::PeerClosed)
        .await;
    let _ = egress.await;

    tracing::info!(
        connection_id = %handle.id(),
        user_id = %handle.user_id(),
        "WebSocket connection closed"
    );
}
