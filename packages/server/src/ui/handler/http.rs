//! HTTP API endpoint handlers.
//!
//! The producer-facing injection surface: REST handlers and background jobs
//! push server-originated envelopes into the hub through these endpoints,
//! and query presence to decide on offline fallbacks.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{Envelope, EnvelopeKind, RoomName, UserId},
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersDto {
    pub user_ids: Vec<String>,
    pub connections: usize,
}

/// Get ids of users with at least one registered connection
pub async fn get_online_users(State(state): State<Arc<AppState>>) -> Json<OnlineUsersDto> {
    let user_ids = state
        .hub
        .online_user_ids()
        .await
        .into_iter()
        .map(|id| id.as_str().to_string())
        .collect();
    let connections = state.hub.connection_count().await;

    Json(OnlineUsersDto {
        user_ids,
        connections,
    })
}

#[derive(Debug, Serialize)]
pub struct UserOnlineDto {
    pub user_id: String,
    pub online: bool,
}

/// Check whether a single user has a registered connection
pub async fn get_user_online(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<UserOnlineDto>, StatusCode> {
    let user_id = UserId::new(user_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let online = state.hub.is_user_online(&user_id).await;

    Ok(Json(UserOnlineDto {
        user_id: user_id.as_str().to_string(),
        online,
    }))
}

/// Body of the server-originated dispatch endpoints
#[derive(Debug, Deserialize)]
pub struct InjectRequest {
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl InjectRequest {
    fn into_envelope(self, timestamp: String) -> Envelope {
        let mut envelope = Envelope::server(self.kind, self.data, timestamp);
        envelope.correlation_id = self.correlation_id;
        envelope
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryDto {
    pub delivered: usize,
}

/// Push a server-originated envelope to every connection of one user.
///
/// Returns 404 when the user has no registered connection, so the caller
/// can fall back to an offline-notification path.
pub async fn dispatch_to_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(body): Json<InjectRequest>,
) -> Result<Json<DeliveryDto>, StatusCode> {
    let user_id = UserId::new(user_id).map_err(|_| StatusCode::BAD_REQUEST)?;
    let envelope = body.into_envelope(state.hub.now_rfc3339());

    match state.hub.dispatch_to_user(&user_id, envelope).await {
        Ok(0) => Err(StatusCode::NOT_FOUND),
        Ok(delivered) => Ok(Json(DeliveryDto { delivered })),
        Err(e) => {
            tracing::error!(error = %e, "failed to dispatch to user");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Push a server-originated envelope to every connection in one room.
///
/// An empty room is not an error; the response carries a zero count.
pub async fn dispatch_to_room(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Json(body): Json<InjectRequest>,
) -> Result<Json<DeliveryDto>, StatusCode> {
    let room = RoomName::new(room).map_err(|_| StatusCode::BAD_REQUEST)?;
    let envelope = body.into_envelope(state.hub.now_rfc3339());

    match state.hub.dispatch_to_room(&room, envelope).await {
        Ok(delivered) => Ok(Json(DeliveryDto { delivered })),
        Err(e) => {
            tracing::error!(error = %e, "failed to dispatch to room");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Push a server-originated envelope to every registered connection
pub async fn broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InjectRequest>,
) -> Result<Json<DeliveryDto>, StatusCode> {
    let envelope = body.into_envelope(state.hub.now_rfc3339());

    match state.hub.broadcast(envelope).await {
        Ok(delivered) => Ok(Json(DeliveryDto { delivered })),
        Err(e) => {
            tracing::error!(error = %e, "failed to broadcast");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
