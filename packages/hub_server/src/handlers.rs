use axum::{
    Json,
    extract::{Path, Query, State, WebSocketUpgrade, ws::WebSocket},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use channel_hub::{HubError, RawEnvelope, ShardedHandle};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::AppState;
use crate::metrics::{HealthStatus, ServerMetrics};
use crate::transport;

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    /// Presence key; only meaningful on the heartbeat channel
    pub key: Option<String>,
}

/// WebSocket upgrade for `/ws/{channel}`.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.dispatcher.is_running() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let dispatcher = state.dispatcher.clone();
    let metrics = state.metrics.clone();
    let key = query.key.filter(|k| !k.is_empty());

    ws.on_upgrade(move |socket| attach(socket, dispatcher, metrics, channel, key))
}

async fn attach(
    socket: WebSocket,
    dispatcher: ShardedHandle,
    metrics: Arc<ServerMetrics>,
    channel: String,
    key: Option<String>,
) {
    let (sink, stream) = transport::split(socket);
    let handle = dispatcher.handle_for(&channel);
    match channel_hub::connect(handle, sink, stream, &channel, key).await {
        Ok(id) => {
            metrics.connection_accepted();
            debug!(channel = %channel, client = %id, "WebSocket attached");
        }
        Err(e) => {
            metrics.connect_failed();
            warn!(channel = %channel, "Failed to attach WebSocket: {}", e);
        }
    }
}

/// Body of a publish request. The channel comes from the path.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub operation: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Fire-and-forget publish. Payload problems are dropped inside the
/// dispatcher and never reported here.
pub async fn publish_handler(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Response {
    let raw = RawEnvelope {
        channel,
        operation: request.operation,
        kind: request.kind,
        payload: request.payload,
    };

    match state.dispatcher.broadcast_raw(raw).await {
        Ok(()) => {
            state.metrics.message_published();
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            state.metrics.publish_rejected();
            stopped_response(e)
        }
    }
}

pub async fn channels_handler(State(state): State<AppState>) -> Response {
    match state.dispatcher.channels().await {
        Ok(channels) => Json(channels).into_response(),
        Err(e) => stopped_response(e),
    }
}

pub async fn presence_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "online": state.presence.online_keys() }))
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let running = state.dispatcher.is_running();
    let metrics = state.metrics.snapshot(state.dispatcher.stats());

    let body = Json(HealthStatus {
        status: if running { "healthy" } else { "stopped" }.to_string(),
        dispatcher_running: running,
        shards: state.dispatcher.shard_count(),
        connections: metrics.connections.active,
        uptime_secs: metrics.uptime_secs,
    });

    if running {
        body.into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot(state.dispatcher.stats()))
}

fn stopped_response(error: HubError) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
