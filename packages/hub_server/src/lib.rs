//! HTTP and WebSocket front end for the channel hub.

use axum::{
    Router,
    routing::{get, post},
};
use channel_hub::ShardedHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use uuid::Uuid;

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod presence;
pub mod transport;

use crate::metrics::ServerMetrics;
use crate::presence::PresenceTracker;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: ShardedHandle,
    /// Also registered as the dispatcher's presence observer
    pub presence: Arc<PresenceTracker>,
    pub metrics: Arc<ServerMetrics>,
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/{channel}", get(handlers::websocket_handler))
        .route(
            "/api/channels/{channel}/messages",
            post(handlers::publish_handler),
        )
        .route("/api/channels", get(handlers::channels_handler))
        .route("/api/presence", get(handlers::presence_handler))
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
