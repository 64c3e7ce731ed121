mod download;
mod error;
mod websocket;

pub use download::{download_content, health_check};
pub use error::{ApiError, ApiResult};
pub use websocket::websocket_handler;

use crate::config::ServerConfig;
use crate::relay::RelayHub;
use axum::http::HeaderValue;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ApiState {
    pub hub: Arc<RelayHub>,
    pub max_frame_size: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

/// Assemble the HTTP surface: health probe, the WebSocket event endpoint,
/// and streaming content download.
pub fn create_api_server(hub: Arc<RelayHub>, config: &ServerConfig) -> Router {
    let state = ApiState {
        hub,
        max_frame_size: config.max_frame_size,
        heartbeat_interval: config.heartbeat_interval_duration(),
        heartbeat_timeout: config.heartbeat_timeout_duration(),
    };

    let cors = if config.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        match config.cors_origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new()
                .allow_origin(origin)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                tracing::warn!(origin = %config.cors_origin, "invalid CORS origin, allowing any");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .route("/api/content/:content_id/download", get(download_content))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
