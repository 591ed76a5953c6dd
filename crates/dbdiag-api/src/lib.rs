//! # dbdiag-api
//!
//! HTTP/WebSocket surface for the diagnosis engine:
//! - `GET /health` - liveness
//! - `GET /ws/chat` - interactive diagnosis over WebSocket

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

mod render;
mod ws;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use dbdiag_core::{Error, Result};
use dbdiag_engine::DialogueManager;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tracing::info;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub request_timeout_secs: u64,
}

/// Shared state for all handlers.
#[derive(Debug)]
pub struct AppState {
    pub manager: Arc<DialogueManager>,
    pub version: String,
}

/// The dbdiag HTTP/WebSocket server.
#[derive(Debug)]
pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, manager: Arc<DialogueManager>, version: String) -> Self {
        Self {
            config,
            state: Arc::new(AppState { manager, version }),
        }
    }

    /// Build the router (exposed separately for tests).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/ws/chat", get(ws::ws_chat))
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.request_timeout_secs,
            )))
            .with_state(self.state.clone())
    }

    /// Serve until the listener fails or the task is cancelled.
    pub async fn serve(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| Error::config(format!("cannot bind {}: {e}", self.config.bind_addr)))?;
        info!(addr = %self.config.bind_addr, "API server listening");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::storage(format!("server error: {e}")))
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
    }))
}
