//! HTTP surface of the worker agent
//!
//! Exposes the agent's three operations plus a health endpoint to the master
//! controller. The transport is plain HTTP+JSON on the LAN, unauthenticated:
//! any host that can reach the port is treated as a legitimate master.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::agent::{BatchStatus, StopStatus, WorkerAgent, DEFAULT_STOP_GRACE};
use crate::discovery::DEFAULT_AGENT_PORT;

// ============================================================================
// Server Configuration
// ============================================================================

/// Configuration for the worker agent server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerServerConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Grace period in seconds before stops escalate to kills
    pub stop_grace_secs: u64,

    /// Enable request logging
    pub enable_request_logging: bool,
}

impl Default for WorkerServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_AGENT_PORT)),
            stop_grace_secs: DEFAULT_STOP_GRACE.as_secs(),
            enable_request_logging: true,
        }
    }
}

// ============================================================================
// App State
// ============================================================================

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// The process batch owner
    pub agent: Arc<WorkerAgent>,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Batch start request: one argument vector per device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub commands: Vec<Vec<String>>,
}

/// Drained output lines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsResponse {
    pub lines: Vec<String>,
}

/// Health check response; also serves as the discovery capability probe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub running_processes: usize,
}

// ============================================================================
// Worker Server
// ============================================================================

/// HTTP server wrapping a [`WorkerAgent`]
pub struct WorkerServer {
    config: WorkerServerConfig,
    state: AppState,
}

impl WorkerServer {
    /// Create a new worker server
    pub fn new(config: WorkerServerConfig) -> Self {
        let agent = Arc::new(WorkerAgent::with_grace(Duration::from_secs(
            config.stop_grace_secs,
        )));
        let state = AppState {
            agent,
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }
        router
    }

    /// Start the server
    pub async fn start(&self) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        info!("Starting worker agent on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        Ok(())
    }

    /// Start with graceful shutdown; stops any running batch on the way out
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        info!("Starting worker agent on {} (with graceful shutdown)", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        // Leave no orphaned recorder processes behind
        self.state.agent.stop_all().await;
        info!("Worker agent shutdown complete");
        Ok(())
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/devices/start", post(start_devices))
        .route("/api/devices/outputs", post(get_outputs))
        .route("/api/devices/stop", post(stop_devices))
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        running_processes: state.agent.running_count().await,
    })
}

/// Start a batch of recorder processes
async fn start_devices(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Json<BatchStatus> {
    info!(commands = request.commands.len(), "Batch start requested");
    Json(state.agent.start_batch(request.commands).await)
}

/// Drain accumulated output lines
async fn get_outputs(State(state): State<AppState>) -> Json<OutputsResponse> {
    Json(OutputsResponse {
        lines: state.agent.drain_outputs().await,
    })
}

/// Stop all running recorder processes
async fn stop_devices(State(state): State<AppState>) -> Json<StopStatus> {
    info!("Batch stop requested");
    Json(state.agent.stop_all().await)
}

// ============================================================================
// Server Errors
// ============================================================================

/// Worker server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Failed to bind to address
    #[error("failed to bind: {0}")]
    BindError(String),

    /// Server error
    #[error("server error: {0}")]
    ServeError(String),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WorkerServerConfig::default();
        assert_eq!(config.bind_address.port(), DEFAULT_AGENT_PORT);
        assert_eq!(config.stop_grace_secs, 3);
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = WorkerServer::new(WorkerServerConfig::default());
        let state = server.state();
        assert_eq!(state.agent.running_count().await, 0);
    }

    #[test]
    fn test_start_request_roundtrip() {
        let request = StartRequest {
            commands: vec![vec!["k4arecorder".to_string(), "--device".to_string(), "0".to_string()]],
        };
        let json = serde_json::to_string(&request).unwrap();
        let parsed: StartRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.commands.len(), 1);
        assert_eq!(parsed.commands[0][0], "k4arecorder");
    }
}
