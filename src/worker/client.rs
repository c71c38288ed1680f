//! Worker client for the master controller
//!
//! This module provides the client side of the worker agent's HTTP surface.
//! One client is created per discovered worker for the lifetime of a single
//! session and dropped when the session ends; there is no connection pool
//! across sessions.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::agent::{BatchStatus, StopStatus};
use super::server::{HealthResponse, OutputsResponse, StartRequest};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for a worker client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Worker base URL, e.g. `http://192.168.1.20:8700`
    pub base_url: String,

    /// Request timeout
    pub timeout: Duration,

    /// Retry count for failed requests
    pub retry_count: u32,

    /// Retry delay
    pub retry_delay: Duration,
}

impl ClientConfig {
    /// Create a new client config for a worker address
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{ip}:{port}"),
            timeout: Duration::from_secs(10),
            retry_count: 2,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }
}

// ============================================================================
// Worker Client
// ============================================================================

/// Client for one worker agent
#[derive(Clone)]
pub struct WorkerClient {
    config: ClientConfig,
    http_client: Client,
}

impl WorkerClient {
    /// Create a client for a worker address
    pub fn connect(ip: &str, port: u16) -> Result<Self, ClientError> {
        Self::with_config(ClientConfig::new(ip, port))
    }

    /// Create a client from an explicit configuration
    pub fn with_config(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Worker base URL
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Start a batch of device commands on the worker
    pub async fn start_devices(
        &self,
        commands: &[Vec<String>],
    ) -> Result<BatchStatus, ClientError> {
        let request = StartRequest {
            commands: commands.to_vec(),
        };
        let url = format!("{}/api/devices/start", self.config.base_url);
        self.post_with_retry(&url, &request).await
    }

    /// Drain the worker's accumulated output lines
    pub async fn get_outputs(&self) -> Result<Vec<String>, ClientError> {
        let url = format!("{}/api/devices/outputs", self.config.base_url);
        // No retry: the next poll tick covers a transient miss
        let response: OutputsResponse = self.post_once(&url, &serde_json::json!({})).await?;
        Ok(response.lines)
    }

    /// Stop every running process on the worker
    pub async fn stop_devices(&self) -> Result<StopStatus, ClientError> {
        let url = format!("{}/api/devices/stop", self.config.base_url);
        self.post_with_retry(&url, &serde_json::json!({})).await
    }

    /// Check worker health
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = format!("{}/api/health", self.config.base_url);
        self.get_with_retry(&url).await
    }

    // Internal: single POST without retry
    async fn post_once<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ClientError::HttpError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    // Internal: GET request with retry
    async fn get_with_retry<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, ClientError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                debug!(url = url, attempt = attempt, "Retrying worker request");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.http_client.get(url).send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        match response.json::<T>().await {
                            Ok(data) => return Ok(data),
                            Err(e) => {
                                last_error = Some(ClientError::ParseError(e.to_string()));
                            }
                        }
                    } else {
                        last_error = Some(ClientError::HttpError {
                            status: response.status().as_u16(),
                            message: response.text().await.unwrap_or_default(),
                        });
                    }
                }
                Err(e) => {
                    last_error = Some(ClientError::NetworkError(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("unknown error".to_string())))
    }

    // Internal: POST request with retry
    async fn post_with_retry<T: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<R, ClientError> {
        let mut last_error = None;

        for attempt in 0..=self.config.retry_count {
            if attempt > 0 {
                debug!(url = url, attempt = attempt, "Retrying worker request");
                tokio::time::sleep(self.config.retry_delay).await;
            }

            match self.post_once(url, body).await {
                Ok(data) => return Ok(data),
                Err(e @ ClientError::ParseError(_)) => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::NetworkError("unknown error".to_string())))
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Worker client errors
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Initialization error
    #[error("initialization error: {0}")]
    InitError(String),

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// HTTP error
    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },

    /// Parse error
    #[error("parse error: {0}")]
    ParseError(String),
}

impl ClientError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NetworkError(_) | Self::HttpError { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_creation() {
        let config = ClientConfig::new("192.168.1.20", 8700);
        assert_eq!(config.base_url, "http://192.168.1.20:8700");
        assert_eq!(config.retry_count, 2);
    }

    #[test]
    fn test_client_config_with_timeout() {
        let config = ClientConfig::new("127.0.0.1", 8700)
            .with_timeout(Duration::from_secs(30))
            .with_retry_count(5);

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry_count, 5);
    }

    #[test]
    fn test_client_creation() {
        let client = WorkerClient::connect("127.0.0.1", 8700);
        assert!(client.is_ok());
    }

    #[test]
    fn test_error_recoverability() {
        assert!(ClientError::NetworkError("refused".to_string()).is_recoverable());
        assert!(!ClientError::ParseError("bad json".to_string()).is_recoverable());
    }
}
