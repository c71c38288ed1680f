//! Unified error handling for the hansori crate
//!
//! This module provides a unified error type that consolidates all
//! domain-specific errors into a single `Error` enum, while maintaining the
//! ability to use domain-specific errors when needed.
//!
//! # Usage
//!
//! ```rust,ignore
//! use hansori::error::{Error, Result};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retrying: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::audio::AudioError;
pub use crate::master::MasterError;
pub use crate::session::SessionError;
pub use crate::worker::{AgentError, ClientError};

/// Unified error type for the hansori crate
///
/// This enum wraps all domain-specific errors, providing a single error type
/// that can be used across module boundaries while preserving the detailed
/// error information.
#[derive(Error, Debug)]
pub enum Error {
    /// Master controller errors (discovery, readiness, local process)
    #[error("Master error: {0}")]
    Master(#[from] MasterError),

    /// Worker agent errors (spawn, termination)
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    /// Worker client errors (remote calls)
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Audio capture errors
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Session orchestration errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Master(e) => e.is_recoverable(),
            Self::Agent(_) => false,
            Self::Client(e) => e.is_recoverable(),
            Self::Audio(_) => false,
            Self::Session(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) => false,
            Self::Http(_) => true, // HTTP errors are often transient
            Self::Config(_) => false,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let err = Error::config("missing camera tool path");
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("missing camera tool path"));
    }

    #[test]
    fn test_client_error_conversion() {
        let client_err = ClientError::NetworkError("connection refused".to_string());
        let unified: Error = client_err.into();
        assert!(matches!(unified, Error::Client(_)));
        assert!(unified.is_recoverable());
    }

    #[test]
    fn test_io_error_is_recoverable() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "timed out").into();
        assert!(err.is_recoverable());
    }
}
