//! hansori - Synchronized Multi-Sensor Capture Orchestrator
//!
//! A recording system that starts depth-camera recorder processes across a
//! fleet of machines with bounded start skew, alongside barrier-aligned
//! multi-device audio capture on the controlling machine.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`command`] - Recorder command generation (role-aware, pure)
//! - [`discovery`] - Subnet scanning for worker agents
//! - [`worker`] - Worker agent: process batches, output draining, HTTP surface
//! - [`master`] - Master controller: fleet coordination and readiness barrier
//! - [`audio`] - Barrier-synchronized multi-device audio capture
//! - [`session`] - One full recording session across both modalities
//!
//! # Example
//!
//! ```no_run
//! use hansori::config::Config;
//! use hansori::session::{DeviceControlSystem, SessionMode};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(std::path::Path::new("config.toml"))?;
//!     let system = DeviceControlSystem::new(config, Some(SessionMode::Standalone), None);
//!     let report = system.run().await?;
//!     println!("recorded {} files", report.files.len());
//!     Ok(())
//! }
//! ```

pub mod audio;
pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod master;
pub mod session;
pub mod worker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audio::{AudioConfig, AudioRecorder, StopMode};
    pub use crate::command::{DeviceCommand, OutputLayout, RecordingConfig, RunRole, SessionStamp};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::master::MasterController;
    pub use crate::session::{DeviceControlSystem, SessionMode};
    pub use crate::worker::{WorkerAgent, WorkerClient};
}

// Direct re-exports for convenience
pub use command::{DeviceCommand, RecordingConfig, RunRole, SessionStamp};
