//! Worker agent for distributed capture
//!
//! A worker is a long-lived per-machine process that the master controller
//! drives over a small HTTP surface: start a batch of recorder processes,
//! drain their captured output lines, stop everything. At most one batch is
//! active per worker; starting a new batch fully stops the previous one.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────┐
//! │             Worker Agent              │
//! │                                       │
//! │  ┌─────────────────────────────────┐  │
//! │  │        Process Batch            │  │
//! │  │  - one child per device command │  │
//! │  │  - reader task per output pipe  │  │
//! │  │  - graceful-then-forced stop    │  │
//! │  └─────────────────────────────────┘  │
//! │                                       │
//! │  ┌─────────────────────────────────┐  │
//! │  │        Output Queue             │  │
//! │  │  - bounded mpsc, tagged lines   │  │
//! │  │  - non-blocking drain           │  │
//! │  └─────────────────────────────────┘  │
//! │                                       │
//! │  ┌─────────────────────────────────┐  │
//! │  │          HTTP Surface           │  │
//! │  │  GET  /api/health               │  │
//! │  │  POST /api/devices/start        │  │
//! │  │  POST /api/devices/outputs      │  │
//! │  │  POST /api/devices/stop         │  │
//! │  └─────────────────────────────────┘  │
//! └───────────────────────────────────────┘
//! ```

pub mod agent;
pub mod client;
pub mod process;
pub mod server;

// Re-export main types
pub use agent::{AgentError, BatchStatus, SpawnDetail, SpawnOutcome, StopStatus, WorkerAgent};
pub use client::{ClientConfig, ClientError, WorkerClient};
pub use process::CaptureProcess;
pub use server::{WorkerServer, WorkerServerConfig};
