//! Worker-local process batch management
//!
//! Owns the set of recorder processes started on this machine and the shared
//! queue their output lines drain into. All batch operations are serialized
//! behind one lock, which is what enforces the at-most-one-active-batch
//! invariant: a new batch fully stops the previous one before spawning
//! anything.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::process::CaptureProcess;

/// Output queue depth; readers block (never drop lines) when it fills
const OUTPUT_QUEUE_DEPTH: usize = 4096;

/// Default grace period before a stop escalates to a kill
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

// ============================================================================
// Agent Errors
// ============================================================================

/// Worker-local process errors
#[derive(Error, Debug)]
pub enum AgentError {
    /// A batch entry had no program to execute
    #[error("empty command in batch")]
    EmptyCommand,

    /// A recorder process failed to launch
    #[error("failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

// ============================================================================
// Status Records
// ============================================================================

/// Per-command spawn outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnOutcome {
    Started,
    Failed,
}

/// Spawn result for one command in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnDetail {
    /// Space-joined command line
    pub command: String,

    pub status: SpawnOutcome,

    /// Process id when the spawn succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// Failure reason when it did not
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of starting a batch
///
/// `code` is 0 when at least one process started; 1 only when every command
/// in the batch failed to spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatus {
    pub code: i32,
    pub msg: String,
    pub details: Vec<SpawnDetail>,
}

impl BatchStatus {
    /// Whether the batch is considered started
    pub fn is_started(&self) -> bool {
        self.code == 0
    }

    /// Number of processes that actually launched
    pub fn started_count(&self) -> usize {
        self.details
            .iter()
            .filter(|d| d.status == SpawnOutcome::Started)
            .count()
    }
}

/// Result of stopping a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopStatus {
    pub code: i32,
    pub msg: String,
}

// ============================================================================
// Worker Agent
// ============================================================================

/// Process batch owner for one worker machine
pub struct WorkerAgent {
    /// Running processes of the current batch
    processes: Mutex<Vec<CaptureProcess>>,

    /// Producer half handed to every process reader
    output_tx: mpsc::Sender<String>,

    /// Consumer half, drained by [`WorkerAgent::drain_outputs`]
    output_rx: Mutex<mpsc::Receiver<String>>,

    /// Grace period for stops
    grace: Duration,
}

impl WorkerAgent {
    /// Create an agent with the default stop grace period
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_STOP_GRACE)
    }

    /// Create an agent with a custom stop grace period
    pub fn with_grace(grace: Duration) -> Self {
        let (output_tx, output_rx) = mpsc::channel(OUTPUT_QUEUE_DEPTH);
        Self {
            processes: Mutex::new(Vec::new()),
            output_tx,
            output_rx: Mutex::new(output_rx),
            grace,
        }
    }

    /// Start a batch of recorder processes
    ///
    /// Any previous batch still running is stopped first. Spawn failures are
    /// reported per command; the batch only fails as a whole when every
    /// command failed.
    pub async fn start_batch(&self, commands: Vec<Vec<String>>) -> BatchStatus {
        let mut processes = self.processes.lock().await;

        if !processes.is_empty() {
            info!(
                previous = processes.len(),
                "New batch requested, stopping previous batch first"
            );
            self.stop_locked(&mut processes).await;
        }

        let mut details = Vec::with_capacity(commands.len());
        for argv in &commands {
            match CaptureProcess::spawn(argv, self.output_tx.clone()).await {
                Ok(process) => {
                    details.push(SpawnDetail {
                        command: process.command_line.clone(),
                        status: SpawnOutcome::Started,
                        pid: Some(process.pid),
                        error: None,
                    });
                    processes.push(process);
                }
                Err(e) => {
                    warn!("Batch spawn failure: {e}");
                    details.push(SpawnDetail {
                        command: argv.join(" "),
                        status: SpawnOutcome::Failed,
                        pid: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let started = details
            .iter()
            .filter(|d| d.status == SpawnOutcome::Started)
            .count();

        if started > 0 {
            BatchStatus {
                code: 0,
                msg: format!("batch started: {started}/{} processes", details.len()),
                details,
            }
        } else {
            BatchStatus {
                code: 1,
                msg: "every command in the batch failed to spawn".to_string(),
                details,
            }
        }
    }

    /// Drain everything accumulated in the output queue
    ///
    /// Never blocks; returns an empty vector when nothing is pending.
    pub async fn drain_outputs(&self) -> Vec<String> {
        let mut rx = self.output_rx.lock().await;
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    /// Stop every tracked process and clear the output queue
    ///
    /// Idempotent: stopping with nothing running is a successful no-op.
    pub async fn stop_all(&self) -> StopStatus {
        let mut processes = self.processes.lock().await;
        let stopped = self.stop_locked(&mut processes).await;

        // Discard queued output from the stopped batch
        let _ = self.drain_outputs().await;

        StopStatus {
            code: 0,
            msg: format!("stopped {stopped} processes"),
        }
    }

    /// Number of processes still running in the current batch
    pub async fn running_count(&self) -> usize {
        let mut processes = self.processes.lock().await;
        processes
            .iter_mut()
            .map(|p| p.is_running())
            .filter(|running| *running)
            .count()
    }

    /// Stop the current batch while already holding the process lock
    async fn stop_locked(&self, processes: &mut Vec<CaptureProcess>) -> usize {
        let mut stopped = 0;
        for mut process in processes.drain(..) {
            if process.is_running() {
                process.terminate(self.grace).await;
                stopped += 1;
            }
            process.detach_readers();
        }
        if stopped > 0 {
            info!(stopped = stopped, "Batch stopped");
        }
        stopped
    }
}

impl Default for WorkerAgent {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_batch_partial_spawn_failure_still_starts() {
        let agent = WorkerAgent::new();
        let status = agent
            .start_batch(vec![shell("sleep 5"), vec!["/no/such/tool".to_string()]])
            .await;

        assert!(status.is_started());
        assert_eq!(status.started_count(), 1);
        assert_eq!(status.details.len(), 2);
        assert_eq!(status.details[1].status, SpawnOutcome::Failed);
        assert!(status.details[1].error.is_some());

        agent.stop_all().await;
    }

    #[tokio::test]
    async fn test_batch_total_spawn_failure() {
        let agent = WorkerAgent::new();
        let status = agent
            .start_batch(vec![vec!["/no/such/tool".to_string()], vec![]])
            .await;

        assert_eq!(status.code, 1);
        assert_eq!(status.started_count(), 0);
    }

    #[tokio::test]
    async fn test_outputs_drain_non_blocking() {
        let agent = WorkerAgent::new();
        assert!(agent.drain_outputs().await.is_empty());

        agent.start_batch(vec![shell("echo ready")]).await;
        // Give the reader task time to push the line
        tokio::time::sleep(Duration::from_millis(300)).await;

        let lines = agent.drain_outputs().await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("ready"));

        // Second drain finds nothing new
        assert!(agent.drain_outputs().await.is_empty());
        agent.stop_all().await;
    }

    #[tokio::test]
    async fn test_new_batch_stops_previous() {
        let agent = WorkerAgent::with_grace(Duration::from_millis(500));
        let first = agent.start_batch(vec![shell("sleep 30")]).await;
        let first_pid = first.details[0].pid.unwrap();
        assert_eq!(agent.running_count().await, 1);

        let second = agent.start_batch(vec![shell("sleep 30")]).await;
        let second_pid = second.details[0].pid.unwrap();
        assert_ne!(first_pid, second_pid);

        // Only the second batch's process may be alive
        assert_eq!(agent.running_count().await, 1);
        agent.stop_all().await;
        assert_eq!(agent.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_stop_all_idempotent() {
        let agent = WorkerAgent::new();
        let status = agent.stop_all().await;
        assert_eq!(status.code, 0);

        agent.start_batch(vec![shell("sleep 30")]).await;
        assert_eq!(agent.stop_all().await.code, 0);
        assert_eq!(agent.stop_all().await.code, 0);
    }

    #[tokio::test]
    async fn test_stop_clears_output_queue() {
        let agent = WorkerAgent::new();
        agent.start_batch(vec![shell("echo leftover")]).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        agent.stop_all().await;
        assert!(agent.drain_outputs().await.is_empty());
    }
}
