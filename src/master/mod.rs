//! Master controller for fleet-synchronized recording
//!
//! The orchestration brain of a session: discovers workers, fans subordinate
//! command batches out to them, waits for the fleet-wide readiness barrier,
//! then starts the local master (or standalone) recorder process and exposes
//! lifecycle operations to the session layer.
//!
//! Subordinate recorders signal readiness by printing a marker line once they
//! are armed and waiting for the master's hardware sync pulse; the controller
//! counts those markers across all workers and only starts the timing source
//! once every expected *device* (not worker) has reported in.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{build_commands, RecordingConfig, RunRole, SessionStamp};
use crate::discovery::{self, ScanConfig, DEFAULT_AGENT_PORT};
use crate::worker::{AgentError, CaptureProcess, WorkerClient};

/// Line a subordinate recorder prints once armed for the master's sync pulse
pub const SUBORDINATE_READY_MARKER: &str = "[subordinate mode] Waiting for signal from master";

// ============================================================================
// Controller State
// ============================================================================

/// Lifecycle states of a master controller, tracked for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Idle,
    Discovering,
    SubordinatesStarting,
    AwaitingReadiness,
    MasterRunning,
    Completed,
    Failed,
}

// ============================================================================
// Controller Configuration
// ============================================================================

/// Tuning knobs for the master controller
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Port worker agents listen on
    pub worker_port: u16,

    /// Bound on the readiness wait; `None` waits forever
    pub readiness_timeout: Option<Duration>,

    /// Interval between readiness re-checks
    pub readiness_poll: Duration,

    /// Interval between worker output drains
    pub output_poll: Duration,

    /// Interval between local recorder liveness checks
    pub exit_poll: Duration,

    /// Grace period before local termination escalates to a kill
    pub stop_grace: Duration,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            worker_port: DEFAULT_AGENT_PORT,
            readiness_timeout: Some(Duration::from_secs(120)),
            readiness_poll: Duration::from_millis(500),
            output_poll: Duration::from_secs(1),
            exit_poll: Duration::from_secs(1),
            stop_grace: Duration::from_secs(3),
        }
    }
}

// ============================================================================
// Master Errors
// ============================================================================

/// Master controller errors
#[derive(Error, Debug)]
pub enum MasterError {
    /// No device index resolvable from the configuration
    #[error("no recorder device configured")]
    NoDeviceConfigured,

    /// A worker rejected or failed its batch
    #[error("worker {ip} failed to start its batch: {msg}")]
    SubordinateStartFailed { ip: String, msg: String },

    /// A worker could not be reached at all
    #[error("worker {ip} unreachable: {msg}")]
    WorkerUnreachable { ip: String, msg: String },

    /// The fleet never reached full readiness within the bound
    #[error("readiness timeout: {ready} of {expected} devices reported ready")]
    ReadinessTimeout { ready: usize, expected: usize },

    /// The local recorder process failed
    #[error("local recorder: {0}")]
    LocalRecorder(#[from] AgentError),
}

impl MasterError {
    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::WorkerUnreachable { .. } | Self::ReadinessTimeout { .. }
        )
    }
}

// ============================================================================
// Master Controller
// ============================================================================

struct Worker {
    ip: String,
    client: WorkerClient,
}

/// Orchestrator for one recording session's recorder processes
///
/// All methods take `&self`; the controller is designed to be shared behind
/// an [`Arc`] between the session task and the signal-handling path.
pub struct MasterController {
    config: MasterConfig,

    state: StdMutex<MasterState>,

    /// Connected workers of the current session
    workers: Mutex<Vec<Worker>>,

    /// Readiness markers observed so far
    ready_count: Arc<AtomicUsize>,

    /// Devices the fleet is expected to report
    expected_count: AtomicUsize,

    /// Output-polling task and its shutdown handle
    monitor: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,

    /// Local master/standalone recorder process
    process: Mutex<Option<CaptureProcess>>,

    /// Local recorder output sink; a logging task takes the receiver lazily
    local_output_tx: mpsc::Sender<String>,
    local_output_rx: Mutex<Option<mpsc::Receiver<String>>>,
    local_logger: Mutex<Option<JoinHandle<()>>>,

    /// Cleanup entry guard; makes cleanup signal-safe and idempotent
    cleaned: AtomicBool,
}

impl MasterController {
    /// Create a controller with default tuning
    pub fn new() -> Self {
        Self::with_config(MasterConfig::default())
    }

    /// Create a controller with explicit tuning
    pub fn with_config(config: MasterConfig) -> Self {
        let (local_output_tx, local_output_rx) = mpsc::channel(1024);

        Self {
            config,
            state: StdMutex::new(MasterState::Idle),
            workers: Mutex::new(Vec::new()),
            ready_count: Arc::new(AtomicUsize::new(0)),
            expected_count: AtomicUsize::new(0),
            monitor: Mutex::new(None),
            process: Mutex::new(None),
            local_output_tx,
            local_output_rx: Mutex::new(Some(local_output_rx)),
            local_logger: Mutex::new(None),
            cleaned: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> MasterState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, state: MasterState) {
        *self.state.lock().expect("state lock poisoned") = state;
        debug!(state = ?state, "Master state changed");
    }

    /// Readiness markers observed so far
    pub fn ready_count(&self) -> usize {
        self.ready_count.load(Ordering::SeqCst)
    }

    /// Devices the current fleet is expected to report
    pub fn expected_count(&self) -> usize {
        self.expected_count.load(Ordering::SeqCst)
    }

    /// Discover workers, start subordinates, and wait for fleet readiness
    ///
    /// Returns `Ok(false)` when discovery finds no workers at all — the
    /// session should abort rather than hang. Worker failures and a readiness
    /// timeout surface as errors.
    pub async fn prepare_sync(
        &self,
        config: &RecordingConfig,
        stamp: &SessionStamp,
        local_only: bool,
    ) -> Result<bool, MasterError> {
        self.set_state(MasterState::Discovering);

        let scan = ScanConfig {
            local_only,
            port: self.config.worker_port,
            ..Default::default()
        };
        let hosts = discovery::scan_agents(&scan).await;

        self.prepare_sync_with_hosts(config, stamp, hosts).await
    }

    /// [`MasterController::prepare_sync`] with an already-discovered host list
    pub async fn prepare_sync_with_hosts(
        &self,
        config: &RecordingConfig,
        stamp: &SessionStamp,
        hosts: Vec<String>,
    ) -> Result<bool, MasterError> {
        if hosts.is_empty() {
            warn!("No sync workers discovered, aborting session setup");
            self.set_state(MasterState::Failed);
            return Ok(false);
        }

        let expected = expected_device_count(config, &hosts);
        self.expected_count.store(expected, Ordering::SeqCst);
        self.ready_count.store(0, Ordering::SeqCst);
        info!(
            workers = hosts.len(),
            expected_devices = expected,
            "Preparing synchronized fleet"
        );

        // Connect and fan out subordinate batches, one call per worker so
        // device-index resolution stays per-host
        self.set_state(MasterState::SubordinatesStarting);
        {
            let mut workers = self.workers.lock().await;
            workers.clear();

            for ip in hosts {
                let client = WorkerClient::connect(&ip, self.config.worker_port).map_err(|e| {
                    MasterError::WorkerUnreachable {
                        ip: ip.clone(),
                        msg: e.to_string(),
                    }
                })?;

                let commands: Vec<Vec<String>> =
                    build_commands(config, RunRole::Subordinate, stamp, Some(&ip))
                        .iter()
                        .map(|c| c.argv())
                        .collect();

                if commands.is_empty() {
                    warn!(worker = %ip, "No subordinate commands resolved, skipping worker");
                    continue;
                }

                let status = client.start_devices(&commands).await.map_err(|e| {
                    MasterError::WorkerUnreachable {
                        ip: ip.clone(),
                        msg: e.to_string(),
                    }
                })?;

                if !status.is_started() {
                    self.set_state(MasterState::Failed);
                    return Err(MasterError::SubordinateStartFailed {
                        ip,
                        msg: status.msg,
                    });
                }

                info!(
                    worker = %ip,
                    started = status.started_count(),
                    "Subordinate batch started"
                );
                workers.push(Worker { ip, client });
            }
        }

        self.spawn_monitor().await;
        self.set_state(MasterState::AwaitingReadiness);
        self.wait_for_readiness(expected).await?;

        Ok(true)
    }

    /// Build and spawn the local master recorder
    pub async fn start_sync_master(
        &self,
        config: &RecordingConfig,
        stamp: &SessionStamp,
    ) -> Result<(), MasterError> {
        self.spawn_local(config, RunRole::Master, stamp).await
    }

    /// Build and spawn the local standalone recorder, skipping the fleet
    pub async fn start_standalone(
        &self,
        config: &RecordingConfig,
        stamp: &SessionStamp,
    ) -> Result<(), MasterError> {
        self.spawn_local(config, RunRole::Standalone, stamp).await
    }

    /// Block until the local recorder exits
    ///
    /// Polls liveness instead of awaiting the child directly so the calling
    /// task stays cancellable between checks.
    pub async fn wait_for_recorder(&self) {
        loop {
            {
                let mut process = self.process.lock().await;
                match process.as_mut() {
                    Some(p) => {
                        if !p.is_running() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            tokio::time::sleep(self.config.exit_poll).await;
        }
        self.set_state(MasterState::Completed);
        info!("Local recorder finished");
    }

    /// Release every resource of the session
    ///
    /// Idempotent and safe to call from the signal-handling path: an atomic
    /// guard lets only the first caller do the work, later calls return
    /// immediately.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            debug!("Cleanup already performed");
            return;
        }

        // Local recorder first, it is the timing source
        {
            let mut process = self.process.lock().await;
            if let Some(mut p) = process.take() {
                if p.is_running() {
                    p.terminate(self.config.stop_grace).await;
                    info!("Local recorder stopped");
                }
                p.detach_readers();
            }
        }

        // Stop the output monitor
        {
            let mut monitor = self.monitor.lock().await;
            if let Some((shutdown, handle)) = monitor.take() {
                let _ = shutdown.send(true);
                let _ = handle.await;
            }
        }

        // Best-effort remote stop; idempotent on the worker side
        {
            let workers = self.workers.lock().await;
            for worker in workers.iter() {
                if let Err(e) = worker.client.stop_devices().await {
                    warn!(worker = %worker.ip, "Remote stop failed: {e}");
                }
            }
        }

        // Stop the local output logger
        {
            let mut logger = self.local_logger.lock().await;
            if let Some(handle) = logger.take() {
                handle.abort();
            }
        }
    }

    async fn spawn_local(
        &self,
        config: &RecordingConfig,
        role: RunRole,
        stamp: &SessionStamp,
    ) -> Result<(), MasterError> {
        let command = build_commands(config, role, stamp, None)
            .into_iter()
            .next()
            .ok_or(MasterError::NoDeviceConfigured)?;

        // First spawn attaches the local output logger
        {
            let mut logger = self.local_logger.lock().await;
            if logger.is_none() {
                if let Some(rx) = self.local_output_rx.lock().await.take() {
                    *logger = Some(tokio::spawn(log_local_output(rx)));
                }
            }
        }

        info!(role = %role, command = %command.command_line(), "Starting local recorder");
        let process = CaptureProcess::spawn(&command.argv(), self.local_output_tx.clone()).await?;

        *self.process.lock().await = Some(process);
        self.set_state(MasterState::MasterRunning);
        Ok(())
    }

    /// Poll until the fleet reports full readiness or the bound elapses
    async fn wait_for_readiness(&self, expected: usize) -> Result<(), MasterError> {
        let deadline = self.config.readiness_timeout.map(|t| Instant::now() + t);

        loop {
            let ready = self.ready_count.load(Ordering::SeqCst);
            if ready >= expected {
                info!(devices = expected, "All subordinate devices ready");
                return Ok(());
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.set_state(MasterState::Failed);
                    error!(
                        ready = ready,
                        expected = expected,
                        "Fleet readiness timed out"
                    );
                    return Err(MasterError::ReadinessTimeout { ready, expected });
                }
            }

            tokio::time::sleep(self.config.readiness_poll).await;
        }
    }

    /// Start the background worker-output poller once per session
    async fn spawn_monitor(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return;
        }

        let targets: Vec<(String, WorkerClient)> = {
            let workers = self.workers.lock().await;
            workers
                .iter()
                .map(|w| (w.ip.clone(), w.client.clone()))
                .collect()
        };

        let ready = Arc::clone(&self.ready_count);
        let poll = self.config.output_poll;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {
                        for (ip, client) in &targets {
                            match client.get_outputs().await {
                                Ok(lines) => {
                                    for line in lines {
                                        info!(worker = %ip, "{line}");
                                        if line.contains(SUBORDINATE_READY_MARKER) {
                                            ready.fetch_add(1, Ordering::SeqCst);
                                        }
                                    }
                                }
                                Err(e) => {
                                    debug!(worker = %ip, "Output poll failed: {e}");
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Worker output monitor shutting down");
                        break;
                    }
                }
            }
        });

        *monitor = Some((shutdown_tx, handle));
    }
}

impl Default for MasterController {
    fn default() -> Self {
        Self::new()
    }
}

/// Total devices the fleet must report ready
///
/// Counts every device index listed for a worker's IP (one for workers absent
/// from the mapping) — devices, never hosts, so one worker driving three
/// cameras needs three markers.
pub fn expected_device_count(config: &RecordingConfig, hosts: &[String]) -> usize {
    hosts
        .iter()
        .map(|ip| config.devices_for(Some(ip)).len())
        .sum()
}

/// Logging task for the local recorder's output lines
async fn log_local_output(mut rx: mpsc::Receiver<String>) {
    while let Some(line) = rx.recv().await {
        info!(source = "local-recorder", "{line}");
    }
}

// ============================================================================
// Tests
// ============================================================================
