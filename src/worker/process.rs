//! Child process lifecycle for recorder invocations
//!
//! Wraps one running recorder process together with the reader tasks that
//! drain its stdout and stderr into the agent's shared output queue. The
//! reader tasks exit on their own once the process terminates and its output
//! is fully consumed.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::agent::AgentError;

/// One running recorder process owned by a worker batch
pub struct CaptureProcess {
    /// OS process id at spawn time
    pub pid: u32,

    /// Space-joined command line, used to tag output lines
    pub command_line: String,

    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl CaptureProcess {
    /// Spawn a recorder process and attach output readers
    ///
    /// Both stdout and stderr are captured; every line is tagged with the
    /// originating command and pid before being pushed into `output_tx`.
    pub async fn spawn(
        argv: &[String],
        output_tx: mpsc::Sender<String>,
    ) -> Result<Self, AgentError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AgentError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::SpawnFailed {
                command: argv.join(" "),
                source: e,
            })?;

        let pid = child.id().unwrap_or(0);
        let command_line = argv.join(" ");
        info!(pid = pid, command = %command_line, "Recorder process started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, command_line.clone(), pid, output_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, command_line.clone(), pid, output_tx));
        }

        Ok(Self {
            pid,
            command_line,
            child,
            readers,
        })
    }

    /// Whether the process is still running
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        self.child.wait().await
    }

    /// Terminate the process, gracefully first, then forcefully
    ///
    /// Returns `true` when the process ended within the grace period. Safe to
    /// call on an already-terminated process.
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        if !self.is_running() {
            debug!(pid = self.pid, "Process already terminated");
            return true;
        }

        request_graceful_stop(&mut self.child, self.pid);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = self.pid, status = %status, "Process terminated gracefully");
                true
            }
            Ok(Err(e)) => {
                warn!(pid = self.pid, "Wait failed during termination: {e}");
                false
            }
            Err(_) => {
                warn!(
                    pid = self.pid,
                    grace_ms = grace.as_millis(),
                    "Grace period exceeded, killing process"
                );
                if let Err(e) = self.child.start_kill() {
                    warn!(pid = self.pid, "Kill failed: {e}");
                }
                let _ = self.child.wait().await;
                false
            }
        }
    }

    /// Abort the reader tasks; used when the queue is being torn down
    pub fn detach_readers(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
    }
}

/// Ask the process to stop without killing it outright
#[cfg(unix)]
fn request_graceful_stop(child: &mut Child, pid: u32) {
    if pid == 0 {
        return;
    }
    // SIGTERM lets the recorder finalize its container file
    let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if result != 0 {
        warn!(pid = pid, "SIGTERM delivery failed");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
fn request_graceful_stop(child: &mut Child, _pid: u32) {
    // No portable graceful signal; the grace period only covers voluntary exit
    let _ = child;
}

/// Reader task draining one output pipe into the shared queue
fn spawn_reader(
    pipe: impl AsyncRead + Unpin + Send + 'static,
    command_line: String,
    pid: u32,
    output_tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let tagged = format!("[{command_line} (pid:{pid})] {}", line.trim_end());
                    if output_tx.send(tagged).await.is_err() {
                        // Queue dropped; nobody is listening anymore
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(pid = pid, "Output read failed: {e}");
                    break;
                }
            }
        }
        debug!(pid = pid, "Output reader finished");
    })
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
    async fn test_spawn_captures_tagged_output() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut process = CaptureProcess::spawn(&shell("echo hello"), tx)
            .await
            .unwrap();

        process.wait().await.unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.contains("hello"));
        assert!(line.contains(&format!("(pid:{})", process.pid)));
    }

    #[tokio::test]
    async fn test_spawn_captures_stderr() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut process = CaptureProcess::spawn(&shell("echo oops >&2"), tx)
            .await
            .unwrap();

        process.wait().await.unwrap();
        let line = rx.recv().await.unwrap();
        assert!(line.contains("oops"));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let result =
            CaptureProcess::spawn(&["/no/such/recorder-binary".to_string()], tx).await;
        assert!(matches!(result, Err(AgentError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let result = CaptureProcess::spawn(&[], tx).await;
        assert!(matches!(result, Err(AgentError::EmptyCommand)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_graceful_within_grace() {
        let (tx, _rx) = mpsc::channel(4);
        let mut process = CaptureProcess::spawn(&shell("sleep 30"), tx).await.unwrap();

        let graceful = process.terminate(Duration::from_secs(2)).await;
        assert!(graceful);
        assert!(!process.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_on_ignored_term() {
        let (tx, _rx) = mpsc::channel(4);
        // Trap blocks SIGTERM so termination has to escalate
        let mut process =
            CaptureProcess::spawn(&shell("trap '' TERM; sleep 30"), tx)
                .await
                .unwrap();
        // Give the shell a moment to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let graceful = process.terminate(Duration::from_millis(500)).await;
        assert!(!graceful);
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_terminate_idempotent_on_exited_process() {
        let (tx, _rx) = mpsc::channel(4);
        let mut process = CaptureProcess::spawn(&shell("true"), tx).await.unwrap();
        process.wait().await.unwrap();

        assert!(process.terminate(Duration::from_millis(100)).await);
        assert!(process.terminate(Duration::from_millis(100)).await);
    }
}
