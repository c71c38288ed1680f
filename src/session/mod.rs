//! Device control system: one full recording session
//!
//! Composes the master controller (depth camera recorders, local or
//! fleet-synchronized) with the audio capture engine, applying the
//! configured inter-modality start delay and joining both before a session
//! counts as complete. Fleet readiness is always confirmed synchronously
//! before anything starts: the timing source must never fire while a
//! subordinate is still initializing.

pub mod naming;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::audio::{AudioError, AudioRecorder, RecordingSummary};
use crate::command::{build_commands, OutputLayout, RunRole, SessionStamp};
use crate::config::Config;
use crate::master::{MasterConfig, MasterController, MasterError};

// ============================================================================
// Session Mode
// ============================================================================

/// How a session coordinates its recorders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Single local recorder, no fleet
    Standalone,

    /// Fleet-synchronized: subordinates first, master as timing source
    Sync,
}

impl SessionMode {
    /// Parse a configuration mode string
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "standalone" => Some(Self::Standalone),
            "sync" => Some(Self::Sync),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Sync => "sync",
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Session Errors
// ============================================================================

/// Session orchestration errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// Mode string in the configuration is not recognized
    #[error("unknown recording mode '{0}'")]
    UnknownMode(String),

    /// Discovery found no workers for a sync session
    #[error("no sync workers available, session aborted")]
    NoFleet,

    /// Master controller failure
    #[error(transparent)]
    Master(#[from] MasterError),

    /// Audio engine failure
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Session bookkeeping I/O failure
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A modality task died
    #[error("session task failed: {0}")]
    Join(String),
}

// ============================================================================
// Session Report
// ============================================================================

/// What one completed session produced on this machine
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session timestamp
    pub stamp: SessionStamp,

    /// Directory the session recorded into
    pub session_dir: PathBuf,

    /// Files produced locally (recorder + audio)
    pub files: Vec<PathBuf>,

    /// Devices that participated across all modalities
    pub device_count: usize,

    /// Path of the written manifest
    pub manifest_path: PathBuf,
}

// ============================================================================
// Device Control System
// ============================================================================

/// Top-level coordinator for one recording session
pub struct DeviceControlSystem {
    config: Config,
    mode_override: Option<SessionMode>,
    local_debug_override: Option<bool>,
    controller: Arc<MasterController>,
    /// Engine of the running session, kept for the signal-handling path
    active_audio: std::sync::Mutex<Option<Arc<AudioRecorder>>>,
}

impl DeviceControlSystem {
    /// Create a session coordinator
    ///
    /// `mode_override` and `local_debug_override` take precedence over the
    /// configuration file when given.
    pub fn new(
        config: Config,
        mode_override: Option<SessionMode>,
        local_debug_override: Option<bool>,
    ) -> Self {
        let master_config = MasterConfig {
            worker_port: config.recording.worker_port,
            readiness_timeout: config.readiness_timeout(),
            ..Default::default()
        };

        Self {
            config,
            mode_override,
            local_debug_override,
            controller: Arc::new(MasterController::with_config(master_config)),
            active_audio: std::sync::Mutex::new(None),
        }
    }

    /// Shared handle to the master controller, for signal-handling paths
    pub fn controller(&self) -> Arc<MasterController> {
        Arc::clone(&self.controller)
    }

    /// End a running audio capture early (manual stop, interrupt path)
    pub fn request_audio_stop(&self) {
        if let Some(engine) = self
            .active_audio
            .lock()
            .expect("audio handle lock poisoned")
            .as_ref()
        {
            engine.request_stop();
        }
    }

    /// Resolved session mode
    pub fn mode(&self) -> Result<SessionMode, SessionError> {
        match self.mode_override {
            Some(mode) => Ok(mode),
            None => SessionMode::parse(&self.config.recording.mode)
                .ok_or_else(|| SessionError::UnknownMode(self.config.recording.mode.clone())),
        }
    }

    fn local_debug(&self) -> bool {
        self.local_debug_override
            .unwrap_or(self.config.recording.local_debug)
    }

    /// Run one full recording session and block until it completes
    pub async fn run(&self) -> Result<SessionReport, SessionError> {
        let mode = self.mode()?;
        let stamp = SessionStamp::now();
        info!(mode = %mode, stamp = %stamp, "Starting recording session");

        let session_dir = naming::create_session_dir(
            &self.config.recording.base_output_dir,
            mode.as_str(),
            &stamp,
        )?;

        let layout = match mode {
            SessionMode::Standalone => OutputLayout::Standalone(session_dir.clone()),
            SessionMode::Sync => OutputLayout::Fleet {
                master: session_dir.clone(),
                sub: self.config.camera.sub_output_dir.clone(),
            },
        };
        let recording = self.config.camera_recording_config(layout);
        let audio_config = self
            .config
            .audio_engine_config(session_dir.clone(), Some(naming::audio_filename(&stamp)));
        let has_audio = !audio_config.input_devices.is_empty();

        // Readiness must be confirmed before the timing source starts
        if mode == SessionMode::Sync {
            let proceed = self
                .controller
                .prepare_sync(&recording, &stamp, self.local_debug())
                .await?;
            if !proceed {
                return Err(SessionError::NoFleet);
            }
        }

        let local_role = match mode {
            SessionMode::Standalone => RunRole::Standalone,
            SessionMode::Sync => RunRole::Master,
        };

        // Recorder modality
        let controller = Arc::clone(&self.controller);
        let recorder_config = recording.clone();
        let recorder_stamp = stamp.clone();
        let recorder_task = tokio::spawn(async move {
            let started = match local_role {
                RunRole::Master => {
                    controller
                        .start_sync_master(&recorder_config, &recorder_stamp)
                        .await
                }
                _ => {
                    controller
                        .start_standalone(&recorder_config, &recorder_stamp)
                        .await
                }
            };
            match started {
                Ok(()) => {
                    controller.wait_for_recorder().await;
                    Ok(())
                }
                Err(e) => Err(e),
            }
        });

        // Audio modality, offset by the configured start delay
        let delay = match mode {
            SessionMode::Standalone => self.config.recording.standalone_delay_secs,
            SessionMode::Sync => self.config.recording.sync_delay_secs,
        };
        let audio_task = if has_audio {
            if delay > 0.0 {
                info!(delay_secs = delay, "Delaying audio start");
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
            let engine = Arc::new(AudioRecorder::new(audio_config));
            *self
                .active_audio
                .lock()
                .expect("audio handle lock poisoned") = Some(Arc::clone(&engine));
            Some(tokio::task::spawn_blocking(move || {
                engine.record_multi_devices()
            }))
        } else {
            None
        };

        // Both modalities converge here
        let recorder_result = recorder_task
            .await
            .map_err(|e| SessionError::Join(e.to_string()))?;

        let audio_summary: Option<RecordingSummary> = match audio_task {
            Some(task) => {
                let result = task.await.map_err(|e| SessionError::Join(e.to_string()))?;
                match result {
                    Ok(summary) => Some(summary),
                    Err(e) => {
                        warn!("Audio modality failed: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        // Always release resources before surfacing a recorder failure
        self.controller.cleanup().await;
        recorder_result?;

        let report = self.finalize(mode, stamp, session_dir, &recording, audio_summary)?;
        info!(
            files = report.files.len(),
            manifest = %report.manifest_path.display(),
            "Recording session complete"
        );
        Ok(report)
    }

    /// Session bookkeeping: file list, device count, manifest
    fn finalize(
        &self,
        mode: SessionMode,
        stamp: SessionStamp,
        session_dir: PathBuf,
        recording: &crate::command::RecordingConfig,
        audio_summary: Option<RecordingSummary>,
    ) -> Result<SessionReport, SessionError> {
        let local_role = match mode {
            SessionMode::Standalone => RunRole::Standalone,
            SessionMode::Sync => RunRole::Master,
        };

        let mut files: Vec<PathBuf> = build_commands(recording, local_role, &stamp, None)
            .into_iter()
            .map(|c| c.output_path)
            .collect();
        if let Some(summary) = &audio_summary {
            files.extend(summary.files.iter().cloned());
        }

        let device_count = self.device_count(mode);
        let manifest = naming::Manifest {
            mode: mode.as_str().to_string(),
            stamp: stamp.to_string(),
            device_count,
            duration_secs: self.config.recording.duration_secs,
            files: files.clone(),
        };
        let manifest_path = naming::write_manifest(&session_dir, &manifest)?;

        Ok(SessionReport {
            stamp,
            session_dir,
            files,
            device_count,
            manifest_path,
        })
    }

    /// Devices participating in the session across all modalities
    ///
    /// Sync mode counts every device index in the IP fan-out (devices, not
    /// hosts); standalone counts its single camera. Audio devices add on top.
    fn device_count(&self, mode: SessionMode) -> usize {
        let camera_count = match mode {
            SessionMode::Standalone => 1,
            SessionMode::Sync => self
                .config
                .camera
                .ip_devices
                .values()
                .map(|indices| indices.len())
                .sum::<usize>(),
        };
        camera_count + self.config.audio.input_devices.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(tmp: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.recording.base_output_dir = tmp.to_path_buf();
        config.recording.duration_secs = 1;
        config.recording.standalone_delay_secs = 0.0;
        // Fast-exiting stand-in for the recorder binary
        config.camera.tool = PathBuf::from("/bin/echo");
        config
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!(SessionMode::parse("standalone"), Some(SessionMode::Standalone));
        assert_eq!(SessionMode::parse("sync"), Some(SessionMode::Sync));
        assert_eq!(SessionMode::parse("broadcast"), None);
    }

    #[test]
    fn test_unknown_mode_is_an_error() {
        let mut config = Config::default();
        config.recording.mode = String::from("broadcast");
        let system = DeviceControlSystem::new(config, None, None);
        assert!(matches!(system.mode(), Err(SessionError::UnknownMode(_))));
    }

    #[test]
    fn test_mode_override_wins() {
        let mut config = Config::default();
        config.recording.mode = String::from("broadcast");
        let system = DeviceControlSystem::new(config, Some(SessionMode::Sync), None);
        assert_eq!(system.mode().unwrap(), SessionMode::Sync);
    }

    #[test]
    fn test_device_count_sums_devices_not_hosts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.camera.ip_devices =
            std::collections::HashMap::from([("127.0.0.1".to_string(), vec![0, 1, 2])]);
        config.audio.input_devices = vec![1, 5];

        let system = DeviceControlSystem::new(config, None, None);
        assert_eq!(system.device_count(SessionMode::Sync), 5);
        assert_eq!(system.device_count(SessionMode::Standalone), 3);
    }

    #[tokio::test]
    async fn test_standalone_session_end_to_end() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let system = DeviceControlSystem::new(config, Some(SessionMode::Standalone), None);

        let report = system.run().await.unwrap();
        assert!(report.session_dir.is_dir());
        assert!(report.manifest_path.is_file());
        assert_eq!(report.device_count, 1);

        let manifest: naming::Manifest = serde_json::from_str(
            &std::fs::read_to_string(&report.manifest_path).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.mode, "standalone");
    }

    #[tokio::test]
    async fn test_standalone_session_runs_both_modalities() {
        // Zero start delay: recorder and audio tasks launch back to back.
        // The audio device index is unavailable, so capture takes the
        // degraded path and the session still completes cleanly.
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.audio.input_devices = vec![900];
        let system = DeviceControlSystem::new(config, Some(SessionMode::Standalone), None);

        let report = system.run().await.unwrap();
        assert_eq!(report.device_count, 2);
        // The degraded audio device contributed no WAV file
        assert!(report
            .files
            .iter()
            .all(|f| f.extension().map(|e| e != "wav").unwrap_or(true)));
    }
}
