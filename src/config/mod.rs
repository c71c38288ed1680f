//! Configuration management for the hansori recording system
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files, and derives the per-subsystem configurations
//! (camera recording, audio engine) consumed by a session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::{AudioConfig, StopMode};
use crate::command::{OutputLayout, RecordingConfig};
use crate::discovery::DEFAULT_AGENT_PORT;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Session-level recording configuration
    pub recording: RecordingSettings,

    /// Depth camera recorder configuration
    pub camera: CameraSettings,

    /// Audio capture configuration
    pub audio: AudioSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Session-level recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Recording mode: "standalone" or "sync"
    pub mode: String,

    /// Recording length in seconds, shared by every device
    pub duration_secs: u64,

    /// Audio start delay after the recorder in standalone mode (seconds)
    pub standalone_delay_secs: f64,

    /// Audio start delay after the master recorder in sync mode (seconds)
    pub sync_delay_secs: f64,

    /// Restrict discovery to the loopback address (debug shortcut)
    pub local_debug: bool,

    /// Root directory for recording sessions
    pub base_output_dir: PathBuf,

    /// Port worker agents listen on
    pub worker_port: u16,

    /// Bound on the fleet readiness wait; 0 waits forever
    pub readiness_timeout_secs: u64,
}

/// Depth camera recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Path to the external recorder binary
    pub tool: PathBuf,

    /// Primary device index
    pub device: Option<u32>,

    /// Color camera mode, e.g. "720p"
    pub color_mode: Option<String>,

    /// Depth camera mode, e.g. "NFOV_UNBINNED"
    pub depth_mode: Option<String>,

    /// Color/depth frame offset in microseconds
    pub depth_delay_us: Option<i64>,

    /// Camera frame rate
    pub frame_rate: Option<u32>,

    /// IMU toggle: "ON"/"OFF"
    pub imu: Option<String>,

    /// Master-to-subordinate sync delay in microseconds
    pub sync_delay_us: Option<u32>,

    /// Manual exposure value
    pub exposure: Option<i32>,

    /// Directory subordinate recorders write to on their own machines
    pub sub_output_dir: PathBuf,

    /// IP to device-index fan-out for sync mode
    #[serde(default)]
    pub ip_devices: HashMap<String, Vec<u32>>,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Input device indices (host enumeration order)
    pub input_devices: Vec<usize>,

    /// Samples per second
    pub sample_rate: u32,

    /// Channels per device
    pub channels: u16,

    /// Samples per stream buffer
    pub frames_per_buffer: u32,

    /// Stop mode: "timing" (uses the session duration) or "manual"
    pub mode: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(mode) = std::env::var("HANSORI_MODE") {
            config.recording.mode = mode;
        }
        if let Some(duration) = env_parse::<u64>("HANSORI_DURATION_SECS") {
            config.recording.duration_secs = duration;
        }
        if let Some(local_debug) = env_parse::<bool>("HANSORI_LOCAL_DEBUG") {
            config.recording.local_debug = local_debug;
        }
        if let Ok(dir) = std::env::var("HANSORI_OUTPUT_DIR") {
            config.recording.base_output_dir = dir.into();
        }
        if let Some(port) = env_parse::<u16>("HANSORI_WORKER_PORT") {
            config.recording.worker_port = port;
        }
        if let Ok(tool) = std::env::var("HANSORI_RECORDER_TOOL") {
            config.camera.tool = tool.into();
        }
        if let Ok(level) = std::env::var("HANSORI_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("HANSORI_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.recording.mode != "standalone" && self.recording.mode != "sync" {
            anyhow::bail!(
                "recording.mode must be 'standalone' or 'sync', got '{}'",
                self.recording.mode
            );
        }

        if self.recording.duration_secs == 0 {
            anyhow::bail!("recording.duration_secs must be greater than 0");
        }

        if self.audio.mode != "timing" && self.audio.mode != "manual" {
            anyhow::bail!(
                "audio.mode must be 'timing' or 'manual', got '{}'",
                self.audio.mode
            );
        }

        if self.camera.tool.as_os_str().is_empty() {
            anyhow::bail!("camera.tool must point at the recorder binary");
        }

        if self.audio.frames_per_buffer == 0 {
            anyhow::bail!("audio.frames_per_buffer must be greater than 0");
        }

        Ok(())
    }

    /// Get the session duration as Duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.recording.duration_secs)
    }

    /// Bound on the fleet readiness wait; `None` waits forever
    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        match self.recording.readiness_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Derive the recorder configuration for one session
    ///
    /// The record length flag always comes from the session duration, and
    /// the output layout from where the session directory was created.
    pub fn camera_recording_config(&self, output: OutputLayout) -> RecordingConfig {
        RecordingConfig {
            tool: self.camera.tool.clone(),
            device: self.camera.device,
            record_length: Some(self.recording.duration_secs as u32),
            color_mode: self.camera.color_mode.clone(),
            depth_mode: self.camera.depth_mode.clone(),
            depth_delay_us: self.camera.depth_delay_us,
            frame_rate: self.camera.frame_rate,
            imu: self.camera.imu.clone(),
            sync_delay_us: self.camera.sync_delay_us,
            exposure: self.camera.exposure,
            ip_devices: self.camera.ip_devices.clone(),
            output,
        }
    }

    /// Derive the audio engine configuration for one session
    pub fn audio_engine_config(&self, out_dir: PathBuf, filename: Option<String>) -> AudioConfig {
        let mode = if self.audio.mode == "manual" {
            StopMode::Manual
        } else {
            StopMode::Timing(self.recording.duration_secs)
        };

        AudioConfig {
            input_devices: self.audio.input_devices.clone(),
            sample_rate: self.audio.sample_rate,
            channels: self.audio.channels,
            frames_per_buffer: self.audio.frames_per_buffer,
            mode,
            out_dir,
            filename,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recording: RecordingSettings {
                mode: String::from("standalone"),
                duration_secs: 10,
                standalone_delay_secs: 0.0,
                sync_delay_secs: 0.86,
                local_debug: true,
                base_output_dir: PathBuf::from("recordings"),
                worker_port: DEFAULT_AGENT_PORT,
                readiness_timeout_secs: 120,
            },
            camera: CameraSettings {
                tool: PathBuf::from("k4arecorder"),
                device: Some(0),
                color_mode: Some(String::from("720p")),
                depth_mode: Some(String::from("NFOV_UNBINNED")),
                depth_delay_us: None,
                frame_rate: Some(15),
                imu: Some(String::from("OFF")),
                sync_delay_us: Some(200),
                exposure: None,
                sub_output_dir: PathBuf::from("recordings/sub"),
                ip_devices: HashMap::new(),
            },
            audio: AudioSettings {
                input_devices: Vec::new(),
                sample_rate: 44_100,
                channels: 1,
                frames_per_buffer: 1024,
                mode: String::from("timing"),
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let mut config = Config::default();
        config.recording.mode = String::from("broadcast");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut config = Config::default();
        config.recording.duration_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_readiness_timeout_zero_means_unbounded() {
        let mut config = Config::default();
        config.recording.readiness_timeout_secs = 0;
        assert!(config.readiness_timeout().is_none());

        config.recording.readiness_timeout_secs = 30;
        assert_eq!(config.readiness_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_camera_config_carries_session_duration() {
        let config = Config::default();
        let recording =
            config.camera_recording_config(OutputLayout::Standalone(PathBuf::from("out")));
        assert_eq!(recording.record_length, Some(10));
        assert_eq!(recording.tool, PathBuf::from("k4arecorder"));
    }

    #[test]
    fn test_audio_timing_mode_uses_session_duration() {
        let config = Config::default();
        let audio = config.audio_engine_config(PathBuf::from("out"), None);
        assert_eq!(audio.mode, StopMode::Timing(10));

        let mut manual = Config::default();
        manual.audio.mode = String::from("manual");
        let audio = manual.audio_engine_config(PathBuf::from("out"), None);
        assert_eq!(audio.mode, StopMode::Manual);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.recording.duration_secs, 10);
    }
}
