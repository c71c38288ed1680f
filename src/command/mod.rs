//! Recorder command generation
//!
//! This module maps a declarative recording configuration plus a run role
//! into concrete recorder invocations (argument vector + output file path).
//! Command generation is pure: the session timestamp is threaded in
//! explicitly, so identical inputs always produce identical commands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

/// File extension of the recorder's output container
const OUTPUT_EXTENSION: &str = "mkv";

// ============================================================================
// Run Role
// ============================================================================

/// Role a recorder process plays in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunRole {
    /// Single device, no hardware sync
    Standalone,

    /// Timing source of a synchronized fleet
    Master,

    /// Follower waiting for the master's sync signal
    Subordinate,
}

impl RunRole {
    /// Value passed to the recorder's `--external-sync` flag
    pub fn sync_arg(&self) -> Option<&'static str> {
        match self {
            Self::Standalone => None,
            Self::Master => Some("master"),
            Self::Subordinate => Some("subordinate"),
        }
    }

    /// Prefix of output files recorded under this role
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Master => "master",
            Self::Subordinate => "sub",
        }
    }

    /// Whether commands for this role carry the inter-device sync delay
    pub fn uses_sync_delay(&self) -> bool {
        matches!(self, Self::Subordinate)
    }
}

impl std::fmt::Display for RunRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_prefix())
    }
}

// ============================================================================
// Output Layout
// ============================================================================

/// Where recordings land, shaped by how the session runs
///
/// Standalone sessions write to a single directory; fleet sessions keep
/// master and subordinate recordings apart (subordinates write on their own
/// machines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// Single output directory
    Standalone(PathBuf),

    /// Per-role output directories for a synchronized fleet
    Fleet { master: PathBuf, sub: PathBuf },
}

impl OutputLayout {
    /// Resolve the output directory for a role
    ///
    /// A standalone layout serves every role from its single directory so a
    /// partially configured debug run still produces files somewhere sane.
    pub fn dir_for(&self, role: RunRole) -> &Path {
        match self {
            Self::Standalone(dir) => dir,
            Self::Fleet { master, sub } => match role {
                RunRole::Subordinate => sub,
                _ => master,
            },
        }
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self::Standalone(PathBuf::from("."))
    }
}

// ============================================================================
// Session Stamp
// ============================================================================

/// Timestamp identifying one recording session
///
/// Every command built for a session carries the same stamp; passing it
/// explicitly keeps command generation referentially transparent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStamp(String);

impl SessionStamp {
    /// Format shared by session directories and file names
    pub const FORMAT: &'static str = "%Y-%m-%d_%H-%M-%S";

    /// Stamp for a session starting now
    pub fn now() -> Self {
        Self(Local::now().format(Self::FORMAT).to_string())
    }

    /// Wrap an externally generated stamp value
    pub fn from_value(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Recording Configuration
// ============================================================================

/// Declarative description of one recorder run
///
/// Constructed once per session from merged configuration and consumed
/// read-only by [`build_commands`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Path to the external recorder binary
    pub tool: PathBuf,

    /// Primary device index, used when no IP mapping applies
    pub device: Option<u32>,

    /// Recording length in seconds (`-l`)
    pub record_length: Option<u32>,

    /// Color camera mode (`-c`), e.g. "720p"
    pub color_mode: Option<String>,

    /// Depth camera mode (`-d`), e.g. "NFOV_UNBINNED"
    pub depth_mode: Option<String>,

    /// Color/depth frame offset in microseconds (`--depth-delay`)
    pub depth_delay_us: Option<i64>,

    /// Camera frame rate (`-r`)
    pub frame_rate: Option<u32>,

    /// Inertial measurement unit toggle (`--imu`), "ON"/"OFF"
    pub imu: Option<String>,

    /// Master-to-subordinate sync delay in microseconds (`--sync-delay`)
    pub sync_delay_us: Option<u32>,

    /// Manual exposure value (`-e`)
    pub exposure: Option<i32>,

    /// IP address to device-index fan-out for fleet sessions
    #[serde(default)]
    pub ip_devices: HashMap<String, Vec<u32>>,

    /// Output location descriptor
    #[serde(default)]
    pub output: OutputLayout,
}

impl RecordingConfig {
    /// Device indices a given worker IP is responsible for
    ///
    /// Falls back to the primary device index when the IP is absent from the
    /// mapping (or none is given); an empty result means no command can be
    /// built.
    pub fn devices_for(&self, ip: Option<&str>) -> Vec<u32> {
        if let Some(ip) = ip {
            if let Some(indices) = self.ip_devices.get(ip) {
                if !indices.is_empty() {
                    return indices.clone();
                }
            }
        }
        self.device.map(|d| vec![d]).unwrap_or_default()
    }
}

// ============================================================================
// Device Command
// ============================================================================

/// One ready-to-execute recorder invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommand {
    /// Recorder binary
    pub program: PathBuf,

    /// Flags, without the program or the trailing output path
    pub args: Vec<String>,

    /// Resolved output file path (also the final argument)
    pub output_path: PathBuf,
}

impl DeviceCommand {
    /// Full argument vector: program, flags, output path
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.display().to_string());
        argv.extend(self.args.iter().cloned());
        argv.push(self.output_path.display().to_string());
        argv
    }

    /// Space-joined command line, for logs and status reports
    pub fn command_line(&self) -> String {
        self.argv().join(" ")
    }
}

// ============================================================================
// Command Builder
// ============================================================================

/// Build one recorder command per resolved device index
///
/// Role-dependent flag filtering:
/// - `Standalone` omits `--external-sync` and `--sync-delay` entirely;
/// - `Master` emits `--external-sync master` but omits `--sync-delay`
///   (meaningless for the timing source);
/// - `Subordinate` emits `--external-sync subordinate` and `--sync-delay`.
///
/// Never fails; returns an empty vector only when device resolution yields
/// nothing.
pub fn build_commands(
    config: &RecordingConfig,
    role: RunRole,
    stamp: &SessionStamp,
    ip: Option<&str>,
) -> Vec<DeviceCommand> {
    let devices = config.devices_for(ip);
    let output_dir = config.output.dir_for(role);

    devices
        .into_iter()
        .map(|device| {
            let mut args = vec!["--device".to_string(), device.to_string()];

            if let Some(sync) = role.sync_arg() {
                args.push("--external-sync".to_string());
                args.push(sync.to_string());
            }

            if let Some(length) = config.record_length {
                args.push("-l".to_string());
                args.push(length.to_string());
            }
            if let Some(color) = &config.color_mode {
                args.push("-c".to_string());
                args.push(color.clone());
            }
            if let Some(depth) = &config.depth_mode {
                args.push("-d".to_string());
                args.push(depth.clone());
            }
            if let Some(delay) = config.depth_delay_us {
                args.push("--depth-delay".to_string());
                args.push(delay.to_string());
            }
            if let Some(rate) = config.frame_rate {
                args.push("-r".to_string());
                args.push(rate.to_string());
            }
            if let Some(imu) = &config.imu {
                args.push("--imu".to_string());
                args.push(imu.clone());
            }
            if role.uses_sync_delay() {
                if let Some(delay) = config.sync_delay_us {
                    args.push("--sync-delay".to_string());
                    args.push(delay.to_string());
                }
            }
            if let Some(exposure) = config.exposure {
                args.push("-e".to_string());
                args.push(exposure.to_string());
            }

            let output_path = output_dir.join(format!(
                "{}-{}-device{}.{}",
                role.file_prefix(),
                stamp,
                device,
                OUTPUT_EXTENSION
            ));

            DeviceCommand {
                program: config.tool.clone(),
                args,
                output_path,
            }
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RecordingConfig {
        RecordingConfig {
            tool: PathBuf::from("k4arecorder"),
            device: Some(0),
            record_length: Some(5),
            color_mode: Some("720p".to_string()),
            depth_mode: Some("NFOV_UNBINNED".to_string()),
            depth_delay_us: None,
            frame_rate: Some(15),
            imu: Some("OFF".to_string()),
            sync_delay_us: Some(200),
            exposure: Some(-8),
            ip_devices: HashMap::from([("127.0.0.1".to_string(), vec![1, 2, 3])]),
            output: OutputLayout::Fleet {
                master: PathBuf::from("out/master"),
                sub: PathBuf::from("out/sub"),
            },
        }
    }

    fn stamp() -> SessionStamp {
        SessionStamp::from_value("2025-01-15_10-00-00")
    }

    #[test]
    fn test_build_is_deterministic() {
        let config = test_config();
        let first = build_commands(&config, RunRole::Subordinate, &stamp(), Some("127.0.0.1"));
        let second = build_commands(&config, RunRole::Subordinate, &stamp(), Some("127.0.0.1"));
        assert_eq!(first, second);
    }

    #[test]
    fn test_standalone_filters_sync_flags() {
        let config = test_config();
        let commands = build_commands(&config, RunRole::Standalone, &stamp(), None);
        assert_eq!(commands.len(), 1);

        let argv = commands[0].argv();
        assert!(!argv.contains(&"--external-sync".to_string()));
        assert!(!argv.contains(&"--sync-delay".to_string()));
    }

    #[test]
    fn test_master_omits_sync_delay() {
        let config = test_config();
        let commands = build_commands(&config, RunRole::Master, &stamp(), None);
        let argv = commands[0].argv();

        assert!(!argv.contains(&"--sync-delay".to_string()));
        let sync_pos = argv.iter().position(|a| a == "--external-sync").unwrap();
        assert_eq!(argv[sync_pos + 1], "master");
    }

    #[test]
    fn test_subordinate_carries_all_flags() {
        let config = test_config();
        let commands =
            build_commands(&config, RunRole::Subordinate, &stamp(), Some("127.0.0.1"));
        let argv = commands[0].argv();

        let sync_pos = argv.iter().position(|a| a == "--external-sync").unwrap();
        assert_eq!(argv[sync_pos + 1], "subordinate");
        let delay_pos = argv.iter().position(|a| a == "--sync-delay").unwrap();
        assert_eq!(argv[delay_pos + 1], "200");
    }

    #[test]
    fn test_multi_device_fan_out() {
        let config = test_config();
        let commands =
            build_commands(&config, RunRole::Subordinate, &stamp(), Some("127.0.0.1"));
        assert_eq!(commands.len(), 3);

        let mut devices: Vec<String> = Vec::new();
        let mut paths: Vec<PathBuf> = Vec::new();
        for cmd in &commands {
            let argv = cmd.argv();
            let pos = argv.iter().position(|a| a == "--device").unwrap();
            devices.push(argv[pos + 1].clone());
            paths.push(cmd.output_path.clone());
        }
        devices.dedup();
        paths.dedup();
        assert_eq!(devices.len(), 3);
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_unknown_ip_falls_back_to_primary_device() {
        let config = test_config();
        let commands =
            build_commands(&config, RunRole::Subordinate, &stamp(), Some("10.0.0.99"));
        assert_eq!(commands.len(), 1);
        let argv = commands[0].argv();
        let pos = argv.iter().position(|a| a == "--device").unwrap();
        assert_eq!(argv[pos + 1], "0");
    }

    #[test]
    fn test_no_devices_yields_empty() {
        let mut config = test_config();
        config.device = None;
        config.ip_devices.clear();
        let commands = build_commands(&config, RunRole::Standalone, &stamp(), None);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_output_path_shape() {
        let config = test_config();
        let commands = build_commands(&config, RunRole::Master, &stamp(), None);
        assert_eq!(
            commands[0].output_path,
            PathBuf::from("out/master/master-2025-01-15_10-00-00-device0.mkv")
        );

        let standalone = build_commands(&config, RunRole::Standalone, &stamp(), None);
        assert!(standalone[0]
            .output_path
            .to_string_lossy()
            .contains("standalone-"));
    }

    #[test]
    fn test_argv_ends_with_output_path() {
        let config = test_config();
        let commands = build_commands(&config, RunRole::Standalone, &stamp(), None);
        let argv = commands[0].argv();
        assert_eq!(argv[0], "k4arecorder");
        assert_eq!(
            argv.last().unwrap(),
            &commands[0].output_path.display().to_string()
        );
    }
}
