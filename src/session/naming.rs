//! Session directory and file naming
//!
//! One session is identified by a single timestamp; everything it produces
//! lands under `<base>/<mode>/<stamp>/`, and a manifest written at
//! finalization records what the session captured.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::command::SessionStamp;

/// Name of the per-session manifest file
pub const MANIFEST_FILE: &str = "manifest.json";

/// Create the directory one session records into
pub fn create_session_dir(
    base: &Path,
    mode: &str,
    stamp: &SessionStamp,
) -> std::io::Result<PathBuf> {
    let dir = base.join(mode).join(stamp.as_str());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Audio filename template for a session
pub fn audio_filename(stamp: &SessionStamp) -> String {
    format!("{stamp}-audio.wav")
}

/// Record of what one session produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Recording mode the session ran in
    pub mode: String,

    /// Session timestamp
    pub stamp: String,

    /// Devices that participated across all modalities
    pub device_count: usize,

    /// Configured session duration in seconds
    pub duration_secs: u64,

    /// Files produced on this machine
    pub files: Vec<PathBuf>,
}

/// Write the session manifest into the session directory
pub fn write_manifest(session_dir: &Path, manifest: &Manifest) -> std::io::Result<PathBuf> {
    let path = session_dir.join(MANIFEST_FILE);
    let content = serde_json::to_string_pretty(manifest)?;
    std::fs::write(&path, content)?;
    Ok(path)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_dir_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let stamp = SessionStamp::from_value("2025-01-15_10-00-00");

        let dir = create_session_dir(tmp.path(), "sync", &stamp).unwrap();
        assert!(dir.is_dir());
        assert!(dir.ends_with("sync/2025-01-15_10-00-00"));
    }

    #[test]
    fn test_audio_filename_carries_stamp() {
        let stamp = SessionStamp::from_value("2025-01-15_10-00-00");
        assert_eq!(audio_filename(&stamp), "2025-01-15_10-00-00-audio.wav");
    }

    #[test]
    fn test_manifest_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let manifest = Manifest {
            mode: "standalone".to_string(),
            stamp: "2025-01-15_10-00-00".to_string(),
            device_count: 2,
            duration_secs: 10,
            files: vec![PathBuf::from("standalone-2025-01-15_10-00-00-device0.mkv")],
        };

        let path = write_manifest(tmp.path(), &manifest).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let parsed: Manifest = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.device_count, 2);
        assert_eq!(parsed.files.len(), 1);
    }
}
