//! Barrier-synchronized multi-device audio capture
//!
//! Records every configured input device on its own OS thread. No device
//! starts accumulating samples before every capture thread (and the
//! controlling thread) has reached a shared barrier, which aligns channel
//! starts to within one scheduling quantum. Audio runs on plain threads
//! because cpal streams are not `Send`; the session layer bridges into the
//! async world with `spawn_blocking`.

pub mod writer;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use writer::{coerce_wav_extension, qualified_filename, write_wav};

/// Bound on one stop-check interval inside the capture loop
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Audio Errors
// ============================================================================

/// Audio capture errors
#[derive(Error, Debug)]
pub enum AudioError {
    /// Nothing to record
    #[error("no audio input devices configured")]
    NoDevicesConfigured,

    /// The engine allows a single concurrent recording
    #[error("a recording is already in progress")]
    AlreadyRecording,

    /// Filesystem or thread-spawn failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV encoding failed
    #[error("WAV write error: {0}")]
    Wav(#[from] hound::Error),
}

// ============================================================================
// Audio Configuration
// ============================================================================

/// How a recording run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "seconds")]
pub enum StopMode {
    /// Stop after a fixed number of seconds
    Timing(u64),

    /// Stop on an explicit trigger
    Manual,
}

/// Audio engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Input device indices (host enumeration order)
    pub input_devices: Vec<usize>,

    /// Samples per second
    pub sample_rate: u32,

    /// Channels per device
    pub channels: u16,

    /// Samples per stream buffer
    pub frames_per_buffer: u32,

    /// Stop condition
    pub mode: StopMode,

    /// Directory recordings land in
    pub out_dir: PathBuf,

    /// Filename template; device-qualified when several devices share it
    pub filename: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_devices: Vec::new(),
            sample_rate: 44_100,
            channels: 1,
            frames_per_buffer: 1024,
            mode: StopMode::Timing(5),
            out_dir: PathBuf::from("."),
            filename: None,
        }
    }
}

// ============================================================================
// Recording Summary
// ============================================================================

/// What one recording run produced
#[derive(Debug, Clone)]
pub struct RecordingSummary {
    /// One WAV file per device that delivered samples
    pub files: Vec<PathBuf>,

    /// Stop instant minus barrier-release instant
    pub actual_duration: Duration,

    /// Sample count per device, for drift diagnostics
    pub frames_per_device: HashMap<usize, usize>,
}

// ============================================================================
// Audio Recorder
// ============================================================================

/// Multi-device audio capture engine
///
/// One engine instance runs at most one recording at a time;
/// [`AudioRecorder::record_multi_devices`] blocks until files are written.
pub struct AudioRecorder {
    config: AudioConfig,
    is_recording: AtomicBool,
    stop_requested: Arc<AtomicBool>,
}

impl AudioRecorder {
    /// Create an engine for the given configuration
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            is_recording: AtomicBool::new(false),
            stop_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Trigger a manual stop; also ends a timed recording early
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a recording is currently active
    pub fn is_recording(&self) -> bool {
        self.is_recording.load(Ordering::SeqCst)
    }

    /// Record every configured device, blocking until files are written
    ///
    /// All capture threads and the calling thread meet at a barrier before a
    /// single sample is kept; the barrier-release instant is the
    /// authoritative recording start. A device whose stream fails to open
    /// still reaches the barrier so the others are never deadlocked.
    pub fn record_multi_devices(&self) -> Result<RecordingSummary, AudioError> {
        if self.config.input_devices.is_empty() {
            return Err(AudioError::NoDevicesConfigured);
        }
        if self.is_recording.swap(true, Ordering::SeqCst) {
            return Err(AudioError::AlreadyRecording);
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        let result = self.run_capture();
        self.is_recording.store(false, Ordering::SeqCst);
        result
    }

    fn run_capture(&self) -> Result<RecordingSummary, AudioError> {
        let device_count = self.config.input_devices.len();
        let barrier = Arc::new(Barrier::new(device_count + 1));
        let results: Arc<Mutex<HashMap<usize, Vec<f32>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let mut handles = Vec::with_capacity(device_count);
        for &device_index in &self.config.input_devices {
            let barrier = Arc::clone(&barrier);
            let stop = Arc::clone(&self.stop_requested);
            let results = Arc::clone(&results);
            let config = self.config.clone();

            let handle = thread::Builder::new()
                .name(format!("audio-capture-{device_index}"))
                .spawn(move || capture_device(device_index, &config, barrier, stop, results))
                .map_err(AudioError::Io)?;
            handles.push(handle);
        }

        info!(devices = device_count, "Waiting for all audio devices to arm");
        barrier.wait();
        let start = Instant::now();
        info!("All audio devices armed, recording started");

        self.wait_for_stop(start);
        self.stop_requested.store(true, Ordering::SeqCst);
        let end = Instant::now();

        for handle in handles {
            if handle.join().is_err() {
                warn!("Audio capture thread panicked");
            }
        }

        let actual_duration = end - start;
        let captured = Arc::try_unwrap(results)
            .map(|m| m.into_inner().unwrap_or_default())
            .unwrap_or_default();

        let summary = self.write_files(captured, actual_duration)?;
        info!(
            files = summary.files.len(),
            duration_secs = summary.actual_duration.as_secs_f64(),
            "Audio recording finished"
        );
        Ok(summary)
    }

    /// Block until the configured stop condition fires
    fn wait_for_stop(&self, start: Instant) {
        match self.config.mode {
            StopMode::Timing(seconds) => {
                info!(seconds = seconds, "Timed recording");
                let deadline = start + Duration::from_secs(seconds);
                while Instant::now() < deadline && !self.stop_requested.load(Ordering::SeqCst) {
                    thread::sleep(STOP_CHECK_INTERVAL);
                }
            }
            StopMode::Manual => {
                info!("Manual recording, waiting for stop trigger");
                while !self.stop_requested.load(Ordering::SeqCst) {
                    thread::sleep(STOP_CHECK_INTERVAL);
                }
            }
        }
    }

    /// Flush every device's buffered samples to one WAV file each
    fn write_files(
        &self,
        captured: HashMap<usize, Vec<f32>>,
        actual_duration: Duration,
    ) -> Result<RecordingSummary, AudioError> {
        std::fs::create_dir_all(&self.config.out_dir)?;

        let multi_device = self.config.input_devices.len() > 1;
        let mut devices: Vec<_> = captured.into_iter().collect();
        devices.sort_by_key(|(index, _)| *index);

        let mut files = Vec::new();
        let mut frames_per_device = HashMap::new();

        for (device_index, samples) in devices {
            if samples.is_empty() {
                continue;
            }

            let name = match &self.config.filename {
                Some(template) => qualified_filename(template, device_index, multi_device),
                None => format!(
                    "d{device_index}_{}.wav",
                    chrono::Local::now().format("%Y%m%d_%H%M%S")
                ),
            };
            let path = self.config.out_dir.join(coerce_wav_extension(&name));

            write_wav(&path, &samples, self.config.channels, self.config.sample_rate)?;
            info!(
                device = device_index,
                path = %path.display(),
                samples = samples.len(),
                "Device recording saved"
            );

            frames_per_device.insert(device_index, samples.len() / self.config.channels as usize);
            files.push(path);
        }

        Ok(RecordingSummary {
            files,
            actual_duration,
            frames_per_device,
        })
    }
}

// ============================================================================
// Capture Thread
// ============================================================================

/// Body of one device capture thread
///
/// Opens the input stream, meets the barrier, then accumulates sample chunks
/// until the stop flag is observed. The degraded branch (stream open
/// failure) still meets the barrier so the remaining devices proceed.
fn capture_device(
    device_index: usize,
    config: &AudioConfig,
    barrier: Arc<Barrier>,
    stop: Arc<AtomicBool>,
    results: Arc<Mutex<HashMap<usize, Vec<f32>>>>,
) {
    let (tx, rx) = mpsc::channel::<Vec<f32>>();

    let stream = match open_input_stream(device_index, config, tx) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(device = device_index, "Audio device failed to open: {e}");
            barrier.wait();
            return;
        }
    };

    barrier.wait();
    // Discard anything the callback delivered before the aligned start
    while rx.try_recv().is_ok() {}

    let mut samples: Vec<f32> = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(STOP_CHECK_INTERVAL) {
            Ok(chunk) => samples.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                // Stream died mid-recording; keep the partial buffer
                warn!(device = device_index, "Audio stream ended early");
                break;
            }
        }
    }

    drop(stream);
    info!(
        device = device_index,
        samples = samples.len(),
        "Device capture finished"
    );
    results
        .lock()
        .expect("audio results lock poisoned")
        .insert(device_index, samples);
}

/// Open and start one input stream whose callback feeds the capture channel
fn open_input_stream(
    device_index: usize,
    config: &AudioConfig,
    tx: mpsc::Sender<Vec<f32>>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .input_devices()
        .map_err(|e| format!("device enumeration failed: {e}"))?
        .nth(device_index)
        .ok_or_else(|| format!("no input device at index {device_index}"))?;

    let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Fixed(config.frames_per_buffer),
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Receiver drops when the capture loop exits; ignore that race
                let _ = tx.send(data.to_vec());
            },
            move |err| {
                warn!("Audio stream error: {err}");
            },
            None,
        )
        .map_err(|e| format!("stream build failed: {e}"))?;

    stream
        .play()
        .map_err(|e| format!("stream start failed: {e}"))?;

    info!(device = device_index, name = %device_name, "Audio input stream opened");
    Ok(stream)
}

/// List input devices of the default host, in enumeration order
pub fn list_input_devices() -> Vec<(usize, String)> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device.name().unwrap_or_else(|_| "unknown".to_string());
                (index, name)
            })
            .collect(),
        Err(e) => {
            warn!("Audio device enumeration failed: {e}");
            Vec::new()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refuses_without_devices() {
        let recorder = AudioRecorder::new(AudioConfig::default());
        let result = recorder.record_multi_devices();
        assert!(matches!(result, Err(AudioError::NoDevicesConfigured)));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_degraded_devices_do_not_deadlock() {
        // Indices far past any real device: every thread takes the degraded
        // branch, meets the barrier, and the run completes with no files.
        let tmp = tempfile::tempdir().unwrap();
        let config = AudioConfig {
            input_devices: vec![900, 901, 902],
            mode: StopMode::Timing(0),
            out_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let recorder = AudioRecorder::new(config);

        let summary = recorder.record_multi_devices().unwrap();
        assert!(summary.files.is_empty());
        assert!(summary.actual_duration < Duration::from_secs(2));
        assert!(!recorder.is_recording());
    }

    #[test]
    fn test_manual_stop_ends_recording() {
        let tmp = tempfile::tempdir().unwrap();
        let config = AudioConfig {
            input_devices: vec![900],
            mode: StopMode::Manual,
            out_dir: tmp.path().to_path_buf(),
            ..Default::default()
        };
        let recorder = Arc::new(AudioRecorder::new(config));

        let trigger = Arc::clone(&recorder);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            trigger.request_stop();
        });

        let summary = recorder.record_multi_devices().unwrap();
        stopper.join().unwrap();
        assert!(summary.actual_duration >= Duration::from_millis(200));
    }

    #[test]
    fn test_stop_mode_serde() {
        let timing: StopMode = serde_json::from_str(r#"{"mode":"timing","seconds":5}"#).unwrap();
        assert_eq!(timing, StopMode::Timing(5));

        let manual: StopMode = serde_json::from_str(r#"{"mode":"manual"}"#).unwrap();
        assert_eq!(manual, StopMode::Manual);
    }
}
