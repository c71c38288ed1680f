//! WAV persistence for captured audio
//!
//! Buffered samples always land in a `.wav` container regardless of the
//! extension a filename template asks for; when several devices share one
//! template, each file gets a device-qualified suffix to avoid collisions.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Qualify a filename template for one device
///
/// With multiple devices, `take.wav` becomes `take_d3.wav` for device 3;
/// a single device keeps the template untouched.
pub fn qualified_filename(template: &str, device_index: usize, multi_device: bool) -> String {
    if !multi_device {
        return template.to_string();
    }
    match template.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}_d{device_index}.{ext}"),
        None => format!("{template}_d{device_index}"),
    }
}

/// Force a `.wav` extension onto a filename
pub fn coerce_wav_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !ext.eq_ignore_ascii_case("wav") => format!("{stem}.wav"),
        Some(_) => filename.to_string(),
        None => format!("{filename}.wav"),
    }
}

/// Write interleaved float samples to a WAV file
pub fn write_wav(
    path: &Path,
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

// ============================================================================
// Tests
// ============================================================================
