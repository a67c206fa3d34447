//! Base traits and types for the audio capture and playback pipelines.
//!
//! The pipelines never talk to hardware directly. They drive an [`AudioBackend`],
//! which hands out input and output devices. The `cpal` backend (feature
//! `cpal-audio`) talks to real hardware; the in-memory backend is used for
//! headless sessions and tests.
//!
//! # Audio Format
//!
//! Everything exchanged with the protocol layer is mono PCM 16-bit at 24kHz.

use std::fmt;

use thiserror::Error;

/// Sample rate shared by capture, playback and the realtime protocol.
pub const SAMPLE_RATE: u32 = 24_000;

/// Default number of samples per captured frame (~341ms at 24kHz).
pub const DEFAULT_FRAME_SAMPLES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Errors raised by audio devices and pipelines.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No usable device, or the device refused to open
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The pipeline was used before `begin()` / `connect()`
    #[error("Audio pipeline not started: {0}")]
    NotStarted(&'static str),

    /// The device stream failed after it was opened
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Sample-rate conversion could not be set up
    #[error("Audio resampler error: {0}")]
    Resample(String),
}

/// Result type for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

// =============================================================================
// Frames and tracks
// =============================================================================

/// A buffer of mono PCM16 samples at [`SAMPLE_RATE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the frame in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        samples_to_ms(self.samples.len())
    }

    /// Little-endian byte encoding, as sent on the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm16_to_le_bytes(&self.samples)
    }
}

/// Position reached in a playback track when it was interrupted.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOffset {
    /// Track (conversation item) that was playing
    pub track_id: String,
    /// Number of samples of the track that were played
    pub offset: usize,
    /// Same position in seconds
    pub current_time: f64,
}

impl TrackOffset {
    /// The played position in whole milliseconds (floored).
    pub fn audio_end_ms(&self) -> u32 {
        samples_to_ms(self.offset) as u32
    }
}

/// Spectrum presets exposed to renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrequencyKind {
    /// Linear FFT bins across the whole band
    #[default]
    Frequency,
    /// One bin per semitone across the musical range
    Music,
    /// Semitone bins limited to the speaking range
    Voice,
}

impl FrequencyKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "frequency" => Some(Self::Frequency),
            "music" => Some(Self::Music),
            "voice" => Some(Self::Voice),
            _ => None,
        }
    }
}

impl fmt::Display for FrequencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrequencyKind::Frequency => write!(f, "frequency"),
            FrequencyKind::Music => write!(f, "music"),
            FrequencyKind::Voice => write!(f, "voice"),
        }
    }
}

/// Spectrum snapshot: normalized magnitudes (0.0 to 1.0) and their center frequencies.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frequencies {
    pub values: Vec<f32>,
    pub labels: Vec<f32>,
}

// =============================================================================
// Devices
// =============================================================================

/// Native format of a device stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// Receives interleaved f32 samples from an input device.
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Fills an interleaved f32 buffer for an output device.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// A microphone-like device.
pub trait AudioInputDevice: Send {
    fn config(&self) -> DeviceConfig;

    /// Start the device stream; `callback` runs on the device thread.
    fn start(&mut self, callback: InputCallback) -> AudioResult<()>;

    /// Stop the stream and release the device.
    fn stop(&mut self);
}

/// A speaker-like device.
pub trait AudioOutputDevice: Send {
    fn config(&self) -> DeviceConfig;

    /// Start the device stream; `callback` is asked for every output buffer.
    fn start(&mut self, callback: OutputCallback) -> AudioResult<()>;

    /// Stop the stream and release the device.
    fn stop(&mut self);
}

/// Source of audio devices.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self) -> AudioResult<Box<dyn AudioInputDevice>>;

    fn open_output(&self) -> AudioResult<Box<dyn AudioOutputDevice>>;

    fn name(&self) -> &'static str;
}

// =============================================================================
// Sample helpers
// =============================================================================

pub fn samples_to_ms(samples: usize) -> u64 {
    (samples as u64 * 1000) / SAMPLE_RATE as u64
}

pub fn ms_to_samples(ms: u64) -> usize {
    (ms * SAMPLE_RATE as u64 / 1000) as usize
}

pub fn pcm16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Decode little-endian PCM16. A trailing odd byte is ignored.
pub fn le_bytes_to_pcm16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * 32768.0) as i16
    } else {
        (clamped * 32767.0) as i16
    }
}

#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}
