pub mod base;
pub mod capture;
#[cfg(feature = "cpal-audio")]
pub mod cpal_backend;
pub mod memory;
pub mod playback;
pub mod resampler;
pub mod spectrum;

pub use base::{
    AudioBackend, AudioError, AudioFrame, AudioInputDevice, AudioOutputDevice, AudioResult,
    DEFAULT_FRAME_SAMPLES, DeviceConfig, Frequencies, FrequencyKind, SAMPLE_RATE, TrackOffset,
};
pub use capture::{AudioCapture, CapturedFrame, FrameSink};
#[cfg(feature = "cpal-audio")]
pub use cpal_backend::CpalAudioBackend;
pub use memory::{MemoryAudioBackend, MemoryInputHandle, MemoryOutputHandle};
pub use playback::AudioPlayback;
pub use resampler::AudioResampler;
pub use spectrum::SpectrumAnalyzer;
