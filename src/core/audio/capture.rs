//! Microphone capture into fixed-size mono PCM16 frames.
//!
//! The device callback runs on the device thread. It down-mixes, resamples to
//! [`SAMPLE_RATE`] and slices the stream into frames of `frame_samples`, which are
//! sent to the current sink tagged with the recording epoch. `pause()` detaches the
//! sink under the same lock the callback uses, so once it returns nothing more is
//! sent for that epoch.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::base::{
    AudioBackend, AudioError, AudioFrame, AudioInputDevice, AudioResult, DeviceConfig,
    SAMPLE_RATE, f32_to_i16,
};
use super::resampler::AudioResampler;

/// A frame delivered by [`AudioCapture`], tagged with the epoch of the `record()` call
/// that produced it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub epoch: u64,
    pub frame: AudioFrame,
}

pub type FrameSink = mpsc::UnboundedSender<CapturedFrame>;

/// Average interleaved channels into one.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = channels as usize;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

struct CaptureShared {
    sink: Option<FrameSink>,
    epoch: u64,
    pending: Vec<i16>,
    frame_samples: usize,
    channels: u16,
    /// Present when the device rate differs from [`SAMPLE_RATE`]
    resampler: Option<AudioResampler>,
    scratch: Vec<f32>,
}

impl CaptureShared {
    fn ingest(&mut self, data: &[f32]) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let mono = downmix(data, self.channels);
        match self.resampler.as_mut() {
            Some(resampler) => {
                self.scratch.clear();
                resampler.process_into(&mono, &mut self.scratch);
                self.pending
                    .extend(self.scratch.iter().map(|s| f32_to_i16(*s)));
            }
            None => self.pending.extend(mono.iter().map(|s| f32_to_i16(*s))),
        }

        while self.pending.len() >= self.frame_samples {
            let samples: Vec<i16> = self.pending.drain(..self.frame_samples).collect();
            // A closed receiver just means nobody is listening any more.
            let _ = sink.send(CapturedFrame {
                epoch: self.epoch,
                frame: AudioFrame::new(samples),
            });
        }
    }

    fn flush(&mut self) {
        if self.sink.is_some()
            && let Some(resampler) = self.resampler.as_mut()
        {
            self.scratch.clear();
            resampler.flush_into(&mut self.scratch);
            self.pending
                .extend(self.scratch.iter().map(|s| f32_to_i16(*s)));
        }
        if let Some(sink) = self.sink.take()
            && !self.pending.is_empty()
        {
            let samples = std::mem::take(&mut self.pending);
            let _ = sink.send(CapturedFrame {
                epoch: self.epoch,
                frame: AudioFrame::new(samples),
            });
        }
        self.pending.clear();
    }
}

/// Microphone capture pipeline.
pub struct AudioCapture {
    backend: Arc<dyn AudioBackend>,
    frame_samples: usize,
    device: Option<Box<dyn AudioInputDevice>>,
    shared: Arc<Mutex<CaptureShared>>,
}

impl AudioCapture {
    pub fn new(backend: Arc<dyn AudioBackend>, frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            backend,
            frame_samples,
            device: None,
            shared: Arc::new(Mutex::new(CaptureShared {
                sink: None,
                epoch: 0,
                pending: Vec::with_capacity(frame_samples),
                frame_samples,
                channels: 1,
                resampler: None,
                scratch: Vec::new(),
            })),
        }
    }

    /// Acquire the input device. Calling it again while begun is a no-op.
    pub fn begin(&mut self) -> AudioResult<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let mut device = self.backend.open_input()?;
        let DeviceConfig {
            sample_rate,
            channels,
        } = device.config();
        let resampler = if AudioResampler::needs_resampling(sample_rate, SAMPLE_RATE) {
            Some(AudioResampler::new(sample_rate, SAMPLE_RATE)?)
        } else {
            None
        };
        {
            let mut shared = self.shared.lock();
            shared.sink = None;
            shared.pending.clear();
            shared.channels = channels;
            shared.resampler = resampler;
        }

        let shared = self.shared.clone();
        device.start(Box::new(move |data: &[f32]| shared.lock().ingest(data)))?;

        info!(
            backend = self.backend.name(),
            sample_rate, channels, "Audio capture device acquired"
        );
        self.device = Some(device);
        Ok(())
    }

    /// Start delivering frames to `sink`. Returns the new capture epoch.
    pub fn record(&mut self, sink: FrameSink) -> AudioResult<u64> {
        if self.device.is_none() {
            return Err(AudioError::NotStarted("record() called before begin()"));
        }

        let mut shared = self.shared.lock();
        shared.epoch += 1;
        shared.pending.clear();
        if let Some(resampler) = shared.resampler.as_mut() {
            resampler.reset();
        }
        shared.sink = Some(sink);
        debug!(epoch = shared.epoch, "Audio capture recording");
        Ok(shared.epoch)
    }

    /// Stop delivery and flush the partial frame. The device stays open.
    pub fn pause(&mut self) {
        let mut shared = self.shared.lock();
        if shared.sink.is_some() {
            debug!(epoch = shared.epoch, "Audio capture paused");
        }
        shared.flush();
    }

    /// Stop delivery and release the device.
    pub fn end(&mut self) {
        self.pause();
        if let Some(mut device) = self.device.take() {
            device.stop();
            info!("Audio capture device released");
        }
    }

    pub fn is_begun(&self) -> bool {
        self.device.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.shared.lock().sink.is_some()
    }

    /// Epoch of the most recent `record()` call.
    pub fn epoch(&self) -> u64 {
        self.shared.lock().epoch
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::memory::MemoryAudioBackend;

    fn drain(rx: &mut mpsc::UnboundedReceiver<CapturedFrame>) -> Vec<CapturedFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_downmix_stereo() {
        assert_eq!(downmix(&[1.0, 0.0, 0.5, 0.5], 2), vec![0.5, 0.5]);
        assert_eq!(downmix(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_begin_is_idempotent() {
        let backend = Arc::new(MemoryAudioBackend::new());
        let mut capture = AudioCapture::new(backend.clone(), 4);

        capture.begin().unwrap();
        capture.begin().unwrap();
        assert_eq!(backend.inputs_opened(), 1);
        assert!(capture.is_begun());
    }

    #[test]
    fn test_record_requires_begin() {
        let backend = Arc::new(MemoryAudioBackend::new());
        let mut capture = AudioCapture::new(backend, 4);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(capture.record(tx), Err(AudioError::NotStarted(_))));
    }

    #[test]
    fn test_full_frames_then_flush_on_pause() {
        let backend = Arc::new(MemoryAudioBackend::new());
        let input = backend.input_handle();
        let mut capture = AudioCapture::new(backend, 4);
        capture.begin().unwrap();

        // Not recording yet: samples are discarded.
        input.push(&[0.5; 8]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let epoch = capture.record(tx).unwrap();
        input.push(&[0.5; 10]);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.frame.len() == 4 && f.epoch == epoch));

        capture.pause();
        let flushed = drain(&mut rx);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].frame.len(), 2);

        // Device kept open, but nothing is delivered while paused.
        assert!(capture.is_begun());
        assert!(!capture.is_recording());
        input.push(&[0.5; 16]);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_record_again_bumps_epoch_without_reacquiring() {
        let backend = Arc::new(MemoryAudioBackend::new());
        let input = backend.input_handle();
        let mut capture = AudioCapture::new(backend.clone(), 2);
        capture.begin().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let first = capture.record(tx.clone()).unwrap();
        capture.pause();
        let second = capture.record(tx).unwrap();
        assert!(second > first);

        input.push(&[0.1; 2]);
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].epoch, second);
        assert_eq!(backend.inputs_opened(), 1);
    }

    #[test]
    fn test_end_releases_device() {
        let backend = Arc::new(MemoryAudioBackend::new());
        let input = backend.input_handle();
        let mut capture = AudioCapture::new(backend, 2);
        capture.begin().unwrap();
        assert!(input.is_active());

        capture.end();
        assert!(!capture.is_begun());
        assert!(!input.is_active());
    }

    #[test]
    fn test_stereo_48k_device_is_resampled_to_frames() {
        let backend = Arc::new(MemoryAudioBackend::with_configs(
            DeviceConfig {
                sample_rate: 48_000,
                channels: 2,
            },
            DeviceConfig::default(),
        ));
        let input = backend.input_handle();
        let mut capture = AudioCapture::new(backend, 480);
        capture.begin().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let epoch = capture.record(tx).unwrap();
        // One second of interleaved stereo in 20ms device buffers.
        for _ in 0..50 {
            input.push(&[0.25; 1920]);
        }

        let frames = drain(&mut rx);
        let total: usize = frames.iter().map(|f| f.frame.len()).sum();
        assert!(
            total > 21_600 && total <= 24_000,
            "expected ~24000 samples, got {total}"
        );
        assert!(frames.iter().all(|f| f.frame.len() == 480 && f.epoch == epoch));

        // Past the filter delay the level of the input is preserved.
        let last = &frames.last().unwrap().frame.samples;
        let target = f32_to_i16(0.25) as i32;
        assert!(last.iter().all(|s| (*s as i32 - target).abs() < 800));

        // Pausing pushes out the resampler residual with the partial frame.
        input.push(&[0.25; 200]);
        capture.pause();
        let flushed = drain(&mut rx);
        assert_eq!(flushed.len(), 1);
        assert!(!flushed[0].frame.is_empty());
    }

    #[test]
    fn test_begin_failure_surfaces() {
        let backend = Arc::new(MemoryAudioBackend::new());
        backend.fail_input(true);
        let mut capture = AudioCapture::new(backend, 2);
        assert!(matches!(
            capture.begin(),
            Err(AudioError::DeviceUnavailable(_))
        ));
        assert!(!capture.is_begun());
    }
}
