//! Track-addressed audio playback.
//!
//! Chunks are queued per track id and pulled by the output device under a single
//! lock. `interrupt()` takes the same lock, so once it returns the device cannot
//! emit another sample of the interrupted track. Chunks that arrive later for an
//! interrupted track are dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::base::{
    AudioBackend, AudioError, AudioOutputDevice, AudioResult, DeviceConfig, Frequencies,
    FrequencyKind, SAMPLE_RATE, TrackOffset, i16_to_f32,
};
use super::resampler::AudioResampler;
use super::spectrum::{FFT_SIZE, SpectrumAnalyzer};

struct Chunk {
    track_id: Arc<str>,
    samples: Vec<i16>,
    position: usize,
}

struct PlaybackShared {
    queue: VecDeque<Chunk>,
    /// Samples emitted so far per track
    offsets: HashMap<Arc<str>, usize>,
    interrupted: HashSet<Arc<str>>,
    /// Ring of the most recently emitted samples, for the analyser
    recent: VecDeque<f32>,
    channels: usize,
    /// Present when the device rate differs from [`SAMPLE_RATE`]
    resampler: Option<AudioResampler>,
    /// Device-rate samples waiting for the next callback
    rendered: VecDeque<f32>,
    scratch: Vec<f32>,
}

impl PlaybackShared {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            offsets: HashMap::new(),
            interrupted: HashSet::new(),
            recent: VecDeque::with_capacity(FFT_SIZE),
            channels: 1,
            resampler: None,
            rendered: VecDeque::new(),
            scratch: Vec::new(),
        }
    }

    fn next_sample(&mut self) -> f32 {
        let sample = loop {
            let Some(chunk) = self.queue.front_mut() else {
                break 0.0;
            };
            if chunk.position < chunk.samples.len() {
                let sample = i16_to_f32(chunk.samples[chunk.position]);
                chunk.position += 1;
                *self.offsets.entry(chunk.track_id.clone()).or_insert(0) += 1;
                break sample;
            }
            self.queue.pop_front();
        };
        if self.recent.len() == FFT_SIZE {
            self.recent.pop_front();
        }
        self.recent.push_back(sample);
        sample
    }

    /// Resample the next chunk of queued audio into `rendered`.
    fn refill(&mut self) {
        let chunk_size = match self.resampler.as_ref() {
            Some(resampler) => resampler.chunk_size(),
            None => return,
        };
        if !self.has_pending() {
            return;
        }

        // The tail of a track is padded with silence to a whole chunk.
        let input: Vec<f32> = (0..chunk_size).map(|_| self.next_sample()).collect();
        self.scratch.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.process_into(&input, &mut self.scratch);
        }
        self.rendered.extend(self.scratch.drain(..));
    }

    fn next_output(&mut self) -> f32 {
        if self.resampler.is_none() {
            return self.next_sample();
        }
        if self.rendered.is_empty() {
            self.refill();
        }
        self.rendered.pop_front().unwrap_or(0.0)
    }

    fn render(&mut self, buffer: &mut [f32]) {
        let channels = self.channels.max(1);
        for frame in buffer.chunks_mut(channels) {
            let sample = self.next_output();
            frame.fill(sample);
        }
    }

    fn has_pending(&self) -> bool {
        self.queue.iter().any(|c| c.position < c.samples.len())
    }

    /// Drop everything already converted so no queued audio reaches the device.
    fn silence(&mut self) {
        self.queue.clear();
        self.rendered.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    fn reset(&mut self) {
        self.silence();
        self.offsets.clear();
        self.interrupted.clear();
        self.recent.clear();
    }
}

/// Speaker playback pipeline.
pub struct AudioPlayback {
    backend: Arc<dyn AudioBackend>,
    device: Option<Box<dyn AudioOutputDevice>>,
    shared: Arc<Mutex<PlaybackShared>>,
    analyzer: SpectrumAnalyzer,
}

impl AudioPlayback {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            device: None,
            shared: Arc::new(Mutex::new(PlaybackShared::new())),
            analyzer: SpectrumAnalyzer::new(),
        }
    }

    /// Acquire the output device. No-op when already connected.
    pub fn connect(&mut self) -> AudioResult<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let mut device = self.backend.open_output()?;
        let DeviceConfig {
            sample_rate,
            channels,
        } = device.config();
        let resampler = if AudioResampler::needs_resampling(SAMPLE_RATE, sample_rate) {
            Some(AudioResampler::new(SAMPLE_RATE, sample_rate)?)
        } else {
            None
        };
        {
            let mut shared = self.shared.lock();
            shared.resampler = resampler;
            shared.reset();
            shared.channels = channels as usize;
        }

        let shared = self.shared.clone();
        device.start(Box::new(move |buffer: &mut [f32]| {
            shared.lock().render(buffer)
        }))?;

        info!(
            backend = self.backend.name(),
            sample_rate, channels, "Audio playback device acquired"
        );
        self.device = Some(device);
        Ok(())
    }

    /// Queue PCM16 samples for `track_id`.
    pub fn add_16bit_pcm(&self, samples: &[i16], track_id: &str) -> AudioResult<()> {
        if self.device.is_none() {
            return Err(AudioError::NotStarted("add_16bit_pcm() called before connect()"));
        }
        if samples.is_empty() {
            return Ok(());
        }

        let mut shared = self.shared.lock();
        if shared.interrupted.contains(track_id) {
            debug!(track_id, "Dropping audio for interrupted track");
            return Ok(());
        }
        shared.queue.push_back(Chunk {
            track_id: Arc::from(track_id),
            samples: samples.to_vec(),
            position: 0,
        });
        Ok(())
    }

    /// Stop playback immediately.
    ///
    /// Returns the position reached in the track that was playing, or `None` when
    /// nothing was queued.
    pub fn interrupt(&self) -> Option<TrackOffset> {
        let mut shared = self.shared.lock();
        if !shared.has_pending() {
            shared.silence();
            return None;
        }

        let track_id = shared
            .queue
            .iter()
            .find(|c| c.position < c.samples.len())
            .map(|c| c.track_id.clone())?;
        let offset = shared.offsets.get(&track_id).copied().unwrap_or(0);
        shared.silence();
        shared.interrupted.insert(track_id.clone());

        debug!(track_id = %track_id, offset, "Playback interrupted");
        Some(TrackOffset {
            track_id: track_id.to_string(),
            offset,
            current_time: offset as f64 / SAMPLE_RATE as f64,
        })
    }

    pub fn is_playing(&self) -> bool {
        self.shared.lock().has_pending()
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    /// Samples of `track_id` emitted so far.
    pub fn track_offset(&self, track_id: &str) -> usize {
        self.shared.lock().offsets.get(track_id).copied().unwrap_or(0)
    }

    /// Spectrum of the most recently emitted audio.
    pub fn frequencies(&self, kind: FrequencyKind) -> Frequencies {
        let recent: Vec<f32> = self.shared.lock().recent.iter().copied().collect();
        self.analyzer.analyze(&recent, kind)
    }

    /// Flush the queue and release the device.
    pub fn disconnect(&mut self) {
        self.shared.lock().reset();
        if let Some(mut device) = self.device.take() {
            device.stop();
            info!("Audio playback device released");
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
    }
}
