//! Streaming sample-rate conversion for device audio.
//!
//! Wraps rubato's `SincFixedIn<f32>` with a residual input buffer so callers can
//! push arbitrarily sized device buffers.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use super::base::{AudioError, AudioResult};

/// Mono sinc resampler between two fixed rates.
pub struct AudioResampler {
    inner: SincFixedIn<f32>,
    input_buffer: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl AudioResampler {
    /// Create a resampler from `from_rate` Hz to `to_rate` Hz, fed in ~10ms chunks.
    pub fn new(from_rate: u32, to_rate: u32) -> AudioResult<Self> {
        if from_rate == 0 || to_rate == 0 {
            return Err(AudioError::Resample(format!(
                "invalid rates {from_rate} Hz -> {to_rate} Hz"
            )));
        }

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let chunk_size = (from_rate as usize / 100).max(1);
        let ratio = to_rate as f64 / from_rate as f64;
        let inner = SincFixedIn::new(ratio, 2.0, params, chunk_size, 1)
            .map_err(|e| AudioError::Resample(e.to_string()))?;

        Ok(Self {
            inner,
            input_buffer: Vec::with_capacity(chunk_size),
            from_rate,
            to_rate,
        })
    }

    pub fn needs_resampling(from_rate: u32, to_rate: u32) -> bool {
        from_rate != to_rate && from_rate > 0 && to_rate > 0
    }

    /// Input samples consumed per processing step.
    pub fn chunk_size(&self) -> usize {
        self.inner.input_frames_next()
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// Resample `samples`, appending the output to `out`.
    ///
    /// Input that does not fill a whole chunk is kept for the next call.
    pub fn process_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        self.input_buffer.extend_from_slice(samples);

        let input_frames = self.inner.input_frames_next();
        while self.input_buffer.len() >= input_frames {
            let chunk: Vec<f32> = self.input_buffer.drain(..input_frames).collect();
            match self.inner.process(&[&chunk], None) {
                Ok(result) => {
                    if let Some(channel) = result.first() {
                        out.extend_from_slice(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!("AudioResampler: resample error: {e}");
                    break;
                }
            }
        }
    }

    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        self.process_into(samples, &mut out);
        out
    }

    /// Push out the residual input, padded with silence to a whole chunk, then
    /// reset the filter state.
    pub fn flush_into(&mut self, out: &mut Vec<f32>) {
        if !self.input_buffer.is_empty() {
            let padding = self.chunk_size().saturating_sub(self.input_buffer.len());
            let silence = vec![0.0; padding];
            self.process_into(&silence, out);
        }
        self.reset();
    }

    /// Drop buffered input and filter history.
    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.inner.reset();
    }
}

impl std::fmt::Debug for AudioResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioResampler")
            .field("from_rate", &self.from_rate)
            .field("to_rate", &self.to_rate)
            .field("buffered", &self.input_buffer.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_resampling() {
        assert!(AudioResampler::needs_resampling(48_000, 24_000));
        assert!(AudioResampler::needs_resampling(16_000, 24_000));
        assert!(!AudioResampler::needs_resampling(24_000, 24_000));
        assert!(!AudioResampler::needs_resampling(0, 24_000));
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(
            AudioResampler::new(0, 24_000),
            Err(AudioError::Resample(_))
        ));
    }

    #[test]
    fn test_downsample_48k_incremental() {
        let mut resampler = AudioResampler::new(48_000, 24_000).unwrap();
        assert_eq!(resampler.chunk_size(), 480);

        let mut total = 0;
        // 20ms device buffers, one second in total.
        for _ in 0..50 {
            total += resampler.process(&[0.0; 960]).len();
        }
        assert!(
            total > 21_600 && total < 26_400,
            "expected ~24000 samples, got {total}"
        );
    }

    #[test]
    fn test_residual_is_kept_until_chunk_fills() {
        let mut resampler = AudioResampler::new(16_000, 24_000).unwrap();
        assert!(resampler.process(&[0.1; 100]).is_empty());
        // 160 samples make one 10ms chunk, which yields ~240 output samples.
        let out = resampler.process(&[0.1; 60]);
        assert!(out.len() > 200 && out.len() < 280, "got {}", out.len());
    }

    #[test]
    fn test_flush_pads_partial_chunk() {
        let mut resampler = AudioResampler::new(48_000, 24_000).unwrap();
        let mut out = Vec::new();
        resampler.process_into(&[0.2; 100], &mut out);
        assert!(out.is_empty());

        resampler.flush_into(&mut out);
        assert!(!out.is_empty());
        // Nothing is left behind after a flush.
        let mut again = Vec::new();
        resampler.flush_into(&mut again);
        assert!(again.is_empty());
    }
}
