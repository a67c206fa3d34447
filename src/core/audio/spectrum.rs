//! FFT magnitude snapshots for visualizing playback.
//!
//! Magnitudes are converted to decibels and normalized from the
//! `[MIN_DECIBELS, MAX_DECIBELS]` window into `0.0..=1.0`.

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use super::base::{Frequencies, FrequencyKind, SAMPLE_RATE};

/// Window length of the analyser.
pub const FFT_SIZE: usize = 1024;

pub const MIN_DECIBELS: f32 = -100.0;
pub const MAX_DECIBELS: f32 = -30.0;

/// Lowest and highest frequencies kept for [`FrequencyKind::Voice`].
const VOICE_RANGE_HZ: (f32, f32) = (32.0, 2000.0);

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size as f32 - 1.0)).cos())
        })
        .collect()
}

/// Semitone frequencies for octaves 1 through 8 (C1 ~ 32.7Hz to B8 ~ 7902Hz).
fn note_frequencies() -> Vec<f32> {
    (12..108)
        .map(|n| 440.0 * 2f32.powf((n as f32 - 57.0) / 12.0))
        .collect()
}

/// Reusable FFT analyser with a cached plan.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    notes: Vec<f32>,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
            window: hann_window(FFT_SIZE),
            notes: note_frequencies(),
        }
    }

    /// Analyse the most recent `FFT_SIZE` samples (zero-padded at the front when shorter).
    pub fn analyze(&self, samples: &[f32], kind: FrequencyKind) -> Frequencies {
        let decibels = self.decibels(samples);
        let bin_width = SAMPLE_RATE as f32 / FFT_SIZE as f32;

        let (values, labels) = match kind {
            FrequencyKind::Frequency => {
                let labels = (0..decibels.len()).map(|i| i as f32 * bin_width).collect();
                (decibels, labels)
            }
            FrequencyKind::Music => self.note_bins(&decibels, bin_width, None),
            FrequencyKind::Voice => self.note_bins(&decibels, bin_width, Some(VOICE_RANGE_HZ)),
        };

        Frequencies {
            values: values.into_iter().map(normalize_db).collect(),
            labels,
        }
    }

    fn decibels(&self, samples: &[f32]) -> Vec<f32> {
        let tail = &samples[samples.len().saturating_sub(FFT_SIZE)..];
        let pad = FFT_SIZE - tail.len();

        let mut buffer: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let sample = if i < pad { 0.0 } else { tail[i - pad] };
                Complex::new(sample * self.window[i], 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        buffer[..FFT_SIZE / 2]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / FFT_SIZE as f32;
                20.0 * magnitude.max(1e-12).log10()
            })
            .collect()
    }

    /// Collapse FFT bins onto semitone buckets, keeping the loudest bin per bucket.
    fn note_bins(
        &self,
        decibels: &[f32],
        bin_width: f32,
        range: Option<(f32, f32)>,
    ) -> (Vec<f32>, Vec<f32>) {
        let notes: Vec<f32> = self
            .notes
            .iter()
            .copied()
            .filter(|f| range.is_none_or(|(lo, hi)| *f >= lo && *f <= hi))
            .collect();

        let mut values = Vec::with_capacity(notes.len());
        for (i, &freq) in notes.iter().enumerate() {
            let lower = if i == 0 {
                freq / 2f32.powf(1.0 / 24.0)
            } else {
                (notes[i - 1] * freq).sqrt()
            };
            let upper = match notes.get(i + 1) {
                Some(next) => (freq * next).sqrt(),
                None => freq * 2f32.powf(1.0 / 24.0),
            };

            let first = (lower / bin_width).floor() as usize;
            let last = ((upper / bin_width).ceil() as usize).min(decibels.len().saturating_sub(1));
            let loudest = decibels[first.min(last)..=last]
                .iter()
                .copied()
                .fold(f32::NEG_INFINITY, f32::max);
            values.push(loudest);
        }
        (values, notes)
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_db(db: f32) -> f32 {
    ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
}
