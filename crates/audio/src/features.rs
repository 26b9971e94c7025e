use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::levels::BandLevels;

/// Analysis window length in samples.
pub const FFT_SIZE: usize = 1024;

/// Band edges in Hz.
const BASS_HZ: (f32, f32) = (20.0, 250.0);
const MID_HZ: (f32, f32) = (250.0, 2000.0);
const TREBLE_HZ: (f32, f32) = (2000.0, 8000.0);

/// Levels below this many dB under full scale read as 0.
const FLOOR_DB: f32 = 60.0;

/// Extracts amplitude and three band levels from a window of mono samples.
pub struct FeatureExtractor {
    fft: Arc<dyn Fft<f32>>,
    buffer: Vec<Complex<f32>>,
    window: Vec<f32>,
    bass_bins: (usize, usize),
    mid_bins: (usize, usize),
    treble_bins: (usize, usize),
}

impl FeatureExtractor {
    pub fn new(sample_rate: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let window = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / FFT_SIZE as f32).cos()))
            .collect();

        let bin_width = sample_rate.max(1.0) / FFT_SIZE as f32;
        let bins = |(low, high): (f32, f32)| {
            let low_bin = (low / bin_width).floor() as usize;
            let high_bin = (high / bin_width).ceil() as usize;
            (low_bin.max(1), high_bin.min(FFT_SIZE / 2))
        };

        Self {
            fft,
            buffer: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            window,
            bass_bins: bins(BASS_HZ),
            mid_bins: bins(MID_HZ),
            treble_bins: bins(TREBLE_HZ),
        }
    }

    /// Analyzes the most recent `FFT_SIZE` samples, zero-padding shorter input.
    pub fn process(&mut self, samples: &[f32]) -> BandLevels {
        let start = samples.len().saturating_sub(FFT_SIZE);
        let samples = &samples[start..];

        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            let sample = if sample.is_finite() { sample } else { 0.0 };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.buffer);

        BandLevels {
            amplitude: rms(samples) * std::f32::consts::SQRT_2,
            bass: self.band_level(self.bass_bins),
            mid: self.band_level(self.mid_bins),
            treble: self.band_level(self.treble_bins),
        }
        .clamped()
    }

    /// Mean band power relative to a full-scale sine, mapped from
    /// `-FLOOR_DB..0` dB onto `0..1`.
    fn band_level(&self, (low, high): (usize, usize)) -> f32 {
        if high <= low {
            return 0.0;
        }
        // A full-scale sine under a Hann window peaks at N/4.
        let reference = FFT_SIZE as f32 / 4.0;
        let power: f32 = self.buffer[low..high]
            .iter()
            .map(|c| c.norm_sqr() / (reference * reference))
            .sum::<f32>()
            / (high - low) as f32;
        let db = 10.0 * (power + 1e-12).log10();
        ((db + FLOOR_DB) / FLOOR_DB).clamp(0.0, 1.0)
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .filter(|s| s.is_finite())
        .map(|s| s * s)
        .sum();
    (sum / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 48_000.0;

    fn sine(freq: f32, amplitude: f32) -> Vec<f32> {
        (0..FFT_SIZE)
            .map(|i| {
                amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SAMPLE_RATE).sin()
            })
            .collect()
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut extractor = FeatureExtractor::new(SAMPLE_RATE);
        let levels = extractor.process(&vec![0.0; FFT_SIZE]);
        assert_eq!(levels, BandLevels::default());
    }

    #[test]
    fn test_bass_tone_lands_in_bass_band() {
        let mut extractor = FeatureExtractor::new(SAMPLE_RATE);
        let levels = extractor.process(&sine(100.0, 0.8));
        assert!(levels.bass > 0.5, "bass {}", levels.bass);
        assert!(levels.bass > levels.mid);
        assert!(levels.bass > levels.treble);
    }

    #[test]
    fn test_treble_tone_lands_in_treble_band() {
        let mut extractor = FeatureExtractor::new(SAMPLE_RATE);
        let levels = extractor.process(&sine(4000.0, 0.8));
        assert!(levels.treble > levels.bass);
        assert!(levels.treble > levels.mid);
    }

    #[test]
    fn test_amplitude_tracks_rms() {
        let mut extractor = FeatureExtractor::new(SAMPLE_RATE);
        let quiet = extractor.process(&sine(440.0, 0.1)).amplitude;
        let loud = extractor.process(&sine(440.0, 0.9)).amplitude;
        assert!((loud - 0.9).abs() < 0.05, "loud {loud}");
        assert!(quiet < loud);
    }

    #[test]
    fn test_short_and_long_input() {
        let mut extractor = FeatureExtractor::new(SAMPLE_RATE);
        let short = extractor.process(&sine(100.0, 0.5)[..100]);
        assert!(short.bass >= 0.0 && short.bass <= 1.0);
        let mut long = vec![0.0; FFT_SIZE * 3];
        long.extend(sine(100.0, 0.5));
        let levels = extractor.process(&long);
        assert!(levels.bass > 0.5);
    }
}
