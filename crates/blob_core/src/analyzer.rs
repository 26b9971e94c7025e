//! Adaptive audio analyzer.
//!
//! Turns per-frame band levels into a self-calibrating intensity signal. The
//! analyzer re-samples its input to a fixed tick and judges every value
//! against a rolling window of its own recent history, so the output reacts
//! the same way to a quiet ambient track as to a loud one.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AnalyzerConfig;
use crate::error::{DetectorError, InputError};
use crate::stats::{RollingStats, RollingWindow, normalize};
use crate::tempo::{TempoEvent, TempoTracker};

/// Band levels for one render frame, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureSample {
    pub amplitude: f64,
    pub bass: f64,
    pub mid: f64,
    pub treble: f64,
}

impl AudioFeatureSample {
    pub fn new(amplitude: f64, bass: f64, mid: f64, treble: f64) -> Self {
        Self {
            amplitude,
            bass,
            mid,
            treble,
        }
    }

    /// Clamps every field to [0, 1]; non-finite values become 0.
    pub fn sanitized(self) -> Self {
        let clean = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            amplitude: clean(self.amplitude),
            bass: clean(self.bass),
            mid: clean(self.mid),
            treble: clean(self.treble),
        }
    }
}

/// Features rescaled against their own rolling min/max.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormalizedFeatures {
    pub amplitude: f64,
    pub bass: f64,
    pub mid: f64,
    pub treble: f64,
}

impl Default for NormalizedFeatures {
    fn default() -> Self {
        Self {
            amplitude: 0.5,
            bass: 0.5,
            mid: 0.5,
            treble: 0.5,
        }
    }
}

/// Read-only view for display and debug overlays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerSnapshot {
    pub intensity: f64,
    pub inertia_intensity: f64,
    pub tempo: f64,
    pub tempo_confidence: f64,
    pub tempo_normalized: f64,
    pub adaptive_threshold: f64,
    pub rolling_stats: RollingStats,
    pub normalized: NormalizedFeatures,
    pub input_error: Option<InputError>,
    pub detector_failed: bool,
}

/// Rolling windows for the three bands.
#[derive(Debug, Clone)]
struct BandHistory {
    bass: RollingWindow,
    mid: RollingWindow,
    treble: RollingWindow,
}

#[derive(Debug, Clone)]
pub struct AdaptiveAudioAnalyzer {
    config: AnalyzerConfig,
    history: RollingWindow,
    energy: RollingWindow,
    bands: BandHistory,
    inertia: RollingWindow,
    stats: RollingStats,
    normalized: NormalizedFeatures,
    intensity: f64,
    inertia_intensity: f64,
    threshold: f64,
    tempo: TempoTracker,
    clock_ms: f64,
    tick_accumulator_ms: f64,
    ticks: u64,
    input_error: Option<InputError>,
}

impl AdaptiveAudioAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        let capacity = config.history_capacity;
        Self {
            history: RollingWindow::new(capacity),
            energy: RollingWindow::new(config.energy_window),
            bands: BandHistory {
                bass: RollingWindow::new(capacity),
                mid: RollingWindow::new(capacity),
                treble: RollingWindow::new(capacity),
            },
            inertia: RollingWindow::new(config.inertia_window),
            stats: RollingStats::default(),
            normalized: NormalizedFeatures::default(),
            intensity: 0.0,
            inertia_intensity: 0.0,
            threshold: config.threshold_initial.clamp(config.threshold_min, config.threshold_max),
            tempo: TempoTracker::new(config.tempo.clone()),
            clock_ms: 0.0,
            tick_accumulator_ms: 0.0,
            ticks: 0,
            input_error: None,
            config,
        }
    }

    /// Feeds one frame of input. Returns the number of ticks processed.
    pub fn update(&mut self, sample: AudioFeatureSample, dt_ms: f64) -> usize {
        let dt_ms = if dt_ms.is_finite() { dt_ms.max(0.0) } else { 0.0 };
        self.clock_ms += dt_ms;
        self.tempo.drain(self.clock_ms);

        let sample = if self.input_error.is_some() {
            AudioFeatureSample::default()
        } else {
            sample.sanitized()
        };

        self.tick_accumulator_ms += dt_ms;
        let mut processed = 0;
        while self.tick_accumulator_ms >= self.config.tick_ms {
            self.tick_accumulator_ms -= self.config.tick_ms;
            if processed == self.config.max_catch_up_ticks {
                // After a stall, drop the backlog instead of replaying it.
                self.tick_accumulator_ms %= self.config.tick_ms;
                break;
            }
            self.tick(sample);
            processed += 1;
        }
        processed
    }

    /// Processes exactly one fixed tick.
    pub fn tick(&mut self, sample: AudioFeatureSample) {
        let sample = sample.sanitized();
        let amplitude = sample.amplitude;
        let min_range = self.config.min_range;

        self.history.push(amplitude);
        self.energy.push(amplitude);
        self.bands.bass.push(sample.bass);
        self.bands.mid.push(sample.mid);
        self.bands.treble.push(sample.treble);
        self.stats = self.history.stats();

        let band = |window: &RollingWindow, value: f64| {
            let stats = window.stats();
            normalize(value, stats.min, stats.max, min_range)
        };
        self.normalized = NormalizedFeatures {
            amplitude: normalize(amplitude, self.stats.min, self.stats.max, min_range),
            bass: band(&self.bands.bass, sample.bass),
            mid: band(&self.bands.mid, sample.mid),
            treble: band(&self.bands.treble, sample.treble),
        };

        let derivative = amplitude - self.energy.mean();
        let boost =
            (derivative * self.config.derivative_gain).clamp(0.0, self.config.derivative_cap);
        let raw = (self.normalized.amplitude + boost).clamp(0.0, 1.0);

        self.intensity += (raw - self.intensity) * self.config.smoothing;
        self.intensity = self.intensity.clamp(0.0, 1.0);
        self.inertia.push(self.intensity);
        self.inertia_intensity = self.inertia.mean().clamp(0.0, 1.0);

        if self.history.len() >= self.config.threshold_min_history {
            let goal = self.stats.mean + 0.5 * self.stats.std_dev;
            self.threshold += (goal - self.threshold) * self.config.threshold_rate;
        }
        self.threshold = self
            .threshold
            .clamp(self.config.threshold_min, self.config.threshold_max);

        self.tempo.on_tick(amplitude, self.config.tick_ms);
        self.ticks += 1;
    }

    /// Queues a tempo report; it is applied on the next update.
    pub fn enqueue_tempo(&mut self, event: TempoEvent) {
        self.tempo.enqueue(event);
    }

    /// Records an input failure. Zero features are ingested until cleared.
    pub fn set_input_error(&mut self, error: InputError) {
        warn!("{}; analyzer running on neutral input", error);
        self.input_error = Some(error);
    }

    pub fn clear_input_error(&mut self) {
        if self.input_error.take().is_some() {
            info!("Audio input restored");
        }
    }

    /// Records a tempo detector failure; tempo stays at its default.
    pub fn mark_detector_failed(&mut self, error: DetectorError) {
        self.tempo.fail(error);
    }

    pub fn intensity(&self) -> f64 {
        self.intensity
    }

    pub fn inertia_intensity(&self) -> f64 {
        self.inertia_intensity
    }

    pub fn adaptive_threshold(&self) -> f64 {
        self.threshold
    }

    pub fn rolling_stats(&self) -> RollingStats {
        self.stats
    }

    pub fn normalized(&self) -> NormalizedFeatures {
        self.normalized
    }

    pub fn tempo(&self) -> &TempoTracker {
        &self.tempo
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn input_error(&self) -> Option<&InputError> {
        self.input_error.as_ref()
    }

    pub fn snapshot(&self) -> AnalyzerSnapshot {
        AnalyzerSnapshot {
            intensity: self.intensity,
            inertia_intensity: self.inertia_intensity,
            tempo: self.tempo.tempo(),
            tempo_confidence: self.tempo.confidence(),
            tempo_normalized: self.tempo.normalized(),
            adaptive_threshold: self.threshold,
            rolling_stats: self.stats,
            normalized: self.normalized,
            input_error: self.input_error.clone(),
            detector_failed: self.tempo.failure().is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn constant(value: f64) -> AudioFeatureSample {
        AudioFeatureSample::new(value, value, value, value)
    }

    #[test]
    fn test_constant_input_converges_without_nan() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        for _ in 0..700 {
            analyzer.tick(constant(0.5));
        }
        let stats = analyzer.rolling_stats();
        assert_eq!(stats.min, 0.5);
        assert_eq!(stats.max, 0.5);
        assert!((stats.mean - 0.5).abs() < 1e-12);
        assert!(stats.std_dev.abs() < 1e-12);
        assert_eq!(analyzer.normalized().amplitude, 0.5);
        assert_eq!(analyzer.normalized().bass, 0.5);
        assert!(analyzer.intensity().is_finite());
        assert_eq!(analyzer.history_len(), 600);
    }

    #[test]
    fn test_frames_are_resampled_to_ticks() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        let mut ticks = 0;
        for _ in 0..60 {
            ticks += analyzer.update(constant(0.3), 1000.0 / 60.0);
        }
        // One second of frames at a 100 ms tick.
        assert!((9..=10).contains(&ticks));
        assert_eq!(analyzer.ticks() as usize, ticks);
    }

    #[test]
    fn test_stall_catch_up_is_bounded() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        let processed = analyzer.update(constant(0.3), 60_000.0);
        assert_eq!(processed, 10);
        assert_eq!(analyzer.update(constant(0.3), 50.0), 0);
    }

    #[test]
    fn test_intensity_and_confidence_stay_bounded() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        for i in 0..5000 {
            let sample = AudioFeatureSample::new(
                rng.random_range(-0.5..1.5),
                rng.random::<f64>(),
                if i % 97 == 0 { f64::NAN } else { rng.random::<f64>() },
                rng.random::<f64>() * 3.0,
            );
            analyzer.update(sample, 16.0);
            if i % 50 == 0 {
                analyzer.enqueue_tempo(TempoEvent::Candidate {
                    tempo: rng.random_range(60.0..180.0),
                    support_count: rng.random_range(0..400),
                });
            }
            let snapshot = analyzer.snapshot();
            assert!((0.0..=1.0).contains(&snapshot.intensity));
            assert!((0.0..=1.0).contains(&snapshot.inertia_intensity));
            assert!((0.0..=1.0).contains(&snapshot.tempo_confidence));
        }
    }

    #[test]
    fn test_rising_energy_boosts_intensity() {
        let config = AnalyzerConfig {
            smoothing: 1.0,
            ..AnalyzerConfig::default()
        };
        let mut rising = AdaptiveAudioAnalyzer::new(config);
        for i in 0..200 {
            rising.tick(constant(if i % 2 == 0 { 0.2 } else { 0.8 }));
        }
        let mut falling = rising.clone();
        for _ in 0..10 {
            rising.tick(constant(0.2));
            falling.tick(constant(0.8));
        }
        rising.tick(constant(0.5));
        falling.tick(constant(0.5));

        // Same level and same range, so only the derivative term differs.
        assert_eq!(rising.normalized().amplitude, falling.normalized().amplitude);
        assert!((falling.intensity() - 0.5).abs() < 1e-9);
        assert!((rising.intensity() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_stays_in_band() {
        let config = AnalyzerConfig::default();
        let mut analyzer = AdaptiveAudioAnalyzer::new(config.clone());
        for _ in 0..1000 {
            analyzer.tick(constant(1.0));
        }
        assert!(analyzer.adaptive_threshold() <= config.threshold_max);
        assert!((analyzer.adaptive_threshold() - config.threshold_max).abs() < 1e-6);

        for _ in 0..1000 {
            analyzer.tick(constant(0.0));
        }
        assert!((analyzer.adaptive_threshold() - config.threshold_min).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_waits_for_history() {
        let config = AnalyzerConfig::default();
        let mut analyzer = AdaptiveAudioAnalyzer::new(config.clone());
        for _ in 0..(config.threshold_min_history - 1) {
            analyzer.tick(constant(1.0));
        }
        assert_eq!(analyzer.adaptive_threshold(), config.threshold_initial);
    }

    #[test]
    fn test_inertia_lags_intensity() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        for i in 0..100 {
            analyzer.tick(constant(if i % 2 == 0 { 0.0 } else { 1.0 }));
        }
        for _ in 0..30 {
            analyzer.tick(constant(1.0));
        }
        for _ in 0..3 {
            analyzer.tick(constant(0.0));
        }
        assert!(analyzer.intensity() < 0.5);
        assert!(analyzer.inertia_intensity() > 0.8);
    }

    #[test]
    fn test_input_error_publishes_zero_features() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        for _ in 0..100 {
            analyzer.update(constant(0.7), 100.0);
        }
        analyzer.set_input_error(InputError::PermissionDenied);
        for _ in 0..700 {
            analyzer.update(constant(0.9), 100.0);
        }
        let snapshot = analyzer.snapshot();
        assert_eq!(snapshot.input_error, Some(InputError::PermissionDenied));
        assert_eq!(snapshot.rolling_stats.max, 0.0);
        assert!(snapshot.intensity < 0.6);

        analyzer.clear_input_error();
        assert!(analyzer.input_error().is_none());
    }

    #[test]
    fn test_detector_failure_pins_confidence() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        analyzer.mark_detector_failed(DetectorError::Init("unsupported".to_string()));
        for _ in 0..100 {
            analyzer.enqueue_tempo(TempoEvent::Candidate {
                tempo: 128.0,
                support_count: 200,
            });
            analyzer.update(constant(0.6), 50.0);
        }
        let snapshot = analyzer.snapshot();
        assert_eq!(snapshot.tempo_confidence, 0.0);
        assert_eq!(snapshot.tempo, AnalyzerConfig::default().tempo.default_tempo);
        assert!(snapshot.detector_failed);
    }

    #[test]
    fn test_tempo_events_applied_on_next_update() {
        let mut analyzer = AdaptiveAudioAnalyzer::new(AnalyzerConfig::default());
        analyzer.enqueue_tempo(TempoEvent::Candidate {
            tempo: 128.0,
            support_count: 60,
        });
        assert_eq!(analyzer.tempo().pending(), None);
        analyzer.update(constant(0.5), 16.0);
        assert_eq!(analyzer.tempo().pending(), Some(128.0));
        assert_eq!(analyzer.snapshot().tempo, 128.0);
    }
}
