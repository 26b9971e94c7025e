use tracing::info;

use crate::analyzer::{AdaptiveAudioAnalyzer, AnalyzerSnapshot, AudioFeatureSample};
use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::events::Event;
use crate::field::{FieldInputs, ParticleField};
use crate::gravity::Viewport;
use crate::snapshot::FrameSnapshot;

/// The engine that drives the analyzer and the particle field from events.
pub struct BlobEngine {
    analyzer: AdaptiveAudioAnalyzer,
    field: ParticleField,
}

impl BlobEngine {
    /// Validates the configuration and builds an empty field. The same seed
    /// and event sequence always reproduce the same frames.
    pub fn new(config: EngineConfig, viewport: Viewport, seed: u64) -> Result<Self, ConfigError> {
        let field = ParticleField::new(&config, viewport, seed)?;
        info!(
            "Blob engine ready: {}x{} viewport, seed {}",
            viewport.width, viewport.height, seed
        );
        Ok(Self {
            analyzer: AdaptiveAudioAnalyzer::new(config.analyzer),
            field,
        })
    }

    /// Apply event.
    pub fn apply(&mut self, event: Event) {
        match event {
            Event::Frame { dt_ms, sample } => self.frame(dt_ms, sample),
            Event::Tempo(tempo) => self.analyzer.enqueue_tempo(tempo),
            Event::Resize { width, height } => {
                self.field.set_viewport(width, height);
                let viewport = self.field.viewport();
                info!("Viewport resized to {}x{}", viewport.width, viewport.height);
            }
            Event::InputFailed(error) => self.analyzer.set_input_error(error),
            Event::InputRestored => self.analyzer.clear_input_error(),
            Event::DetectorFailed(error) => self.analyzer.mark_detector_failed(error),
        }
    }

    /// The analyzer runs first so the field sees this frame's intensity.
    fn frame(&mut self, dt_ms: f64, sample: AudioFeatureSample) {
        self.analyzer.update(sample, dt_ms);
        let inputs = FieldInputs {
            intensity: self.analyzer.intensity(),
            inertia_intensity: self.analyzer.inertia_intensity(),
            tempo_normalized: self.analyzer.tempo().normalized(),
            bass: self.analyzer.normalized().bass,
        };
        self.field.step(dt_ms, &inputs);
    }

    pub fn analyzer(&self) -> &AdaptiveAudioAnalyzer {
        &self.analyzer
    }

    pub fn field(&self) -> &ParticleField {
        &self.field
    }

    pub fn analyzer_snapshot(&self) -> AnalyzerSnapshot {
        self.analyzer.snapshot()
    }

    /// Retrieves the current frame snapshot.
    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot::capture(&self.field, self.analyzer.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DetectorError, InputError};
    use crate::tempo::TempoEvent;

    const FRAME_MS: f64 = 1000.0 / 60.0;

    fn engine() -> BlobEngine {
        BlobEngine::new(EngineConfig::default(), Viewport::default(), 42).unwrap()
    }

    fn frame(level: f64) -> Event {
        Event::Frame {
            dt_ms: FRAME_MS,
            sample: AudioFeatureSample::new(level, level, level * 0.5, level * 0.25),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EngineConfig::default();
        config.field.cell_size = -1.0;
        assert!(BlobEngine::new(config, Viewport::default(), 1).is_err());
    }

    #[test]
    fn test_frame_events_bounds() {
        let mut engine = engine();
        for i in 0..600 {
            let level = ((i as f64) * 0.05).sin().abs();
            engine.apply(frame(level));
            let snapshot = engine.analyzer_snapshot();
            assert!((0.0..=1.0).contains(&snapshot.intensity));
            assert!((0.0..=1.0).contains(&snapshot.tempo_confidence));
        }
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.frame(), 600);
        assert!(snapshot.visible() >= snapshot.alive());
        assert_eq!(snapshot.particles().len(), snapshot.visible());
        assert!(snapshot.particles().iter().all(|p| (0.0..=1.0).contains(&p.lifecycle)));
    }

    #[test]
    fn test_tempo_octave_pair_smoothed() {
        let mut engine = engine();
        engine.apply(Event::Tempo(TempoEvent::Candidate {
            tempo: 70.0,
            support_count: 50,
        }));
        engine.apply(Event::Tempo(TempoEvent::Candidate {
            tempo: 140.0,
            support_count: 50,
        }));
        engine.apply(frame(0.5));
        let tempo = engine.analyzer_snapshot().tempo;
        assert!(tempo > 70.0 && tempo < 140.0, "tempo {tempo}");
    }

    #[test]
    fn test_resize_event() {
        let mut engine = engine();
        engine.apply(Event::Resize {
            width: 0.0,
            height: -5.0,
        });
        assert_eq!(engine.snapshot().viewport(), Viewport::new(1.0, 1.0));
        for _ in 0..120 {
            engine.apply(frame(0.8));
        }
        for record in engine.snapshot().particles() {
            assert!(record.x.is_finite() && record.y.is_finite());
        }
    }

    #[test]
    fn test_input_failure_keeps_running() {
        let mut engine = engine();
        engine.apply(Event::InputFailed(InputError::Unavailable));
        for _ in 0..300 {
            engine.apply(frame(0.9));
        }
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.analyzer().input_error, Some(InputError::Unavailable));
        assert_eq!(snapshot.analyzer().rolling_stats.max, 0.0);
        assert!(snapshot.alive() > 0);

        engine.apply(Event::InputRestored);
        assert_eq!(engine.analyzer_snapshot().input_error, None);
    }

    #[test]
    fn test_detector_failure_keeps_default_tempo() {
        let mut engine = engine();
        engine.apply(Event::DetectorFailed(DetectorError::Init("unsupported".to_string())));
        engine.apply(Event::Tempo(TempoEvent::Stable { tempo: 150.0 }));
        engine.apply(frame(0.5));
        let snapshot = engine.analyzer_snapshot();
        assert_eq!(snapshot.tempo, EngineConfig::default().analyzer.tempo.default_tempo);
        assert_eq!(snapshot.tempo_confidence, 0.0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut engine = engine();
        for _ in 0..30 {
            engine.apply(frame(0.6));
        }
        let json = serde_json::to_value(engine.snapshot()).unwrap();
        assert!(json["particles"].is_array());
        assert!(json["analyzer"]["intensity"].is_number());
        assert_eq!(json["frame"], 30);
    }
}
