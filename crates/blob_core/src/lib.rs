//! Audio-reactive particle field engine.
//!
//! [`BlobEngine`] consumes [`Event`]s: per-frame band levels, asynchronous
//! tempo reports, viewport changes and failure notices. After every frame it
//! can hand out a [`FrameSnapshot`] of particle display records plus the
//! analyzer's read-only view.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod field;
pub mod flow;
pub mod gravity;
pub mod particle;
pub mod population;
pub mod snapshot;
pub mod spatial;
pub mod stats;
pub mod tempo;

pub use analyzer::{AdaptiveAudioAnalyzer, AnalyzerSnapshot, AudioFeatureSample};
pub use config::EngineConfig;
pub use engine::BlobEngine;
pub use error::{ConfigError, DetectorError, InputError};
pub use events::Event;
pub use gravity::Viewport;
pub use particle::ParticleRecord;
pub use snapshot::FrameSnapshot;
pub use tempo::TempoEvent;
