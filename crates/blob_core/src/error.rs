//! Error types for the blob engine.
//!
//! Only configuration problems are returned to callers. Input and detector
//! failures are recorded on the analyzer and degrade the output instead.

use thiserror::Error;

/// Invalid tunables detected while building an engine component.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("cell size must be a positive finite number, got {0}")]
    InvalidCellSize(f64),

    #[error("cell size {cell_size} is smaller than the influence radius {radius}")]
    CellSmallerThanRadius { cell_size: f64, radius: f64 },

    #[error("{name} must lie in (0, 1], got {value}")]
    FactorOutOfRange { name: &'static str, value: f64 },

    #[error("{name} must be greater than zero")]
    ZeroCapacity { name: &'static str },

    #[error("population caps out of order: floor {floor}, soft start {soft_start}, soft ceiling {soft_ceiling}, hard cap {hard_cap}")]
    CapsOutOfOrder {
        floor: usize,
        soft_start: usize,
        soft_ceiling: usize,
        hard_cap: usize,
    },

    #[error("{name} range is empty: min {min} >= max {max}")]
    EmptyRange { name: &'static str, min: f64, max: f64 },
}

/// Why the audio input could not be acquired.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum InputError {
    #[error("audio input permission denied")]
    PermissionDenied,

    #[error("no audio input device available")]
    Unavailable,

    #[error("audio input stream failed: {0}")]
    Stream(String),
}

/// Tempo detector failures. Never fatal.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum DetectorError {
    #[error("tempo detector failed to initialize: {0}")]
    Init(String),

    #[error("tempo detector failed: {0}")]
    Runtime(String),
}
