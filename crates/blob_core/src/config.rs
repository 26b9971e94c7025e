//! Tunables for every engine component.
//!
//! All thresholds, rates and multipliers are aesthetic parameters. Every
//! struct deserializes with `#[serde(default)]`, so a partial document only
//! overrides the fields it names.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyzer: AnalyzerConfig,
    pub population: PopulationConfig,
    pub gravity: GravityConfig,
    pub field: FieldConfig,
}

impl EngineConfig {
    /// Checks the structural invariants every component relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analyzer.validate()?;
        self.population.validate()?;
        self.gravity.validate()?;
        self.field.validate()?;
        Ok(())
    }
}

/// Adaptive audio analyzer parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Fixed resampling tick (milliseconds)
    pub tick_ms: f64,

    /// Rolling history length in ticks (600 = 60s at 100ms)
    pub history_capacity: usize,

    /// Short energy window in ticks, used for the derivative estimate
    pub energy_window: usize,

    /// Exponential smoothing factor applied to raw intensity, in (0, 1]
    pub smoothing: f64,

    /// Multiplier on the energy derivative (amplitude minus short average)
    pub derivative_gain: f64,

    /// Upper bound of the derivative boost
    pub derivative_cap: f64,

    /// Inertia intensity window in ticks (20 = 2s)
    pub inertia_window: usize,

    /// Minimum min/max spread before normalization falls back to 0.5
    pub min_range: f64,

    /// Starting value of the adaptive decision threshold
    pub threshold_initial: f64,

    /// Lower clamp of the adaptive threshold
    pub threshold_min: f64,

    /// Upper clamp of the adaptive threshold
    pub threshold_max: f64,

    /// Fraction of the gap to `mean + 0.5·stdDev` closed per tick
    pub threshold_rate: f64,

    /// Samples required before the threshold starts adapting
    pub threshold_min_history: usize,

    /// Upper bound on ticks processed in one update (stall recovery)
    pub max_catch_up_ticks: usize,

    pub tempo: TempoConfig,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100.0,
            history_capacity: 600,
            energy_window: 10,
            smoothing: 0.3,
            derivative_gain: 2.0,
            derivative_cap: 0.3,
            inertia_window: 20,
            min_range: 0.01,
            threshold_initial: 0.5,
            threshold_min: 0.2,
            threshold_max: 0.8,
            threshold_rate: 0.05,
            threshold_min_history: 30,
            max_catch_up_ticks: 10,
            tempo: TempoConfig::default(),
        }
    }
}

impl AnalyzerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_ms.is_finite() && self.tick_ms > 0.0) {
            return Err(ConfigError::FactorOutOfRange {
                name: "analyzer.tick_ms",
                value: self.tick_ms,
            });
        }
        for (name, capacity) in [
            ("analyzer.history_capacity", self.history_capacity),
            ("analyzer.energy_window", self.energy_window),
            ("analyzer.inertia_window", self.inertia_window),
            ("analyzer.max_catch_up_ticks", self.max_catch_up_ticks),
        ] {
            if capacity == 0 {
                return Err(ConfigError::ZeroCapacity { name });
            }
        }
        unit_factor("analyzer.smoothing", self.smoothing)?;
        unit_factor("analyzer.threshold_rate", self.threshold_rate)?;
        if self.threshold_min >= self.threshold_max {
            return Err(ConfigError::EmptyRange {
                name: "analyzer.threshold",
                min: self.threshold_min,
                max: self.threshold_max,
            });
        }
        self.tempo.validate()
    }
}

/// Tempo smoothing and filtering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Neutral tempo published before any estimate exists (BPM)
    pub default_tempo: f64,

    /// Plausible candidate range (BPM)
    pub min_tempo: f64,
    pub max_tempo: f64,

    /// Largest accepted difference from the pending value once established (BPM)
    pub jump_threshold: f64,

    /// Confidence above which the jump guard applies
    pub established_confidence: f64,

    /// Weight kept on the prior pending value per candidate (≥ 0.95)
    pub prior_weight: f64,

    /// Weight given to a stable report's tempo
    pub stable_weight: f64,

    /// Support count that maps to full confidence
    pub full_support: f64,

    /// Fraction of the gap to the candidate confidence closed per event
    pub confidence_smoothing: f64,

    /// Confidence gained on a stable report
    pub stable_confidence_boost: f64,

    /// Minimum time between published tempo changes (milliseconds)
    pub publish_interval_ms: f64,

    /// Amplitude under which the signal counts as silence
    pub silence_floor: f64,

    /// Silence duration before confidence starts decaying (milliseconds)
    pub silence_hold_ms: f64,

    /// Fraction of confidence lost per silent tick
    pub silence_confidence_decay: f64,

    /// Fraction of the gap to the default tempo closed per silent tick
    pub silence_tempo_relax: f64,

    /// Calm and energetic reference tempos used for normalization (BPM)
    pub calm_bpm: f64,
    pub energetic_bpm: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            default_tempo: 100.0,
            min_tempo: 40.0,
            max_tempo: 220.0,
            jump_threshold: 20.0,
            established_confidence: 0.3,
            prior_weight: 0.95,
            stable_weight: 0.5,
            full_support: 100.0,
            confidence_smoothing: 0.2,
            stable_confidence_boost: 0.15,
            publish_interval_ms: 1000.0,
            silence_floor: 0.02,
            silence_hold_ms: 3000.0,
            silence_confidence_decay: 0.05,
            silence_tempo_relax: 0.02,
            calm_bpm: 70.0,
            energetic_bpm: 140.0,
        }
    }
}

impl TempoConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_tempo >= self.max_tempo {
            return Err(ConfigError::EmptyRange {
                name: "tempo.min_tempo..max_tempo",
                min: self.min_tempo,
                max: self.max_tempo,
            });
        }
        if self.calm_bpm >= self.energetic_bpm {
            return Err(ConfigError::EmptyRange {
                name: "tempo.calm_bpm..energetic_bpm",
                min: self.calm_bpm,
                max: self.energetic_bpm,
            });
        }
        if !(0.95..1.0).contains(&self.prior_weight) {
            return Err(ConfigError::FactorOutOfRange {
                name: "tempo.prior_weight",
                value: self.prior_weight,
            });
        }
        unit_factor("tempo.stable_weight", self.stable_weight)?;
        unit_factor("tempo.confidence_smoothing", self.confidence_smoothing)?;
        unit_factor("tempo.silence_confidence_decay", self.silence_confidence_decay)?;
        unit_factor("tempo.silence_tempo_relax", self.silence_tempo_relax)?;
        if self.full_support <= 0.0 {
            return Err(ConfigError::ZeroCapacity {
                name: "tempo.full_support",
            });
        }
        Ok(())
    }
}

/// Population controller parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    /// Deaths are never scheduled at or below this alive count
    pub floor: usize,

    /// Alive count where the death multiplier starts rising
    pub soft_cap_start: usize,

    /// Alive count where the death multiplier reaches its maximum
    pub soft_cap_ceiling: usize,

    /// Visible count that triggers an emergency cull
    pub hard_cap: usize,

    /// Particles retained by an emergency cull (newest first)
    pub emergency_keep: usize,

    /// Length of the seeding phase (seconds)
    pub seeding_secs: f64,

    /// Spawn rate during the first seeding second (per second)
    pub seeding_initial_rate: f64,

    /// Per-second geometric decay of the seeding rate
    pub seeding_decay: f64,

    /// Seeding rate never falls under this (per second)
    pub seeding_floor_rate: f64,

    /// Intensity at which the high-energy rate pair is selected
    pub intensity_threshold: f64,

    /// Rate pairs (per second) below and above the intensity threshold
    pub calm_spawn_rate: f64,
    pub calm_death_rate: f64,
    pub energetic_spawn_rate: f64,
    pub energetic_death_rate: f64,

    /// Spawn multiplier gained at full normalized tempo
    pub tempo_spawn_boost: f64,

    /// Spawn multiplier gained at full bass
    pub bass_spawn_boost: f64,

    /// Death rate reduction at full normalized tempo
    pub tempo_death_reduction: f64,

    /// Death multiplier reached at the soft-cap ceiling
    pub soft_cap_max_multiplier: f64,

    /// Upper bound on spawns in a single frame
    pub max_spawn_per_frame: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            floor: 40,
            soft_cap_start: 130,
            soft_cap_ceiling: 350,
            hard_cap: 420,
            emergency_keep: 300,
            seeding_secs: 4.0,
            seeding_initial_rate: 30.0,
            seeding_decay: 0.5,
            seeding_floor_rate: 3.0,
            intensity_threshold: 0.5,
            calm_spawn_rate: 2.0,
            calm_death_rate: 2.5,
            energetic_spawn_rate: 6.0,
            energetic_death_rate: 2.0,
            tempo_spawn_boost: 0.5,
            bass_spawn_boost: 0.5,
            tempo_death_reduction: 0.2,
            soft_cap_max_multiplier: 6.0,
            max_spawn_per_frame: 8,
        }
    }
}

impl PopulationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ordered = self.floor < self.soft_cap_start
            && self.soft_cap_start < self.soft_cap_ceiling
            && self.soft_cap_ceiling <= self.hard_cap
            && self.emergency_keep <= self.hard_cap
            && self.emergency_keep >= self.floor;
        if !ordered {
            return Err(ConfigError::CapsOutOfOrder {
                floor: self.floor,
                soft_start: self.soft_cap_start,
                soft_ceiling: self.soft_cap_ceiling,
                hard_cap: self.hard_cap,
            });
        }
        unit_factor("population.seeding_decay", self.seeding_decay)?;
        if self.max_spawn_per_frame == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "population.max_spawn_per_frame",
            });
        }
        Ok(())
    }
}

/// Gravity center tracker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GravityConfig {
    /// Time between density detections (milliseconds)
    pub detect_interval_ms: f64,

    /// Coarse grid divisions per viewport axis
    pub grid_divisions: usize,

    /// Particles a cell needs to become a center
    pub min_occupancy: usize,

    /// Maximum number of density centers
    pub max_centers: usize,

    /// Per-frame lerp fraction toward targets at 60 fps
    pub lerp_rate: f64,

    /// Strength below which a fading center is dropped
    pub drop_strength: f64,

    /// Target strength multiplier applied to a cell's particle share
    pub strength_scale: f64,

    /// Distance (as a fraction of the viewport diagonal) within which a target
    /// is matched to an existing center
    pub match_radius: f64,

    /// Peak acceleration from a full-strength density center (px/s²)
    pub center_pull: f64,

    /// Distance at which pull reaches half its peak (px)
    pub pull_softening: f64,

    /// Fixed viewport-center attractor acceleration at zero and full intensity (px/s²)
    pub anchor_pull_calm: f64,
    pub anchor_pull_energetic: f64,
}

impl Default for GravityConfig {
    fn default() -> Self {
        Self {
            detect_interval_ms: 400.0,
            grid_divisions: 6,
            min_occupancy: 5,
            max_centers: 3,
            lerp_rate: 0.08,
            drop_strength: 0.01,
            strength_scale: 3.0,
            match_radius: 0.25,
            center_pull: 40.0,
            pull_softening: 80.0,
            anchor_pull_calm: 8.0,
            anchor_pull_energetic: 30.0,
        }
    }
}

impl GravityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_divisions == 0 {
            return Err(ConfigError::ZeroCapacity {
                name: "gravity.grid_divisions",
            });
        }
        unit_factor("gravity.lerp_rate", self.lerp_rate)?;
        Ok(())
    }
}

/// Particle field orchestrator parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Drift blend: `drift = 1 - intensity·drift_k1`
    pub drift_k1: f64,

    /// Expansion blend: `expansion = expansion_k2 + intensity·expansion_k3`
    pub expansion_k2: f64,
    pub expansion_k3: f64,

    /// Drift wobble frequency (Hz) and heading amplitude (radians)
    pub wobble_hz: f64,
    pub wobble_amplitude: f64,

    /// Drift cruising speed (px/s)
    pub drift_speed: f64,

    /// Expansion base speed (px/s) and extra fraction per generation
    pub expansion_speed: f64,
    pub generation_speed_scale: f64,

    /// Heading turn rate toward the flow direction (radians/s at full expansion)
    pub flow_turn_rate: f64,

    /// Flow field spatial scale (noise cycles per px) and time scale (per s)
    pub flow_scale: f64,
    pub flow_time_scale: f64,

    /// Rate at which velocity relaxes toward the blended target (1/s)
    pub responsiveness: f64,

    /// Hard speed limit (px/s)
    pub max_speed: f64,

    /// Boundary containment: margin inside the viewport (px) and stiffness (1/s²)
    pub boundary_margin: f64,
    pub boundary_stiffness: f64,

    /// Distance beyond the viewport where particles are marked dying (px)
    pub offscreen_margin: f64,

    /// Neighbor influence radius for alignment (px)
    pub influence_radius: f64,

    /// Spatial hash cell size (px), must be at least `influence_radius`
    pub cell_size: f64,

    /// Alignment strength (1/s) and the minimum age in frames to participate
    pub alignment_strength: f64,
    pub alignment_min_age: u32,

    /// Visible counts below which alignment scans every particle directly
    pub index_bypass_below: usize,

    /// Lifecycle rates (per millisecond)
    pub fade_in_per_ms: f64,
    pub fade_out_per_ms: f64,

    /// Lifecycle under which a dying particle is recycled
    pub recycle_threshold: f64,

    /// Base particle size (px), per-generation shrink and size floor
    pub base_size: f64,
    pub generation_size_decay: f64,
    pub min_size: f64,

    /// Generation counter cap
    pub max_generation: u32,

    /// Spawn offset from the parent particle (px)
    pub spawn_jitter: f64,

    /// Radius around the viewport center used for parentless spawns (fraction of the short side)
    pub seed_radius: f64,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            drift_k1: 0.9,
            expansion_k2: 0.1,
            expansion_k3: 0.9,
            wobble_hz: 0.6,
            wobble_amplitude: 0.8,
            drift_speed: 24.0,
            expansion_speed: 60.0,
            generation_speed_scale: 0.08,
            flow_turn_rate: 2.5,
            flow_scale: 0.004,
            flow_time_scale: 0.15,
            responsiveness: 4.0,
            max_speed: 240.0,
            boundary_margin: 40.0,
            boundary_stiffness: 6.0,
            offscreen_margin: 120.0,
            influence_radius: 48.0,
            cell_size: 48.0,
            alignment_strength: 1.5,
            alignment_min_age: 30,
            index_bypass_below: 24,
            fade_in_per_ms: 1.0 / 600.0,
            fade_out_per_ms: 1.0 / 900.0,
            recycle_threshold: 0.01,
            base_size: 18.0,
            generation_size_decay: 0.06,
            min_size: 6.0,
            max_generation: 8,
            spawn_jitter: 24.0,
            seed_radius: 0.15,
        }
    }
}

impl FieldConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.cell_size.is_finite() && self.cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(self.cell_size));
        }
        if self.cell_size < self.influence_radius {
            return Err(ConfigError::CellSmallerThanRadius {
                cell_size: self.cell_size,
                radius: self.influence_radius,
            });
        }
        unit_factor("field.recycle_threshold", self.recycle_threshold)?;
        if self.fade_in_per_ms <= 0.0 || self.fade_out_per_ms <= 0.0 {
            return Err(ConfigError::FactorOutOfRange {
                name: "field.fade_rates",
                value: self.fade_in_per_ms.min(self.fade_out_per_ms),
            });
        }
        Ok(())
    }
}

fn unit_factor(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::FactorOutOfRange { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_cell_smaller_than_radius_rejected() {
        let mut config = EngineConfig::default();
        config.field.cell_size = 20.0;
        config.field.influence_radius = 30.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CellSmallerThanRadius { .. })
        ));
    }

    #[test]
    fn test_caps_out_of_order_rejected() {
        let mut config = EngineConfig::default();
        config.population.soft_cap_start = 500;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapsOutOfOrder { .. })
        ));
    }

    #[test]
    fn test_light_prior_weight_rejected() {
        let mut config = EngineConfig::default();
        config.analyzer.tempo.prior_weight = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::FactorOutOfRange { name: "tempo.prior_weight", .. })
        ));
    }

    #[test]
    fn test_partial_json_overrides_only_named_fields() {
        let json = r#"{ "population": { "floor": 10 }, "field": { "max_speed": 100.0 } }"#;
        let config: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.population.floor, 10);
        assert_eq!(config.field.max_speed, 100.0);
        assert_eq!(config.population.hard_cap, PopulationConfig::default().hard_cap);
        assert_eq!(config.analyzer, AnalyzerConfig::default());
    }
}
