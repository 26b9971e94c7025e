//! Spawn and death pressure that keeps the population near equilibrium.
//!
//! Rates are pure functions of the audio inputs and the alive count. The
//! controller only adds the interval accumulators that turn a rate into
//! discrete per-frame decisions.

use tracing::{info, warn};

use crate::config::PopulationConfig;

/// Audio-derived inputs the controller reacts to, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PopulationInputs {
    pub intensity: f64,
    pub tempo_normalized: f64,
    pub bass: f64,
}

/// Effective rates, in events per second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rates {
    pub spawn_per_sec: f64,
    pub death_per_sec: f64,
    pub seeding: bool,
}

/// What the field should do this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationDecision {
    pub spawn_count: usize,
    pub mark_death: bool,
    /// Number of newest particles to keep when the hard cap was breached.
    pub emergency_cull: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PopulationController {
    config: PopulationConfig,
    elapsed_ms: f64,
    since_spawn_ms: f64,
    since_death_ms: f64,
    seeding_logged: bool,
}

impl PopulationController {
    pub fn new(config: PopulationConfig) -> Self {
        Self {
            config,
            elapsed_ms: 0.0,
            since_spawn_ms: 0.0,
            since_death_ms: 0.0,
            seeding_logged: false,
        }
    }

    pub fn config(&self) -> &PopulationConfig {
        &self.config
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms / 1000.0
    }

    pub fn is_seeding(&self) -> bool {
        self.elapsed_secs() < self.config.seeding_secs
    }

    /// Spawn and death rates for the given inputs and alive count.
    pub fn rates(&self, inputs: &PopulationInputs, alive: usize, elapsed_s: f64) -> Rates {
        let c = &self.config;
        if elapsed_s < c.seeding_secs {
            let second = elapsed_s.max(0.0).floor() as i32;
            let spawn = (c.seeding_initial_rate * c.seeding_decay.powi(second))
                .max(c.seeding_floor_rate);
            return Rates {
                spawn_per_sec: spawn,
                death_per_sec: 0.0,
                seeding: true,
            };
        }

        let intensity = sanitize(inputs.intensity);
        let tempo = sanitize(inputs.tempo_normalized);
        let bass = sanitize(inputs.bass);

        let (base_spawn, base_death) = if intensity >= c.intensity_threshold {
            (c.energetic_spawn_rate, c.energetic_death_rate)
        } else {
            (c.calm_spawn_rate, c.calm_death_rate)
        };

        let spawn =
            base_spawn * (1.0 + tempo * c.tempo_spawn_boost) * (1.0 + bass * c.bass_spawn_boost);
        let death = base_death
            * (1.0 - tempo * c.tempo_death_reduction).max(0.0)
            * self.soft_cap_multiplier(alive);

        Rates {
            spawn_per_sec: spawn.max(0.0),
            death_per_sec: death.max(0.0),
            seeding: false,
        }
    }

    /// Death multiplier, 1 below the soft-cap start and rising exponentially
    /// to the configured maximum at the soft-cap ceiling.
    pub fn soft_cap_multiplier(&self, alive: usize) -> f64 {
        let c = &self.config;
        if alive <= c.soft_cap_start {
            return 1.0;
        }
        let span = (c.soft_cap_ceiling - c.soft_cap_start) as f64;
        let t = ((alive - c.soft_cap_start) as f64 / span).clamp(0.0, 1.0);
        c.soft_cap_max_multiplier.max(1.0).powf(t)
    }

    /// Advances the accumulators by `dt_ms` and decides this frame's actions.
    ///
    /// `alive` and `visible` must be counted before the frame mutates the
    /// population.
    pub fn decide(
        &mut self,
        inputs: &PopulationInputs,
        alive: usize,
        visible: usize,
        dt_ms: f64,
    ) -> PopulationDecision {
        let c = &self.config;
        let dt_ms = if dt_ms.is_finite() { dt_ms.max(0.0) } else { 0.0 };
        self.elapsed_ms += dt_ms;
        let rates = self.rates(inputs, alive, self.elapsed_secs());

        if !rates.seeding && !self.seeding_logged {
            info!("Seeding complete with {} alive particles", alive);
            self.seeding_logged = true;
        }

        let mut spawn_count = 0;
        self.since_spawn_ms += dt_ms;
        if rates.spawn_per_sec > 0.0 {
            let interval = 1000.0 / rates.spawn_per_sec;
            while self.since_spawn_ms >= interval && spawn_count < c.max_spawn_per_frame {
                self.since_spawn_ms -= interval;
                spawn_count += 1;
            }
            self.since_spawn_ms = self.since_spawn_ms.min(interval);
        } else {
            self.since_spawn_ms = 0.0;
        }

        if !rates.seeding && alive < c.floor {
            spawn_count = spawn_count.max(c.floor - alive);
        }
        spawn_count = spawn_count.min(c.hard_cap.saturating_sub(visible));

        let mut mark_death = false;
        self.since_death_ms += dt_ms;
        if rates.death_per_sec > 0.0 {
            let interval = 1000.0 / rates.death_per_sec;
            if self.since_death_ms >= interval {
                self.since_death_ms -= interval;
                mark_death = alive > c.floor;
            }
            self.since_death_ms = self.since_death_ms.min(interval);
        } else {
            self.since_death_ms = 0.0;
        }

        let emergency_cull = if visible > c.hard_cap {
            warn!(
                "Population {} exceeded hard cap {}, culling to {}",
                visible, c.hard_cap, c.emergency_keep
            );
            Some(c.emergency_keep)
        } else {
            None
        };

        PopulationDecision {
            spawn_count,
            mark_death,
            emergency_cull,
        }
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
