//! The particle field: motion, flocking, lifecycle and population, one frame
//! at a time.
//!
//! Particles live in a single backing vector. Dead particles are parked in a
//! pool of indices and respawned in place, so the vector only grows while the
//! population is climbing and only shrinks during an emergency cull.

use std::f64::consts::{PI, TAU};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::{EngineConfig, FieldConfig};
use crate::error::ConfigError;
use crate::flow::FlowField;
use crate::gravity::{GravityCenter, GravityTracker, Viewport};
use crate::particle::{Particle, ParticleRecord};
use crate::population::{PopulationController, PopulationDecision, PopulationInputs};
use crate::spatial::SpatialHash;

/// Longest frame the field will integrate in one step (milliseconds).
const MAX_FRAME_MS: f64 = 250.0;

/// Audio-derived inputs for one frame, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldInputs {
    pub intensity: f64,
    pub inertia_intensity: f64,
    pub tempo_normalized: f64,
    pub bass: f64,
}

impl FieldInputs {
    fn sanitized(self) -> Self {
        let clean = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            intensity: clean(self.intensity),
            inertia_intensity: clean(self.inertia_intensity),
            tempo_normalized: clean(self.tempo_normalized),
            bass: clean(self.bass),
        }
    }
}

/// Continuous weights of the two motion contributions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendFactors {
    pub drift: f64,
    pub expansion: f64,
}

impl BlendFactors {
    pub fn new(config: &FieldConfig, intensity: f64) -> Self {
        Self {
            drift: (1.0 - intensity * config.drift_k1).max(0.0),
            expansion: (config.expansion_k2 + intensity * config.expansion_k3).max(0.0),
        }
    }
}

/// What a spawned particle inherits.
#[derive(Debug, Clone, Copy)]
struct Parent {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    heading: f64,
    generation: u32,
}

#[derive(Debug, Clone)]
pub struct ParticleField {
    config: FieldConfig,
    viewport: Viewport,
    particles: Vec<Particle>,
    pool: Vec<usize>,
    index: SpatialHash,
    flow: FlowField,
    gravity: GravityTracker,
    population: PopulationController,
    rng: StdRng,
    next_id: u64,
    elapsed_ms: f64,
    frame: u64,
    neighbors: Vec<usize>,
    nudges: Vec<(usize, f64, f64)>,
}

impl ParticleField {
    pub fn new(config: &EngineConfig, viewport: Viewport, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        let field = &config.field;
        let index = SpatialHash::new(field.cell_size)?;
        let flow_seed = (seed ^ (seed >> 32)) as u32;

        Ok(Self {
            flow: FlowField::new(flow_seed, field.flow_scale, field.flow_time_scale),
            config: field.clone(),
            viewport,
            particles: Vec::new(),
            pool: Vec::new(),
            index,
            gravity: GravityTracker::new(config.gravity.clone()),
            population: PopulationController::new(config.population.clone()),
            rng: StdRng::seed_from_u64(seed),
            next_id: 0,
            elapsed_ms: 0.0,
            frame: 0,
            neighbors: Vec::new(),
            nudges: Vec::new(),
        })
    }

    /// Advances the field by one frame.
    pub fn step(&mut self, dt_ms: f64, inputs: &FieldInputs) {
        let dt_ms = if dt_ms.is_finite() {
            dt_ms.clamp(0.0, MAX_FRAME_MS)
        } else {
            0.0
        };
        let dt_s = dt_ms / 1000.0;
        let inputs = inputs.sanitized();

        // Decisions are taken against the population as it stood before this
        // frame touched it.
        let decision = self.population.decide(
            &PopulationInputs {
                intensity: inputs.intensity,
                tempo_normalized: inputs.tempo_normalized,
                bass: inputs.bass,
            },
            self.alive_count(),
            self.visible_count(),
            dt_ms,
        );

        // (1)
        self.index
            .rebuild_filtered(&self.particles, |p: &Particle| p.is_visible());
        self.gravity.update_targets(
            dt_ms,
            self.particles
                .iter()
                .filter(|p| p.is_alive())
                .map(|p| (p.x, p.y)),
            self.viewport,
        );
        self.gravity.interpolate(dt_ms);

        // (2)
        let blend = BlendFactors::new(&self.config, inputs.intensity);

        // (3) and (4)
        self.steer(blend, dt_s);
        self.apply_forces(inputs.intensity, dt_s);

        // (5)
        self.align(dt_s);
        self.integrate(dt_s, dt_ms > 0.0);

        // (6) and (7)
        self.advance_lifecycles(dt_ms);
        self.recycle_faded();

        // (8)
        self.apply_decision(decision);

        // (9)
        self.mark_offscreen();

        // (10)
        self.index
            .rebuild_filtered(&self.particles, |p: &Particle| p.is_visible());

        self.elapsed_ms += dt_ms;
        self.frame += 1;
    }

    /// Drift and expansion contributions, both always evaluated.
    ///
    /// Only the expansion contribution follows the flow field: headings turn
    /// toward it at a rate scaled by the expansion weight. Drift wobbles
    /// around whatever heading the particle already has.
    fn steer(&mut self, blend: BlendFactors, dt_s: f64) {
        let c = &self.config;
        let t = self.elapsed_ms / 1000.0;
        let relax = 1.0 - (-c.responsiveness * dt_s).exp();
        let max_turn = c.flow_turn_rate * blend.expansion.min(1.0) * dt_s;

        for p in self.particles.iter_mut().filter(|p| p.is_visible()) {
            let profile = p.profile();

            let flow_heading = self.flow.angle(p.x, p.y, t);
            p.heading = turn_toward(p.heading, flow_heading, max_turn);

            let wobble = (TAU * c.wobble_hz * t + p.phase).sin();
            let drift_heading = p.heading + c.wobble_amplitude * wobble;
            let drift_speed = c.drift_speed * profile.speed * (1.0 + 0.25 * wobble);
            let expansion_speed = c.expansion_speed
                * profile.speed
                * (1.0 + p.generation as f64 * c.generation_speed_scale);

            let target_vx = blend.drift * drift_speed * drift_heading.cos()
                + blend.expansion * expansion_speed * p.heading.cos();
            let target_vy = blend.drift * drift_speed * drift_heading.sin()
                + blend.expansion * expansion_speed * p.heading.sin();

            p.vx += (target_vx - p.vx) * relax;
            p.vy += (target_vy - p.vy) * relax;
        }
    }

    /// Gravity pulls, then soft containment past the viewport margin.
    fn apply_forces(&mut self, intensity: f64, dt_s: f64) {
        let c = &self.config;
        let Viewport { width, height } = self.viewport;
        let margin = c.boundary_margin;

        for p in self.particles.iter_mut().filter(|p| p.is_visible()) {
            let (ax, ay) = self
                .gravity
                .acceleration_at(p.x, p.y, self.viewport, intensity);
            p.vx += ax * dt_s;
            p.vy += ay * dt_s;

            p.vx += containment(p.x, margin, width - margin) * c.boundary_stiffness * dt_s;
            p.vy += containment(p.y, margin, height - margin) * c.boundary_stiffness * dt_s;
        }
    }

    /// Nudges each mature particle toward the weighted mean velocity of its
    /// neighbors. All nudges are computed from this frame's velocities before
    /// any is applied.
    fn align(&mut self, dt_s: f64) {
        let gain = (self.config.alignment_strength * dt_s).clamp(0.0, 1.0);
        if gain == 0.0 {
            return;
        }
        let radius = self.config.influence_radius;
        let min_age = self.config.alignment_min_age;
        let direct = self.visible_count() < self.config.index_bypass_below;

        let mut nudges = std::mem::take(&mut self.nudges);
        nudges.clear();

        for (i, p) in self.particles.iter().enumerate() {
            if !p.is_visible() || p.age < min_age {
                continue;
            }
            if direct {
                self.neighbors.clear();
                self.neighbors.extend(0..self.particles.len());
            } else {
                self.index.query_into(p.x, p.y, &mut self.neighbors);
            }

            let mut weight_sum = 0.0;
            let mut sum_vx = 0.0;
            let mut sum_vy = 0.0;
            for &j in &self.neighbors {
                if j == i {
                    continue;
                }
                let other = &self.particles[j];
                if !other.is_visible() {
                    continue;
                }
                let dist = (other.x - p.x).hypot(other.y - p.y);
                if !(dist < radius) {
                    continue;
                }
                let weight = (1.0 - dist / radius) * other.lifecycle;
                weight_sum += weight;
                sum_vx += other.vx * weight;
                sum_vy += other.vy * weight;
            }

            if weight_sum > 1e-9 {
                let avg_vx = sum_vx / weight_sum;
                let avg_vy = sum_vy / weight_sum;
                nudges.push((i, (avg_vx - p.vx) * gain, (avg_vy - p.vy) * gain));
            }
        }

        for &(i, dvx, dvy) in &nudges {
            let p = &mut self.particles[i];
            p.vx += dvx;
            p.vy += dvy;
        }
        self.nudges = nudges;
    }

    fn integrate(&mut self, dt_s: f64, advance_age: bool) {
        let max_speed = self.config.max_speed;
        let (cx, cy) = self.viewport.center();
        let mut recentred = 0usize;

        for p in self.particles.iter_mut().filter(|p| p.is_visible()) {
            let speed = p.vx.hypot(p.vy);
            if speed > max_speed {
                let scale = max_speed / speed;
                p.vx *= scale;
                p.vy *= scale;
            }
            p.x += p.vx * dt_s;
            p.y += p.vy * dt_s;
            if advance_age {
                p.age = p.age.saturating_add(1);
            }

            if !p.is_finite() {
                p.x = cx;
                p.y = cy;
                p.vx = 0.0;
                p.vy = 0.0;
                p.heading = 0.0;
                recentred += 1;
            }
        }

        if recentred > 0 {
            warn!("Re-centred {} particles with non-finite state", recentred);
        }
    }

    fn advance_lifecycles(&mut self, dt_ms: f64) {
        let fade_in = self.config.fade_in_per_ms * dt_ms;
        let fade_out = self.config.fade_out_per_ms * dt_ms;
        for p in self.particles.iter_mut().filter(|p| p.is_visible()) {
            p.lifecycle = if p.dying {
                (p.lifecycle - fade_out).max(0.0)
            } else {
                (p.lifecycle + fade_in).min(1.0)
            };
        }
    }

    /// Parks faded particles in the pool. The backing vector keeps its length.
    fn recycle_faded(&mut self) {
        let threshold = self.config.recycle_threshold;
        for (i, p) in self.particles.iter_mut().enumerate() {
            if p.is_visible() && p.dying && p.lifecycle < threshold {
                p.pooled = true;
                p.dying = false;
                p.lifecycle = 0.0;
                p.vx = 0.0;
                p.vy = 0.0;
                self.pool.push(i);
            }
        }
    }

    fn apply_decision(&mut self, decision: PopulationDecision) {
        if let Some(keep) = decision.emergency_cull {
            self.cull_to(keep);
        }

        if decision.spawn_count > 0 {
            let parents: Vec<Parent> = self
                .particles
                .iter()
                .filter(|p| p.is_alive())
                .map(|p| Parent {
                    x: p.x,
                    y: p.y,
                    vx: p.vx,
                    vy: p.vy,
                    heading: p.heading,
                    generation: p.generation,
                })
                .collect();
            for _ in 0..decision.spawn_count {
                if !self.spawn(&parents) {
                    debug!("Spawn skipped: pool empty and population at soft cap ceiling");
                    break;
                }
            }
        }

        if decision.mark_death {
            let oldest = self
                .particles
                .iter_mut()
                .filter(|p| p.is_alive())
                .max_by_key(|p| p.age);
            if let Some(p) = oldest {
                p.dying = true;
            }
        }
    }

    /// Keeps the newest `keep` visible particles and drops everything else.
    fn cull_to(&mut self, keep: usize) {
        let mut survivors: Vec<Particle> = self
            .particles
            .drain(..)
            .filter(|p| p.is_visible())
            .collect();
        let before = survivors.len();
        if survivors.len() > keep {
            survivors.sort_unstable_by(|a, b| b.id.cmp(&a.id));
            survivors.truncate(keep);
            survivors.sort_unstable_by_key(|p| p.id);
        }
        warn!("Emergency cull removed {} particles", before - survivors.len());
        self.particles = survivors;
        self.pool.clear();
    }

    /// Respawns from the pool, or allocates while below the soft cap ceiling.
    /// Returns false when neither is possible.
    fn spawn(&mut self, parents: &[Parent]) -> bool {
        let slot = match self.pool.pop() {
            Some(slot) => Some(slot),
            None if self.alive_count() < self.population.config().soft_cap_ceiling => None,
            None => return false,
        };

        let particle = self.new_particle(parents);
        match slot {
            Some(slot) => self.particles[slot] = particle,
            None => self.particles.push(particle),
        }
        true
    }

    fn new_particle(&mut self, parents: &[Parent]) -> Particle {
        let c = &self.config;
        let id = self.next_id;
        self.next_id += 1;

        let (x, y, vx, vy, heading, generation) = if parents.is_empty() {
            let (cx, cy) = self.viewport.center();
            let radius = c.seed_radius * self.viewport.width.min(self.viewport.height);
            let angle = self.rng.random_range(0.0..TAU);
            let dist = radius * self.rng.random::<f64>().sqrt();
            let heading = self.rng.random_range(0.0..TAU);
            (
                cx + angle.cos() * dist,
                cy + angle.sin() * dist,
                0.0,
                0.0,
                heading,
                0,
            )
        } else {
            let parent = parents[self.rng.random_range(0..parents.len())];
            let jitter = c.spawn_jitter;
            (
                parent.x + self.rng.random_range(-1.0..=1.0) * jitter,
                parent.y + self.rng.random_range(-1.0..=1.0) * jitter,
                parent.vx,
                parent.vy,
                parent.heading + self.rng.random_range(-0.5..=0.5),
                (parent.generation + 1).min(c.max_generation),
            )
        };

        let mut particle = Particle {
            id,
            x,
            y,
            vx,
            vy,
            heading,
            generation,
            base_size: 0.0,
            age: 0,
            lifecycle: 0.0,
            dying: false,
            pooled: false,
            phase: self.rng.random_range(0.0..TAU),
        };
        let shrink = (1.0 - c.generation_size_decay * generation as f64).max(0.0);
        particle.base_size = (c.base_size * shrink * particle.profile().size).max(c.min_size);
        particle
    }

    /// Marks alive particles beyond the expanded viewport as dying.
    fn mark_offscreen(&mut self) {
        let m = self.config.offscreen_margin;
        let Viewport { width, height } = self.viewport;
        for p in self.particles.iter_mut().filter(|p| p.is_alive()) {
            if p.x < -m || p.y < -m || p.x > width + m || p.y > height + m {
                p.dying = true;
            }
        }
    }

    /// Any size is accepted; dimensions are clamped to at least 1.
    pub fn set_viewport(&mut self, width: f64, height: f64) {
        self.viewport = Viewport::new(width, height);
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// The backing vector, pooled slots included.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Display records for every visible particle.
    pub fn records(&self) -> Vec<ParticleRecord> {
        self.particles
            .iter()
            .filter(|p| p.is_visible())
            .map(Particle::record)
            .collect()
    }

    pub fn alive_count(&self) -> usize {
        self.particles.iter().filter(|p| p.is_alive()).count()
    }

    pub fn visible_count(&self) -> usize {
        self.particles.iter().filter(|p| p.is_visible()).count()
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    pub fn gravity_centers(&self) -> Vec<GravityCenter> {
        self.gravity.centers()
    }

    pub fn index(&self) -> &SpatialHash {
        &self.index
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn is_seeding(&self) -> bool {
        self.population.is_seeding()
    }
}

/// Rotates `current` toward `target` by at most `max_step` radians.
fn turn_toward(current: f64, target: f64, max_step: f64) -> f64 {
    let diff = (target - current + PI).rem_euclid(TAU) - PI;
    (current + diff.clamp(-max_step, max_step)).rem_euclid(TAU)
}

/// Signed distance past the `[low, high]` band, pointing back inside.
fn containment(value: f64, low: f64, high: f64) -> f64 {
    if low > high {
        // Viewport narrower than both margins: pull toward its middle.
        return (low + high) * 0.5 - value;
    }
    if value < low {
        low - value
    } else if value > high {
        high - value
    } else {
        0.0
    }
}
