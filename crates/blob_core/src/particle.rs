//! Particle state and the display record handed to renderers.

use serde::Serialize;

use crate::spatial::Positioned;

/// Number of size/speed profiles particles are spread across.
pub const CLUSTER_COUNT: u32 = 4;

/// A single blob, owned by the particle field and addressed by index.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Heading in radians.
    pub heading: f64,
    /// Steps removed from the initial seed; affects base speed and size.
    pub generation: u32,
    pub base_size: f64,
    /// Frames alive since the last (re)spawn.
    pub age: u32,
    /// Fade progress: 0 invisible, 1 fully present.
    pub lifecycle: f64,
    pub dying: bool,
    /// Parked in the dead pool, waiting to be respawned.
    pub pooled: bool,
    /// Per-particle wobble phase offset (radians).
    pub phase: f64,
}

impl Particle {
    /// Alive particles are visible and not fading out.
    pub fn is_alive(&self) -> bool {
        !self.pooled && !self.dying
    }

    /// Visible particles are everything outside the dead pool.
    pub fn is_visible(&self) -> bool {
        !self.pooled
    }

    pub fn cluster_seed(&self) -> u32 {
        cluster_seed(self.id)
    }

    pub fn profile(&self) -> ClusterProfile {
        ClusterProfile::for_seed(self.cluster_seed())
    }

    pub fn is_finite(&self) -> bool {
        [self.x, self.y, self.vx, self.vy, self.heading]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn record(&self) -> ParticleRecord {
        ParticleRecord {
            id: self.id,
            x: self.x,
            y: self.y,
            base_size: self.base_size,
            generation: self.generation,
            age: self.age,
            lifecycle: self.lifecycle,
            dying: self.dying,
            cluster_seed: self.cluster_seed(),
        }
    }
}

impl Positioned for Particle {
    fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

/// Per-frame display state for one particle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticleRecord {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub base_size: f64,
    pub generation: u32,
    pub age: u32,
    pub lifecycle: f64,
    pub dying: bool,
    pub cluster_seed: u32,
}

/// Size and speed multipliers shared by every particle in a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterProfile {
    pub size: f64,
    pub speed: f64,
}

impl ClusterProfile {
    const PROFILES: [ClusterProfile; CLUSTER_COUNT as usize] = [
        ClusterProfile {
            size: 1.0,
            speed: 1.0,
        },
        ClusterProfile {
            size: 1.35,
            speed: 0.8,
        },
        ClusterProfile {
            size: 0.75,
            speed: 1.25,
        },
        ClusterProfile {
            size: 1.1,
            speed: 0.95,
        },
    ];

    pub fn for_seed(seed: u32) -> Self {
        Self::PROFILES[(seed % CLUSTER_COUNT) as usize]
    }
}

/// Deterministic hash of a particle id.
pub fn cluster_seed(id: u64) -> u32 {
    let folded = (id as u32) ^ ((id >> 32) as u32);
    pcg_hash(folded)
}

/// PCG hash.
fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28).wrapping_add(4))) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_seed_is_deterministic() {
        for id in 0..100 {
            assert_eq!(cluster_seed(id), cluster_seed(id));
        }
    }

    #[test]
    fn test_cluster_profiles_are_all_used() {
        let mut seen = [false; CLUSTER_COUNT as usize];
        for id in 0..256 {
            seen[(cluster_seed(id) % CLUSTER_COUNT) as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn test_alive_and_visible_flags() {
        let mut particle = Particle {
            id: 1,
            x: 0.0,
            y: 0.0,
            vx: 0.0,
            vy: 0.0,
            heading: 0.0,
            generation: 0,
            base_size: 10.0,
            age: 0,
            lifecycle: 0.5,
            dying: false,
            pooled: false,
            phase: 0.0,
        };
        assert!(particle.is_alive() && particle.is_visible());
        particle.dying = true;
        assert!(!particle.is_alive() && particle.is_visible());
        particle.pooled = true;
        assert!(!particle.is_visible());
    }

    #[test]
    fn test_record_carries_display_state() {
        let particle = Particle {
            id: 9,
            x: 3.0,
            y: 4.0,
            vx: 1.0,
            vy: 1.0,
            heading: 0.0,
            generation: 2,
            base_size: 12.0,
            age: 17,
            lifecycle: 0.25,
            dying: true,
            pooled: false,
            phase: 0.0,
        };
        let record = particle.record();
        assert_eq!(record.x, 3.0);
        assert_eq!(record.generation, 2);
        assert_eq!(record.age, 17);
        assert!(record.dying);
        assert_eq!(record.cluster_seed, cluster_seed(9));
    }
}
