//! Curl-noise flow field.
//!
//! The preferred direction at a point is the curl of an OpenSimplex potential,
//! which keeps the flow divergence-free: particles swirl without piling up.

use noise::{NoiseFn, OpenSimplex};

/// Step used for the central differences, in noise space.
const EPSILON: f64 = 1e-3;

#[derive(Debug, Clone, Copy)]
pub struct FlowField {
    simplex: OpenSimplex,
    scale: f64,
    time_scale: f64,
}

impl FlowField {
    /// `scale` is noise cycles per world unit, `time_scale` per second.
    pub fn new(seed: u32, scale: f64, time_scale: f64) -> Self {
        Self {
            simplex: OpenSimplex::new(seed),
            scale,
            time_scale,
        }
    }

    /// Scalar potential in [-1, 1] at world position and time (seconds).
    pub fn potential(&self, x: f64, y: f64, t: f64) -> f64 {
        self.sample(x * self.scale, y * self.scale, t * self.time_scale)
    }

    fn sample(&self, nx: f64, ny: f64, nt: f64) -> f64 {
        let value = self.simplex.get([nx, ny, nt]);
        if value.is_finite() { value } else { 0.0 }
    }

    /// Curl of the potential, `(∂ψ/∂y, -∂ψ/∂x)`, in noise-space units.
    pub fn curl(&self, x: f64, y: f64, t: f64) -> (f64, f64) {
        let nx = x * self.scale;
        let ny = y * self.scale;
        let nt = t * self.time_scale;
        let d_dy = (self.sample(nx, ny + EPSILON, nt) - self.sample(nx, ny - EPSILON, nt))
            / (2.0 * EPSILON);
        let d_dx = (self.sample(nx + EPSILON, ny, nt) - self.sample(nx - EPSILON, ny, nt))
            / (2.0 * EPSILON);
        (d_dy, -d_dx)
    }

    /// Heading (radians) of the flow at a point. Zero where the flow vanishes.
    pub fn angle(&self, x: f64, y: f64, t: f64) -> f64 {
        let (cx, cy) = self.curl(x, y, t);
        if cx == 0.0 && cy == 0.0 {
            return 0.0;
        }
        cy.atan2(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = FlowField::new(7, 0.004, 0.15);
        let b = FlowField::new(7, 0.004, 0.15);
        for i in 0..50 {
            let x = i as f64 * 37.0;
            let y = i as f64 * 11.0;
            assert_eq!(a.curl(x, y, 1.5), b.curl(x, y, 1.5));
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        let a = FlowField::new(1, 0.004, 0.15);
        let b = FlowField::new(2, 0.004, 0.15);
        let differs = (0..50).any(|i| {
            let x = i as f64 * 53.0 + 3.0;
            a.potential(x, x * 0.7, 0.0) != b.potential(x, x * 0.7, 0.0)
        });
        assert!(differs);
    }

    #[test]
    fn test_angle_is_finite_everywhere() {
        let field = FlowField::new(3, 0.004, 0.15);
        for i in 0..200 {
            let x = (i as f64 - 100.0) * 97.0;
            let y = (i as f64) * -41.0;
            let angle = field.angle(x, y, i as f64 * 0.1);
            assert!(angle.is_finite());
            assert!(angle.abs() <= std::f64::consts::PI);
        }
    }

    #[test]
    fn test_curl_is_divergence_free() {
        let field = FlowField::new(11, 1.0, 1.0);
        let h = EPSILON;
        for i in 0..20 {
            let x = i as f64 * 0.37 + 0.1;
            let y = i as f64 * 0.23 + 0.2;
            let (cx_right, _) = field.curl(x + h, y, 0.0);
            let (cx_left, _) = field.curl(x - h, y, 0.0);
            let (_, cy_up) = field.curl(x, y + h, 0.0);
            let (_, cy_down) = field.curl(x, y - h, 0.0);
            let divergence = (cx_right - cx_left) / (2.0 * h) + (cy_up - cy_down) / (2.0 * h);
            assert!(divergence.abs() < 1e-3, "divergence {divergence} at ({x}, {y})");
        }
    }
}
