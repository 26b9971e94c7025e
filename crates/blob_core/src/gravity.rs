//! Density-derived attraction points.
//!
//! Detection runs periodically and produces target centers; the actual
//! centers used for forces chase those targets every frame so the pull never
//! jumps when detection changes its mind.

use serde::Serialize;

use crate::config::GravityConfig;

/// An attraction point with a strength in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GravityCenter {
    pub x: f64,
    pub y: f64,
    pub strength: f64,
}

/// An actual center and the target it is chasing.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TrackedCenter {
    current: GravityCenter,
    target: GravityCenter,
}

/// Viewport dimensions in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    /// Non-finite or sub-unit dimensions are clamped to 1.
    pub fn new(width: f64, height: f64) -> Self {
        let clamp = |v: f64| if v.is_finite() { v.max(1.0) } else { 1.0 };
        Self {
            width: clamp(width),
            height: clamp(height),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.width * 0.5, self.height * 0.5)
    }

    pub fn diagonal(&self) -> f64 {
        self.width.hypot(self.height)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

#[derive(Debug, Clone)]
pub struct GravityTracker {
    config: GravityConfig,
    targets: Vec<GravityCenter>,
    centers: Vec<TrackedCenter>,
    since_detect_ms: f64,
}

impl GravityTracker {
    pub fn new(config: GravityConfig) -> Self {
        Self {
            // Detect on the first update.
            since_detect_ms: config.detect_interval_ms,
            config,
            targets: Vec::new(),
            centers: Vec::new(),
        }
    }

    /// Latest detection result.
    pub fn targets(&self) -> &[GravityCenter] {
        &self.targets
    }

    /// Smoothed centers currently applied as forces.
    pub fn centers(&self) -> Vec<GravityCenter> {
        self.centers.iter().map(|c| c.current).collect()
    }

    /// Runs detection when due.
    pub fn update_targets(
        &mut self,
        dt_ms: f64,
        positions: impl Iterator<Item = (f64, f64)>,
        viewport: Viewport,
    ) {
        self.since_detect_ms += dt_ms.max(0.0);
        if self.since_detect_ms < self.config.detect_interval_ms {
            return;
        }
        self.since_detect_ms = 0.0;
        self.targets = self.detect(positions, viewport);
        self.retarget(viewport);
    }

    /// Finds the densest coarse-grid cells and returns their centroids.
    pub fn detect(
        &self,
        positions: impl Iterator<Item = (f64, f64)>,
        viewport: Viewport,
    ) -> Vec<GravityCenter> {
        let divisions = self.config.grid_divisions.max(1);
        let cell_w = viewport.width / divisions as f64;
        let cell_h = viewport.height / divisions as f64;
        // (count, sum_x, sum_y) per cell
        let mut cells = vec![(0usize, 0.0f64, 0.0f64); divisions * divisions];
        let mut total = 0usize;

        for (x, y) in positions {
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            if x < 0.0 || y < 0.0 || x >= viewport.width || y >= viewport.height {
                continue;
            }
            let col = ((x / cell_w) as usize).min(divisions - 1);
            let row = ((y / cell_h) as usize).min(divisions - 1);
            let cell = &mut cells[row * divisions + col];
            cell.0 += 1;
            cell.1 += x;
            cell.2 += y;
            total += 1;
        }

        let mut dense: Vec<_> = cells
            .into_iter()
            .filter(|(count, _, _)| *count >= self.config.min_occupancy.max(1))
            .collect();
        dense.sort_by(|a, b| b.0.cmp(&a.0));
        dense.truncate(self.config.max_centers);

        dense
            .into_iter()
            .map(|(count, sum_x, sum_y)| GravityCenter {
                x: sum_x / count as f64,
                y: sum_y / count as f64,
                strength: (count as f64 / total.max(1) as f64 * self.config.strength_scale)
                    .clamp(0.0, 1.0),
            })
            .collect()
    }

    /// Pairs fresh targets with existing centers by proximity.
    fn retarget(&mut self, viewport: Viewport) {
        let match_radius = self.config.match_radius * viewport.diagonal();
        let mut claimed = vec![false; self.centers.len()];

        for center in &mut self.centers {
            center.target = GravityCenter {
                strength: 0.0,
                ..center.current
            };
        }

        for target in &self.targets {
            let nearest = self
                .centers
                .iter()
                .enumerate()
                .filter(|(i, _)| !claimed[*i])
                .map(|(i, c)| (i, (c.current.x - target.x).hypot(c.current.y - target.y)))
                .filter(|(_, dist)| *dist <= match_radius)
                .min_by(|a, b| a.1.total_cmp(&b.1));

            match nearest {
                Some((i, _)) => {
                    claimed[i] = true;
                    self.centers[i].target = *target;
                }
                None => {
                    claimed.push(true);
                    self.centers.push(TrackedCenter {
                        current: GravityCenter {
                            strength: 0.0,
                            ..*target
                        },
                        target: *target,
                    });
                }
            }
        }
    }

    /// Moves every actual center toward its target. Frame-rate independent.
    pub fn interpolate(&mut self, dt_ms: f64) {
        let frames = (dt_ms.max(0.0) / (1000.0 / 60.0)).min(60.0);
        let alpha = 1.0 - (1.0 - self.config.lerp_rate).powf(frames);
        for center in &mut self.centers {
            let c = &mut center.current;
            let t = center.target;
            c.x += (t.x - c.x) * alpha;
            c.y += (t.y - c.y) * alpha;
            c.strength += (t.strength - c.strength) * alpha;
        }
        let drop = self.config.drop_strength;
        self.centers
            .retain(|c| !(c.target.strength == 0.0 && c.current.strength < drop));
    }

    /// Acceleration (world units/s²) toward density centers and the fixed
    /// viewport-center anchor.
    pub fn acceleration_at(
        &self,
        x: f64,
        y: f64,
        viewport: Viewport,
        intensity: f64,
    ) -> (f64, f64) {
        let c = &self.config;
        let mut ax = 0.0;
        let mut ay = 0.0;

        for center in &self.centers {
            let (dx, dy) = pull(
                x,
                y,
                center.current.x,
                center.current.y,
                c.center_pull * center.current.strength,
                c.pull_softening,
            );
            ax += dx;
            ay += dy;
        }

        let intensity = if intensity.is_finite() {
            intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let anchor =
            c.anchor_pull_calm + (c.anchor_pull_energetic - c.anchor_pull_calm) * intensity;
        let (cx, cy) = viewport.center();
        let (dx, dy) = pull(x, y, cx, cy, anchor, c.pull_softening);
        (ax + dx, ay + dy)
    }
}

/// Pull of magnitude `peak · d / (d + softening)` toward `(tx, ty)`.
fn pull(x: f64, y: f64, tx: f64, ty: f64, peak: f64, softening: f64) -> (f64, f64) {
    let dx = tx - x;
    let dy = ty - y;
    let dist = dx.hypot(dy);
    if dist < 1e-6 || !dist.is_finite() {
        return (0.0, 0.0);
    }
    let magnitude = peak * dist / (dist + softening.max(1e-6));
    (dx / dist * magnitude, dy / dist * magnitude)
}
