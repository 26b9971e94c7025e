//! Per-frame output handed to rendering and debug consumers.

use crate::analyzer::AnalyzerSnapshot;
use crate::field::ParticleField;
use crate::gravity::{GravityCenter, Viewport};
use crate::particle::ParticleRecord;

/// Engine state to share outwardly at the end of a frame.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct FrameSnapshot {
    frame: u64,
    elapsed_ms: f64,
    analyzer: AnalyzerSnapshot,
    particles: Vec<ParticleRecord>,
    alive: usize,
    visible: usize,
    gravity_centers: Vec<GravityCenter>,
    viewport: Viewport,
}

impl FrameSnapshot {
    /// Captures the field together with the analyzer view it was driven by.
    pub fn capture(field: &ParticleField, analyzer: AnalyzerSnapshot) -> Self {
        Self {
            frame: field.frame(),
            elapsed_ms: field.elapsed_ms(),
            analyzer,
            particles: field.records(),
            alive: field.alive_count(),
            visible: field.visible_count(),
            gravity_centers: field.gravity_centers(),
            viewport: field.viewport(),
        }
    }

    // Getters
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_ms
    }

    pub fn analyzer(&self) -> &AnalyzerSnapshot {
        &self.analyzer
    }

    pub fn particles(&self) -> &[ParticleRecord] {
        &self.particles
    }

    pub fn alive(&self) -> usize {
        self.alive
    }

    pub fn visible(&self) -> usize {
        self.visible
    }

    pub fn gravity_centers(&self) -> &[GravityCenter] {
        &self.gravity_centers
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }
}
