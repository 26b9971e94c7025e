//! Uniform spatial hash for neighbor candidate queries.
//!
//! Cells hold indices into the caller's particle slice. Queries return the
//! 3×3 block around the query cell, so any particle within `cell_size` of the
//! query point is always included; callers distance-filter the result.

use std::collections::HashMap;

use crate::error::ConfigError;

/// Anything with a 2D position.
pub trait Positioned {
    fn position(&self) -> (f64, f64);
}

impl Positioned for (f64, f64) {
    fn position(&self) -> (f64, f64) {
        *self
    }
}

type CellKey = (i64, i64);

#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<usize>>,
    len: usize,
}

impl SpatialHash {
    pub fn new(cell_size: f64) -> Result<Self, ConfigError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(ConfigError::InvalidCellSize(cell_size));
        }
        Ok(Self {
            cell_size,
            cells: HashMap::new(),
            len: 0,
        })
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn key(&self, x: f64, y: f64) -> CellKey {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// Re-indexes every item from scratch. Non-finite positions are skipped.
    pub fn rebuild<P: Positioned>(&mut self, items: &[P]) {
        self.rebuild_filtered(items, |_| true);
    }

    /// Re-indexes the items accepted by `include`.
    pub fn rebuild_filtered<P: Positioned>(&mut self, items: &[P], include: impl Fn(&P) -> bool) {
        // Cells left empty by the previous frame are dropped, the rest keep
        // their allocation.
        self.cells.retain(|_, bucket| !bucket.is_empty());
        for bucket in self.cells.values_mut() {
            bucket.clear();
        }
        self.len = 0;

        for (index, item) in items.iter().enumerate() {
            if !include(item) {
                continue;
            }
            let (x, y) = item.position();
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            let key = self.key(x, y);
            self.cells.entry(key).or_default().push(index);
            self.len += 1;
        }
    }

    /// Candidate indices from the 3×3 block of cells around `(x, y)`.
    pub fn query_neighbors(&self, x: f64, y: f64) -> Vec<usize> {
        let mut out = Vec::new();
        self.query_into(x, y, &mut out);
        out
    }

    /// Like [`query_neighbors`](Self::query_neighbors), reusing `out`.
    pub fn query_into(&self, x: f64, y: f64, out: &mut Vec<usize>) {
        out.clear();
        if !(x.is_finite() && y.is_finite()) {
            return;
        }
        let (cx, cy) = self.key(x, y);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(bucket) = self.cells.get(&(cx + dx, cy + dy)) {
                    out.extend_from_slice(bucket);
                }
            }
        }
    }
}
