use std::sync::atomic::{AtomicU32, Ordering};

/// Band levels measured from the latest analysis window.
/// Minimal, numeric only, each in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandLevels {
    pub amplitude: f32,
    pub bass: f32,
    pub mid: f32,
    pub treble: f32,
}

impl BandLevels {
    /// Clamps every level to [0, 1]; non-finite values become 0.
    pub fn clamped(self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            amplitude: clamp(self.amplitude),
            bass: clamp(self.bass),
            mid: clamp(self.mid),
            treble: clamp(self.treble),
        }
    }
}

/// Thread-safe shared band levels using atomics.
/// Written by the analysis thread, read once per render frame.
#[derive(Debug)]
pub struct SharedLevels {
    amplitude: AtomicU32,
    bass: AtomicU32,
    mid: AtomicU32,
    treble: AtomicU32,
}

impl Default for SharedLevels {
    fn default() -> Self {
        Self::new(BandLevels::default())
    }
}

impl SharedLevels {
    pub fn new(initial: BandLevels) -> Self {
        Self {
            amplitude: AtomicU32::new(initial.amplitude.to_bits()),
            bass: AtomicU32::new(initial.bass.to_bits()),
            mid: AtomicU32::new(initial.mid.to_bits()),
            treble: AtomicU32::new(initial.treble.to_bits()),
        }
    }

    pub fn set(&self, levels: BandLevels) {
        let levels = levels.clamped();
        self.amplitude
            .store(levels.amplitude.to_bits(), Ordering::Relaxed);
        self.bass.store(levels.bass.to_bits(), Ordering::Relaxed);
        self.mid.store(levels.mid.to_bits(), Ordering::Relaxed);
        self.treble.store(levels.treble.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> BandLevels {
        BandLevels {
            amplitude: f32::from_bits(self.amplitude.load(Ordering::Relaxed)),
            bass: f32::from_bits(self.bass.load(Ordering::Relaxed)),
            mid: f32::from_bits(self.mid.load(Ordering::Relaxed)),
            treble: f32::from_bits(self.treble.load(Ordering::Relaxed)),
        }
    }
}
