//! Input-side audio: device capture, band levels and tempo detection.

pub mod capture;
pub mod features;
pub mod levels;
pub mod tempo;
