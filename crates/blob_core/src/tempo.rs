//! Tempo smoothing for an external, asynchronous beat detector.
//!
//! Detector reports are queued in an inbox and applied on the next analyzer
//! update, so they follow the same per-frame ordering as every other input.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TempoConfig;
use crate::error::DetectorError;

/// A report from the tempo detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TempoEvent {
    /// Candidate tempo with the number of intervals supporting it.
    Candidate { tempo: f64, support_count: u32 },
    /// The detector considers its current estimate settled.
    Stable { tempo: f64 },
}

/// What happened to a single tempo event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempoOutcome {
    Accepted,
    /// Too far from an established estimate (likely an octave error).
    Rejected,
    /// Out of range, non-finite, or the detector has failed.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct TempoTracker {
    config: TempoConfig,
    inbox: VecDeque<TempoEvent>,
    pending: Option<f64>,
    published: f64,
    confidence: f64,
    last_publish_ms: Option<f64>,
    silent_ms: f64,
    failure: Option<DetectorError>,
}

impl TempoTracker {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            published: config.default_tempo,
            config,
            inbox: VecDeque::new(),
            pending: None,
            confidence: 0.0,
            last_publish_ms: None,
            silent_ms: 0.0,
            failure: None,
        }
    }

    /// Queues a detector report for the next update.
    pub fn enqueue(&mut self, event: TempoEvent) {
        self.inbox.push_back(event);
    }

    /// Applies every queued report, then publishes if the rate limit allows.
    pub fn drain(&mut self, now_ms: f64) {
        while let Some(event) = self.inbox.pop_front() {
            self.apply(event, now_ms);
        }
        self.maybe_publish(now_ms);
    }

    /// Applies one report immediately.
    pub fn apply(&mut self, event: TempoEvent, now_ms: f64) -> TempoOutcome {
        if self.failure.is_some() {
            return TempoOutcome::Ignored;
        }
        match event {
            TempoEvent::Candidate {
                tempo,
                support_count,
            } => self.apply_candidate(tempo, support_count),
            TempoEvent::Stable { tempo } => self.apply_stable(tempo, now_ms),
        }
    }

    fn in_range(&self, tempo: f64) -> bool {
        tempo.is_finite() && (self.config.min_tempo..=self.config.max_tempo).contains(&tempo)
    }

    fn apply_candidate(&mut self, tempo: f64, support_count: u32) -> TempoOutcome {
        if !self.in_range(tempo) {
            return TempoOutcome::Ignored;
        }
        if let Some(pending) = self.pending {
            let established = self.confidence > self.config.established_confidence;
            if established && (tempo - pending).abs() > self.config.jump_threshold {
                debug!(
                    "Rejected tempo candidate {:.1} (pending {:.1}, confidence {:.2})",
                    tempo, pending, self.confidence
                );
                return TempoOutcome::Rejected;
            }
        }

        let weight = self.config.prior_weight;
        self.pending = Some(match self.pending {
            Some(pending) => pending * weight + tempo * (1.0 - weight),
            None => tempo,
        });

        let target = (support_count as f64 / self.config.full_support).clamp(0.0, 1.0);
        self.confidence += (target - self.confidence) * self.config.confidence_smoothing;
        self.confidence = self.confidence.clamp(0.0, 1.0);
        TempoOutcome::Accepted
    }

    fn apply_stable(&mut self, tempo: f64, now_ms: f64) -> TempoOutcome {
        if !self.in_range(tempo) {
            return TempoOutcome::Ignored;
        }
        let weight = self.config.stable_weight;
        let blended = match self.pending {
            Some(pending) => pending * (1.0 - weight) + tempo * weight,
            None => tempo,
        };
        self.pending = Some(blended);
        self.confidence = (self.confidence + self.config.stable_confidence_boost).clamp(0.0, 1.0);
        self.publish(blended, now_ms);
        info!("Tempo stabilized at {:.1} BPM", blended);
        TempoOutcome::Accepted
    }

    fn maybe_publish(&mut self, now_ms: f64) {
        let Some(pending) = self.pending else {
            return;
        };
        if (pending - self.published).abs() < 1e-9 {
            return;
        }
        let due = match self.last_publish_ms {
            Some(last) => now_ms - last >= self.config.publish_interval_ms,
            None => true,
        };
        if due {
            self.publish(pending, now_ms);
        }
    }

    fn publish(&mut self, tempo: f64, now_ms: f64) {
        self.published = tempo;
        self.last_publish_ms = Some(now_ms);
    }

    /// Silence bookkeeping, called once per analyzer tick.
    pub fn on_tick(&mut self, amplitude: f64, tick_ms: f64) {
        if amplitude < self.config.silence_floor {
            self.silent_ms += tick_ms;
        } else {
            self.silent_ms = 0.0;
        }
        if self.silent_ms < self.config.silence_hold_ms {
            return;
        }

        self.confidence *= 1.0 - self.config.silence_confidence_decay;
        let neutral = self.config.default_tempo;
        let relax = self.config.silence_tempo_relax;
        self.published += (neutral - self.published) * relax;
        if let Some(pending) = self.pending.as_mut() {
            *pending += (neutral - *pending) * relax;
        }
    }

    /// Pins the tracker to its neutral state for the rest of the session.
    pub fn fail(&mut self, error: DetectorError) {
        warn!("{}; continuing without tempo", error);
        self.failure = Some(error);
        self.inbox.clear();
        self.pending = None;
        self.confidence = 0.0;
        self.published = self.config.default_tempo;
    }

    pub fn tempo(&self) -> f64 {
        self.published
    }

    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn failure(&self) -> Option<&DetectorError> {
        self.failure.as_ref()
    }

    /// Published tempo rescaled between the calm and energetic reference BPM.
    pub fn normalized(&self) -> f64 {
        let span = self.config.energetic_bpm - self.config.calm_bpm;
        ((self.published - self.config.calm_bpm) / span).clamp(0.0, 1.0)
    }
}
