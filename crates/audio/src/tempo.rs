use std::collections::VecDeque;
use tracing::debug;

/// A report for the engine's tempo tracker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TempoReport {
    /// Best tempo from the inter-onset histogram and the votes behind it.
    Candidate { tempo: f32, support_count: u32 },
    /// Several consecutive candidates agreed.
    Stable { tempo: f32 },
}

#[derive(Clone, Debug)]
pub struct DetectorConfig {
    /// Onset when bass exceeds the running average by this factor
    pub onset_ratio: f32,
    /// Bass level below which nothing counts as an onset
    pub min_level: f32,
    /// Minimum time between onsets (seconds)
    pub refractory_secs: f64,
    /// Running average length in analysis steps
    pub history_len: usize,
    /// Onset timestamps kept for the histogram
    pub max_onsets: usize,
    /// Onsets needed before the first candidate
    pub min_onsets: usize,
    /// Intervals up to this many onsets apart vote
    pub max_span: usize,
    /// Candidates are folded into this BPM range
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Candidates within this many BPM agree
    pub agree_bpm: f32,
    /// Agreeing candidates needed for a stable report
    pub stable_after: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            onset_ratio: 1.5,
            min_level: 0.05,
            refractory_secs: 0.2,
            history_len: 43,
            max_onsets: 32,
            min_onsets: 4,
            max_span: 4,
            min_bpm: 60.0,
            max_bpm: 200.0,
            agree_bpm: 2.0,
            stable_after: 8,
        }
    }
}

/// Bass-onset tempo estimator.
///
/// Onsets are bass spikes against a running average. Every onset rebuilds a
/// one-BPM histogram from the intervals between recent onsets, each interval
/// also voting as a fraction of a longer span so missed beats still count.
pub struct OnsetTempoDetector {
    config: DetectorConfig,
    history: VecDeque<f32>,
    onsets: VecDeque<f64>,
    last_candidate: Option<f32>,
    agreeing: u32,
}

impl Default for OnsetTempoDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl OnsetTempoDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_len),
            onsets: VecDeque::with_capacity(config.max_onsets),
            config,
            last_candidate: None,
            agreeing: 0,
        }
    }

    /// Feeds one bass level taken at `timestamp` (seconds).
    pub fn process(&mut self, bass: f32, timestamp: f64) -> Vec<TempoReport> {
        let bass = if bass.is_finite() { bass.max(0.0) } else { 0.0 };
        let average = if self.history.is_empty() {
            0.0
        } else {
            self.history.iter().sum::<f32>() / self.history.len() as f32
        };
        if self.history.len() == self.config.history_len.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(bass);

        let cooled = self
            .onsets
            .back()
            .is_none_or(|last| timestamp - last >= self.config.refractory_secs);
        let onset = bass >= self.config.min_level
            && bass > average * self.config.onset_ratio
            && cooled;
        if !onset {
            return Vec::new();
        }

        if self.onsets.len() == self.config.max_onsets.max(2) {
            self.onsets.pop_front();
        }
        self.onsets.push_back(timestamp);
        if self.onsets.len() < self.config.min_onsets {
            return Vec::new();
        }

        let Some((tempo, support_count)) = self.estimate() else {
            return Vec::new();
        };
        let mut reports = vec![TempoReport::Candidate {
            tempo,
            support_count,
        }];

        let agrees = self
            .last_candidate
            .is_some_and(|last| (last - tempo).abs() <= self.config.agree_bpm);
        self.agreeing = if agrees { self.agreeing + 1 } else { 1 };
        self.last_candidate = Some(tempo);
        if self.agreeing == self.config.stable_after {
            debug!("Tempo settled at {:.1} BPM", tempo);
            reports.push(TempoReport::Stable { tempo });
        }
        reports
    }

    /// Histogram peak over folded inter-onset intervals.
    fn estimate(&self) -> Option<(f32, u32)> {
        let min_bpm = self.config.min_bpm;
        let max_bpm = self.config.max_bpm;
        if !(min_bpm > 0.0 && max_bpm > min_bpm * 2.0) {
            return None;
        }
        let mut votes = vec![0u32; max_bpm as usize + 2];
        let onsets: Vec<f64> = self.onsets.iter().copied().collect();

        for (i, &start) in onsets.iter().enumerate() {
            for span in 1..=self.config.max_span {
                let Some(&end) = onsets.get(i + span) else {
                    break;
                };
                let interval = (end - start) / span as f64;
                if !(interval.is_finite() && interval > 0.0) {
                    continue;
                }
                let Some(bpm) = fold(60.0 / interval as f32, min_bpm, max_bpm) else {
                    continue;
                };
                votes[bpm.round() as usize] += 1;
            }
        }

        // Best three-bin window, reported as its weighted centre.
        let (centre, support) = (1..votes.len() - 1)
            .map(|b| (b, votes[b - 1] + votes[b] + votes[b + 1]))
            .max_by_key(|&(_, support)| support)?;
        if support == 0 {
            return None;
        }
        let weighted: f32 = (centre - 1..=centre + 1)
            .map(|b| b as f32 * votes[b] as f32)
            .sum();
        Some((weighted / support as f32, support))
    }

    pub fn onset_count(&self) -> usize {
        self.onsets.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.onsets.clear();
        self.last_candidate = None;
        self.agreeing = 0;
    }
}

/// Doubles or halves `bpm` into `[min, max)`.
fn fold(mut bpm: f32, min: f32, max: f32) -> Option<f32> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return None;
    }
    while bpm < min {
        bpm *= 2.0;
    }
    while bpm >= max {
        bpm /= 2.0;
    }
    Some(bpm)
}
