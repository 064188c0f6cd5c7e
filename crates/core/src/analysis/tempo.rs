use std::collections::VecDeque;

use crate::config::TempoConfig;

/// Samples on each side a candidate must dominate to count as a peak.
const PEAK_NEIGHBORS: usize = 2;
/// Half-width of the neighbourhood the onset threshold is measured against.
const NEIGHBORHOOD_SECONDS: f64 = 0.3;
/// Peaks quieter than this are treated as noise floor.
const MIN_ONSET_ENERGY: f32 = 0.01;
/// Tolerated timing error when matching an inter-onset gap to a beat multiple.
const PERIOD_SIGMA_SECONDS: f64 = 0.025;
/// Highest beat multiple an inter-onset gap may span.
const MAX_MULTIPLE: i64 = 4;
const CANDIDATE_STEP_BPM: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct EnergySample {
    time: f64,
    energy: f32,
}

/// Rolling tempo estimate from a per-tick energy envelope.
///
/// Energy is tracked over a sliding window. Onsets are local maxima that
/// exceed their neighbourhood mean by `onset_threshold`. Whenever a new onset
/// lands, every candidate tempo in `[min_bpm, max_bpm]` is scored by how well
/// the pairwise inter-onset gaps line up with multiples of its beat period,
/// and the winner is folded into an exponential moving average. Until the
/// window holds `warmup_seconds` of history the default tempo is reported.
#[derive(Debug, Clone)]
pub struct TempoEstimator {
    config: TempoConfig,
    history: VecDeque<EnergySample>,
    onsets: VecDeque<f64>,
    first_time: Option<f64>,
    last_time: Option<f64>,
    smoothed_bpm: Option<f32>,
}

impl TempoEstimator {
    pub fn new(config: TempoConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            onsets: VecDeque::new(),
            first_time: None,
            last_time: None,
            smoothed_bpm: None,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.onsets.clear();
        self.first_time = None;
        self.last_time = None;
        self.smoothed_bpm = None;
    }

    /// Current tempo: the smoothed estimate once warmed up, the default before.
    pub fn bpm(&self) -> f32 {
        match self.smoothed_bpm {
            Some(bpm) if self.is_warmed_up() => bpm,
            _ => self.config.default_bpm,
        }
    }

    pub fn is_warmed_up(&self) -> bool {
        match (self.first_time, self.last_time) {
            (Some(first), Some(last)) => last - first >= f64::from(self.config.warmup_seconds),
            _ => false,
        }
    }

    /// Onset times currently inside the window.
    pub fn onsets(&self) -> impl Iterator<Item = f64> + '_ {
        self.onsets.iter().copied()
    }

    /// Records the energy at `time` (seconds on the playback clock). Samples
    /// that do not move time forward are ignored.
    pub fn observe(&mut self, time: f64, energy: f32) {
        if !time.is_finite() || self.last_time.is_some_and(|last| time <= last) {
            return;
        }
        let energy = if energy.is_finite() { energy.max(0.0) } else { 0.0 };

        self.first_time.get_or_insert(time);
        self.last_time = Some(time);
        self.history.push_back(EnergySample { time, energy });

        let horizon = time - f64::from(self.config.window_seconds);
        while self.history.front().is_some_and(|s| s.time < horizon) {
            self.history.pop_front();
        }
        while self.onsets.front().is_some_and(|&t| t < horizon) {
            self.onsets.pop_front();
        }

        if let Some(onset) = self.detect_onset() {
            self.onsets.push_back(onset);
            if self.is_warmed_up() {
                self.update_estimate();
            }
        }
    }

    /// Checks the sample `PEAK_NEIGHBORS` back, now that its right-hand
    /// neighbours have arrived.
    fn detect_onset(&self) -> Option<f64> {
        let len = self.history.len();
        if len < 2 * PEAK_NEIGHBORS + 1 {
            return None;
        }
        let c = len - 1 - PEAK_NEIGHBORS;
        let center = self.history[c];
        if center.energy < MIN_ONSET_ENERGY {
            return None;
        }

        let dominates_left = (c - PEAK_NEIGHBORS..c).all(|i| self.history[i].energy < center.energy);
        let dominates_right = (c + 1..len).all(|i| self.history[i].energy <= center.energy);
        if !dominates_left || !dominates_right {
            return None;
        }

        let (sum, count) = self
            .history
            .iter()
            .filter(|s| (s.time - center.time).abs() <= NEIGHBORHOOD_SECONDS)
            .fold((0.0f32, 0usize), |(sum, count), s| (sum + s.energy, count + 1));
        let local_mean = sum / count.max(1) as f32;
        if center.energy <= local_mean * (1.0 + self.config.onset_threshold) {
            return None;
        }

        let spaced = self
            .onsets
            .back()
            .map_or(true, |&last| center.time - last >= f64::from(self.config.min_onset_interval));
        spaced.then_some(center.time)
    }

    fn update_estimate(&mut self) {
        let Some(raw) = self.raw_estimate() else {
            return;
        };
        let decay = self.config.ema_decay;
        let next = match self.smoothed_bpm {
            Some(prev) => decay * prev + (1.0 - decay) * raw,
            None => raw,
        };
        tracing::trace!(raw, smoothed = next, onsets = self.onsets.len(), "tempo estimate");
        self.smoothed_bpm = Some(next);
    }

    /// Best-scoring candidate tempo, refined by parabolic interpolation.
    fn raw_estimate(&self) -> Option<f32> {
        if self.onsets.len() < 3 {
            return None;
        }
        let onsets: Vec<f64> = self.onsets.iter().copied().collect();

        let steps = ((self.config.max_bpm - self.config.min_bpm) / CANDIDATE_STEP_BPM).floor() as usize;
        let scores: Vec<f64> = (0..=steps)
            .map(|i| periodicity_score(&onsets, self.config.min_bpm + i as f32 * CANDIDATE_STEP_BPM))
            .collect();

        let (best, &best_score) = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        if best_score <= f64::EPSILON {
            return None;
        }

        let mut offset = 0.0;
        if best > 0 && best < steps {
            let (l, c, r) = (scores[best - 1], best_score, scores[best + 1]);
            let denom = l - 2.0 * c + r;
            if denom.abs() > f64::EPSILON {
                offset = (0.5 * (l - r) / denom).clamp(-0.5, 0.5);
            }
        }
        let bpm = self.config.min_bpm + (best as f32 + offset as f32) * CANDIDATE_STEP_BPM;
        Some(bpm.clamp(self.config.min_bpm, self.config.max_bpm))
    }
}

/// Sum over onset pairs of how closely their gap matches a whole number of
/// beats at `bpm`. Longer multiples count for less, so the true tempo beats
/// its sub-harmonics.
fn periodicity_score(onsets: &[f64], bpm: f32) -> f64 {
    let period = 60.0 / f64::from(bpm);
    let mut score = 0.0;
    for (i, &a) in onsets.iter().enumerate() {
        for &b in &onsets[i + 1..] {
            let beats = (b - a) / period;
            let k = beats.round() as i64;
            if !(1..=MAX_MULTIPLE).contains(&k) {
                continue;
            }
            let deviation = (beats - k as f64) * period / PERIOD_SIGMA_SECONDS;
            score += (-0.5 * deviation * deviation).exp() / k as f64;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: f64 = 1.0 / 60.0;

    /// Feeds a 60 Hz energy envelope with a pulse every `ticks_per_beat`.
    fn feed_pulses(estimator: &mut TempoEstimator, ticks_per_beat: usize, seconds: f64) {
        let ticks = (seconds / TICK) as usize;
        for n in 0..ticks {
            let energy = if n % ticks_per_beat == 0 { 0.9 } else { 0.05 };
            estimator.observe(n as f64 * TICK, energy);
        }
    }

    #[test]
    fn reports_default_during_warm_up() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        feed_pulses(&mut estimator, 36, 1.9);
        assert!(!estimator.is_warmed_up());
        assert_eq!(estimator.bpm(), 120.0);
    }

    #[test]
    fn locks_onto_a_steady_pulse_train() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        feed_pulses(&mut estimator, 36, 6.0);
        let bpm = estimator.bpm();
        assert!((bpm - 100.0).abs() < 1.0, "expected ~100 BPM, got {bpm}");
    }

    #[test]
    fn prefers_the_beat_over_its_half_tempo() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        feed_pulses(&mut estimator, 30, 6.0);
        let bpm = estimator.bpm();
        assert!((bpm - 120.0).abs() < 1.0, "expected ~120 BPM, got {bpm}");
    }

    #[test]
    fn moving_average_damps_tempo_changes() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        estimator.smoothed_bpm = Some(100.0);
        estimator.onsets = (0..8).map(|i| i as f64 * 0.5).collect();

        estimator.update_estimate();

        // 0.8 * 100 + 0.2 * 120
        let bpm = estimator.smoothed_bpm.unwrap();
        assert!((bpm - 104.0).abs() < 0.3, "expected ~104 BPM, got {bpm}");
    }

    #[test]
    fn silence_keeps_the_default() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        for n in 0..600 {
            estimator.observe(n as f64 * TICK, 0.0);
        }
        assert!(estimator.is_warmed_up());
        assert_eq!(estimator.onsets().count(), 0);
        assert_eq!(estimator.bpm(), 120.0);
    }

    #[test]
    fn ignores_time_going_backwards() {
        let mut estimator = TempoEstimator::new(TempoConfig::default());
        estimator.observe(1.0, 0.5);
        estimator.observe(0.5, 0.9);
        estimator.observe(1.0, 0.9);
        assert_eq!(estimator.history.len(), 1);
    }

    #[test]
    fn scoring_favours_the_true_period() {
        let onsets: Vec<f64> = (0..8).map(|i| i as f64 * 0.5).collect();
        assert!(periodicity_score(&onsets, 120.0) > periodicity_score(&onsets, 60.0));
        assert!(periodicity_score(&onsets, 120.0) > periodicity_score(&onsets, 180.0));
        assert!(periodicity_score(&onsets, 120.0) > periodicity_score(&onsets, 126.0));
    }
}
