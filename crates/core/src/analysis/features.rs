use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::spectral::CEPSTRAL_COEFFS;

/// Per-tick descriptors kept for the rolling statistics.
const HISTORY_LEN: usize = 600;

/// Composite description of the recent audio, handed to the poetry generator.
///
/// Means and variances cover the last few seconds of snapshots; `tempo` is
/// the current smoothed estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub tempo: f32,
    /// Mean RMS energy in `[0, 1]`.
    pub energy: f32,
    pub energy_variance: f32,
    /// Mean spectral centroid in Hz.
    pub spectral_centroid: f32,
    pub spectral_centroid_variance: f32,
    /// Mean 85% rolloff frequency in Hz.
    pub spectral_rolloff: f32,
    pub zero_crossing_rate: f32,
    pub mfcc_mean: [f32; CEPSTRAL_COEFFS],
    pub mfcc_variance: [f32; CEPSTRAL_COEFFS],
    pub key: PitchClass,
    pub valence: f32,
    pub intensity: f32,
    pub complexity: f32,
    pub mood: Mood,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl PitchClass {
    const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    /// Natural notes read as major keys, accidentals as minor.
    pub fn is_major(self) -> bool {
        matches!(
            self,
            PitchClass::C
                | PitchClass::D
                | PitchClass::E
                | PitchClass::F
                | PitchClass::G
                | PitchClass::A
                | PitchClass::B
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Energetic,
    Intense,
    Upbeat,
    Dramatic,
    Calm,
    Melancholic,
    Moderate,
    Contemplative,
}

impl Mood {
    pub fn classify(tempo: f32, energy: f32, major: bool) -> Self {
        let pick = |if_major, if_minor| if major { if_major } else { if_minor };
        if tempo > 140.0 && energy > 0.15 {
            pick(Mood::Energetic, Mood::Intense)
        } else if tempo > 100.0 && energy > 0.1 {
            pick(Mood::Upbeat, Mood::Dramatic)
        } else if tempo < 80.0 {
            pick(Mood::Calm, Mood::Melancholic)
        } else {
            pick(Mood::Moderate, Mood::Contemplative)
        }
    }
}

/// Emotional positivity in `[0, 1]`.
pub fn valence(major: bool, tempo: f32, energy: f32) -> f32 {
    let base = if major { 0.4 } else { 0.2 };
    (base + tempo_factor(tempo) * 0.3 + energy_factor(energy) * 0.3).clamp(0.0, 1.0)
}

pub fn intensity(tempo: f32, energy: f32) -> f32 {
    (energy_factor(energy) * 0.6 + tempo_factor(tempo) * 0.4).clamp(0.0, 1.0)
}

/// Spread of brightness and timbre over time, in `[0, 1]`.
///
/// `mfcc_spread` is the variance over every cepstral value in the history,
/// across coefficients as well as across snapshots.
pub fn complexity(centroid_variance: f32, mfcc_spread: f32) -> f32 {
    let spectral = (centroid_variance / 1_000_000.0).min(1.0);
    let timbral = (mfcc_spread / 100.0).min(1.0);
    (spectral * 0.5 + timbral * 0.5).clamp(0.0, 1.0)
}

fn tempo_factor(tempo: f32) -> f32 {
    (tempo / 180.0).clamp(0.0, 1.0)
}

fn energy_factor(energy: f32) -> f32 {
    (energy * 10.0).clamp(0.0, 1.0)
}

/// Descriptors of a single snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DescriptorSample {
    pub energy: f32,
    pub centroid: f32,
    pub rolloff: f32,
    pub zcr: f32,
    pub mfcc: [f32; CEPSTRAL_COEFFS],
    pub chroma: [f32; 12],
}

/// Bounded history of snapshot descriptors.
#[derive(Debug, Clone, Default)]
pub(crate) struct FeatureHistory {
    samples: VecDeque<DescriptorSample>,
}

impl FeatureHistory {
    pub fn push(&mut self, sample: DescriptorSample) {
        if self.samples.len() == HISTORY_LEN {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Folds the history (or `current` when empty) into a feature vector.
    pub fn summarize(&self, current: DescriptorSample, tempo: f32) -> FeatureVector {
        let fallback = [current];
        let samples: Vec<&DescriptorSample> = if self.samples.is_empty() {
            fallback.iter().collect()
        } else {
            self.samples.iter().collect()
        };

        let (energy, energy_variance) = mean_variance(samples.iter().map(|s| s.energy));
        let (centroid, centroid_variance) = mean_variance(samples.iter().map(|s| s.centroid));
        let (rolloff, _) = mean_variance(samples.iter().map(|s| s.rolloff));
        let (zcr, _) = mean_variance(samples.iter().map(|s| s.zcr));

        let mut mfcc_mean = [0.0f32; CEPSTRAL_COEFFS];
        let mut mfcc_variance = [0.0f32; CEPSTRAL_COEFFS];
        for k in 0..CEPSTRAL_COEFFS {
            let (mean, var) = mean_variance(samples.iter().map(|s| s.mfcc[k]));
            mfcc_mean[k] = mean;
            mfcc_variance[k] = var;
        }

        let (_, mfcc_spread) =
            mean_variance(samples.iter().flat_map(|s| s.mfcc.iter().copied()));

        let mut chroma = [0.0f32; 12];
        for s in &samples {
            for (acc, v) in chroma.iter_mut().zip(s.chroma.iter()) {
                *acc += v;
            }
        }
        let key_index = chroma
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i)
            .unwrap_or(0);
        let key = PitchClass::from_index(key_index);
        let major = key.is_major();

        FeatureVector {
            tempo,
            energy,
            energy_variance,
            spectral_centroid: centroid,
            spectral_centroid_variance: centroid_variance,
            spectral_rolloff: rolloff,
            zero_crossing_rate: zcr,
            mfcc_mean,
            mfcc_variance,
            key,
            valence: valence(major, tempo, energy),
            intensity: intensity(tempo, energy),
            complexity: complexity(centroid_variance, mfcc_spread),
            mood: Mood::classify(tempo, energy, major),
        }
    }
}

fn mean_variance(values: impl Iterator<Item = f32> + Clone) -> (f32, f32) {
    let (sum, count) = values.clone().fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f32;
    let var = values.map(|v| (v - mean) * (v - mean)).sum::<f32>() / count as f32;
    (mean, var)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mood_follows_tempo_energy_and_mode() {
        assert_eq!(Mood::classify(150.0, 0.2, true), Mood::Energetic);
        assert_eq!(Mood::classify(150.0, 0.2, false), Mood::Intense);
        assert_eq!(Mood::classify(120.0, 0.12, true), Mood::Upbeat);
        assert_eq!(Mood::classify(120.0, 0.12, false), Mood::Dramatic);
        assert_eq!(Mood::classify(70.0, 0.5, true), Mood::Calm);
        assert_eq!(Mood::classify(70.0, 0.5, false), Mood::Melancholic);
        assert_eq!(Mood::classify(90.0, 0.05, true), Mood::Moderate);
        assert_eq!(Mood::classify(90.0, 0.05, false), Mood::Contemplative);
    }

    #[test]
    fn derived_scores_stay_in_unit_range() {
        assert_eq!(valence(true, 400.0, 5.0), 1.0);
        assert!((valence(false, 90.0, 0.05) - (0.2 + 0.15 + 0.15)).abs() < 1e-6);
        assert!((intensity(180.0, 0.1) - 1.0).abs() < 1e-6);
        assert_eq!(complexity(0.0, 0.0), 0.0);
        assert_eq!(complexity(5e6, 500.0), 1.0);
    }

    #[test]
    fn summary_uses_history_statistics() {
        let mut history = FeatureHistory::default();
        for energy in [0.1, 0.3] {
            let mut chroma = [0.0; 12];
            chroma[7] = 1.0;
            history.push(DescriptorSample {
                energy,
                centroid: 1_000.0,
                chroma,
                ..DescriptorSample::default()
            });
        }

        let features = history.summarize(DescriptorSample::default(), 128.0);
        assert!((features.energy - 0.2).abs() < 1e-6);
        assert!((features.energy_variance - 0.01).abs() < 1e-6);
        assert_eq!(features.spectral_centroid, 1_000.0);
        assert_eq!(features.key, PitchClass::G);
        assert_eq!(features.mood, Mood::Upbeat);
    }

    #[test]
    fn complexity_counts_spread_between_coefficients() {
        let mut mfcc = [0.0f32; CEPSTRAL_COEFFS];
        for (k, c) in mfcc.iter_mut().enumerate() {
            *c = if k % 2 == 0 { -10.0 } else { 10.0 };
        }
        let mut history = FeatureHistory::default();
        for _ in 0..4 {
            history.push(DescriptorSample {
                mfcc,
                ..DescriptorSample::default()
            });
        }

        let features = history.summarize(DescriptorSample::default(), 120.0);
        assert!(features.mfcc_variance.iter().all(|&v| v == 0.0));
        // 13 values of ±10 with one more -10 than +10: variance 100 - (10/13)^2.
        let spread = 100.0 - (10.0f32 / 13.0).powi(2);
        assert!((features.complexity - 0.5 * spread / 100.0).abs() < 1e-4);
    }

    #[test]
    fn history_is_bounded() {
        let mut history = FeatureHistory::default();
        for _ in 0..HISTORY_LEN + 10 {
            history.push(DescriptorSample::default());
        }
        assert_eq!(history.len(), HISTORY_LEN);
    }

    #[test]
    fn serializes_sharp_keys_and_lowercase_moods() {
        let json = serde_json::to_string(&(PitchClass::FSharp, Mood::Melancholic)).unwrap();
        assert_eq!(json, r#"["F#","melancholic"]"#);
    }
}
