pub mod visual;

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::Result;

pub use visual::{ColorScheme, ColorSchemePatch, VisualConfig, VisualConfigPatch};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub analysis: AnalysisConfig,
    pub visual: VisualConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Reads a JSON document. Missing fields take their defaults and every
    /// value is clamped into range instead of failing.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config.sanitized())
    }

    pub fn sanitized(self) -> Self {
        Self {
            audio: self.audio.sanitized(),
            analysis: self.analysis.sanitized(),
            visual: self.visual.sanitized(),
            scheduler: self.scheduler.sanitized(),
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
        }
    }
}

impl AudioConfig {
    pub fn sanitized(self) -> Self {
        Self {
            sample_rate: self.sample_rate.clamp(8_000, 192_000),
        }
    }
}

/// Analysis node and feature extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Power-of-two FFT window; the bin count is half of this.
    pub fft_size: usize,
    /// Per-read spectral smoothing of the analysis node, in `[0, 1)`.
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub tempo: TempoConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            tempo: TempoConfig::default(),
        }
    }
}

impl AnalysisConfig {
    pub const MIN_FFT_SIZE: usize = 32;
    pub const MAX_FFT_SIZE: usize = 32_768;

    pub fn sanitized(self) -> Self {
        let fft_size = self
            .fft_size
            .clamp(Self::MIN_FFT_SIZE, Self::MAX_FFT_SIZE)
            .next_power_of_two()
            .min(Self::MAX_FFT_SIZE);
        let smoothing_time_constant = finite_or(self.smoothing_time_constant, 0.8).clamp(0.0, 0.99);
        let mut min_decibels = finite_or(self.min_decibels, -100.0).clamp(-160.0, -10.0);
        let mut max_decibels = finite_or(self.max_decibels, -30.0).clamp(-150.0, 0.0);
        if min_decibels >= max_decibels {
            min_decibels = -100.0;
            max_decibels = -30.0;
        }
        Self {
            fft_size,
            smoothing_time_constant,
            min_decibels,
            max_decibels,
            tempo: self.tempo.sanitized(),
        }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// Tempo estimation parameters. These are starting points; tune them against
/// reference material rather than treating them as exact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// Reported until the estimator has `warmup_seconds` of history.
    pub default_bpm: f32,
    pub min_bpm: f32,
    pub max_bpm: f32,
    /// Length of the sliding energy window.
    pub window_seconds: f32,
    pub warmup_seconds: f32,
    /// A peak must exceed its neighbourhood mean by this fraction to count as
    /// an onset.
    pub onset_threshold: f32,
    /// Weight of the previous estimate in the exponential moving average.
    pub ema_decay: f32,
    /// Onsets closer together than this are merged.
    pub min_onset_interval: f32,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self {
            default_bpm: 120.0,
            min_bpm: 60.0,
            max_bpm: 180.0,
            window_seconds: 4.0,
            warmup_seconds: 2.0,
            onset_threshold: 0.3,
            ema_decay: 0.8,
            min_onset_interval: 0.2,
        }
    }
}

impl TempoConfig {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let mut min_bpm = finite_or(self.min_bpm, defaults.min_bpm).clamp(30.0, 300.0);
        let mut max_bpm = finite_or(self.max_bpm, defaults.max_bpm).clamp(30.0, 300.0);
        if min_bpm >= max_bpm {
            min_bpm = defaults.min_bpm;
            max_bpm = defaults.max_bpm;
        }
        let window_seconds = finite_or(self.window_seconds, defaults.window_seconds).clamp(2.0, 30.0);
        Self {
            default_bpm: finite_or(self.default_bpm, defaults.default_bpm).clamp(min_bpm, max_bpm),
            min_bpm,
            max_bpm,
            window_seconds,
            warmup_seconds: finite_or(self.warmup_seconds, defaults.warmup_seconds)
                .clamp(0.5, window_seconds),
            onset_threshold: finite_or(self.onset_threshold, defaults.onset_threshold)
                .clamp(0.0, 10.0),
            ema_decay: finite_or(self.ema_decay, defaults.ema_decay).clamp(0.0, 0.99),
            min_onset_interval: finite_or(self.min_onset_interval, defaults.min_onset_interval)
                .clamp(0.05, 60.0 / max_bpm),
        }
    }
}

/// Frame loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive failed ticks tolerated before the scheduler halts.
    pub failure_threshold: u32,
    pub refresh_hz: f64,
    /// Largest time step fed to layer integration after a stall, in seconds.
    pub max_frame_delta: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            refresh_hz: 60.0,
            max_frame_delta: 0.25,
        }
    }
}

impl SchedulerConfig {
    pub fn sanitized(self) -> Self {
        let refresh_hz = if self.refresh_hz.is_finite() {
            self.refresh_hz.clamp(1.0, 360.0)
        } else {
            60.0
        };
        let max_frame_delta = if self.max_frame_delta.is_finite() {
            self.max_frame_delta.clamp(1.0 / refresh_hz, 1.0)
        } else {
            0.25
        };
        Self {
            failure_threshold: self.failure_threshold.max(1),
            refresh_hz,
            max_frame_delta,
        }
    }
}

pub(crate) fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}
