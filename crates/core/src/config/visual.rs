use serde::{Deserialize, Serialize};

use crate::{assets::Rgba, scene::VisualMode, PulseVizError, Result};

/// Palette shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    /// First gradient stop and equalizer base colour.
    pub primary: Rgba,
    /// Second gradient stop and equalizer peak colour.
    pub secondary: Rgba,
    /// Spotlights and particles.
    pub accent: Rgba,
    /// Surface clear colour beneath every layer.
    pub background: Rgba,
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            primary: Rgba::rgb(0.23, 0.53, 1.0),
            secondary: Rgba::rgb(1.0, 0.0, 0.43),
            accent: Rgba::rgb(1.0, 0.75, 0.04),
            background: Rgba::rgb(0.03, 0.03, 0.07),
        }
    }
}

/// Live visual settings. Hot-swappable while the loop is running.
///
/// | field | range | out of range |
/// |---|---|---|
/// | `sensitivity` | `[0.1, 10]` | clamped; NaN keeps the previous value |
/// | `smoothing` | `[0, 1]` | clamped; NaN keeps the previous value |
/// | `gradient_angle` | `[0, 360)` degrees | wrapped; non-finite keeps the previous value |
/// | `colors.*` | channels in `[0, 1]` | clamped per channel |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    pub mode: VisualMode,
    pub colors: ColorScheme,
    /// Gain applied to audio-driven magnitudes when drawing.
    pub sensitivity: f32,
    /// Equalizer bar decay per tick; 0 follows the spectrum exactly.
    pub smoothing: f32,
    /// When `false` the gradient cycles at the default tempo instead of the
    /// detected one.
    pub bpm_sync: bool,
    pub gradient_angle: f32,
    /// Whether the particle overlay starts enabled.
    pub particles: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            mode: VisualMode::Gradient,
            colors: ColorScheme::default(),
            sensitivity: 1.0,
            smoothing: 0.6,
            bpm_sync: true,
            gradient_angle: 135.0,
            particles: false,
        }
    }
}

impl VisualConfig {
    pub const MIN_SENSITIVITY: f32 = 0.1;
    pub const MAX_SENSITIVITY: f32 = 10.0;

    /// Clamps against the defaults.
    pub fn sanitized(self) -> Self {
        self.sanitized_against(&Self::default())
    }

    /// Clamps every field into range. NaN values fall back to the matching
    /// field of `previous`, so a bad update never disturbs a running animation.
    pub fn sanitized_against(self, previous: &VisualConfig) -> Self {
        let sensitivity = clamp_or_keep(
            "sensitivity",
            self.sensitivity,
            previous.sensitivity,
            Self::MIN_SENSITIVITY,
            Self::MAX_SENSITIVITY,
        );
        let smoothing = clamp_or_keep("smoothing", self.smoothing, previous.smoothing, 0.0, 1.0);
        let gradient_angle = if self.gradient_angle.is_finite() {
            self.gradient_angle.rem_euclid(360.0)
        } else {
            tracing::warn!(value = self.gradient_angle, "non-finite gradient angle ignored");
            previous.gradient_angle
        };
        let colors = ColorScheme {
            primary: self.colors.primary.clamped(),
            secondary: self.colors.secondary.clamped(),
            accent: self.colors.accent.clamped(),
            background: self.colors.background.clamped(),
        };

        Self {
            mode: self.mode,
            colors,
            sensitivity,
            smoothing,
            bpm_sync: self.bpm_sync,
            gradient_angle,
            particles: self.particles,
        }
    }
}

fn clamp_or_keep(field: &str, value: f32, previous: f32, min: f32, max: f32) -> f32 {
    if value.is_nan() {
        tracing::warn!(field, "NaN value ignored, keeping previous");
        return previous;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!(field, value, clamped, "configuration value clamped");
    }
    clamped
}

/// Partial palette update; absent entries keep their current colour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSchemePatch {
    pub primary: Option<Rgba>,
    pub secondary: Option<Rgba>,
    pub accent: Option<Rgba>,
    pub background: Option<Rgba>,
}

/// Partial visual settings as produced by an AI configuration generator.
///
/// Accepts both `snake_case` and `camelCase` keys for multi-word fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfigPatch {
    pub mode: Option<VisualMode>,
    pub colors: Option<ColorSchemePatch>,
    pub sensitivity: Option<f32>,
    pub smoothing: Option<f32>,
    #[serde(alias = "bpmSync")]
    pub bpm_sync: Option<bool>,
    #[serde(alias = "gradientAngle")]
    pub gradient_angle: Option<f32>,
    pub particles: Option<bool>,
}

impl VisualConfigPatch {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| PulseVizError::config(err.to_string()))
    }

    /// Overlays the patch on `base`. The result is not yet clamped.
    pub fn merged_onto(&self, base: &VisualConfig) -> VisualConfig {
        let mut next = base.clone();
        if let Some(mode) = self.mode {
            next.mode = mode;
        }
        if let Some(colors) = &self.colors {
            next.colors.primary = colors.primary.unwrap_or(next.colors.primary);
            next.colors.secondary = colors.secondary.unwrap_or(next.colors.secondary);
            next.colors.accent = colors.accent.unwrap_or(next.colors.accent);
            next.colors.background = colors.background.unwrap_or(next.colors.background);
        }
        if let Some(sensitivity) = self.sensitivity {
            next.sensitivity = sensitivity;
        }
        if let Some(smoothing) = self.smoothing {
            next.smoothing = smoothing;
        }
        if let Some(bpm_sync) = self.bpm_sync {
            next.bpm_sync = bpm_sync;
        }
        if let Some(angle) = self.gradient_angle {
            next.gradient_angle = angle;
        }
        if let Some(particles) = self.particles {
            next.particles = particles;
        }
        next
    }
}
