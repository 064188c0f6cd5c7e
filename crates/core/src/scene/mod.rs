//! Visualisation state: the active mode, the enabled layer set and the
//! per-layer animation state advanced once per tick.

pub mod layers;

use serde::{Deserialize, Serialize};

use crate::{analysis::AudioFrame, config::VisualConfig, render::BlendMode};

pub use layers::{EqualizerState, GradientState, Light, Particle, ParticleState, SpotlightState};

/// Upper bound on live particles.
const PARTICLE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualMode {
    #[default]
    Gradient,
    Equalizer,
    Spotlight,
    Combined,
}

impl VisualMode {
    /// Core layers a mode switches on.
    pub fn core_layers(self) -> LayerSet {
        match self {
            VisualMode::Gradient => LayerSet::GRADIENT,
            VisualMode::Equalizer => LayerSet::EQUALIZER,
            VisualMode::Spotlight => LayerSet::SPOTLIGHT,
            VisualMode::Combined => LayerSet::CORE,
        }
    }
}

/// Toggleable layers, listed bottom to top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerId {
    Gradient,
    Equalizer,
    Spotlight,
    Particles,
}

impl LayerId {
    /// Compositing order.
    pub const ORDER: [LayerId; 4] = [
        LayerId::Gradient,
        LayerId::Equalizer,
        LayerId::Spotlight,
        LayerId::Particles,
    ];

    pub fn flag(self) -> LayerSet {
        match self {
            LayerId::Gradient => LayerSet::GRADIENT,
            LayerId::Equalizer => LayerSet::EQUALIZER,
            LayerId::Spotlight => LayerSet::SPOTLIGHT,
            LayerId::Particles => LayerSet::PARTICLES,
        }
    }

    pub fn blend_mode(self) -> BlendMode {
        match self {
            LayerId::Gradient | LayerId::Equalizer => BlendMode::Normal,
            LayerId::Spotlight => BlendMode::Screen,
            LayerId::Particles => BlendMode::Add,
        }
    }

    /// Core layers are tied to a mode; the rest are auxiliary overlays.
    pub fn is_core(self) -> bool {
        LayerSet::CORE.contains(self.flag())
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerSet: u8 {
        const GRADIENT = 1 << 0;
        const EQUALIZER = 1 << 1;
        const SPOTLIGHT = 1 << 2;
        const PARTICLES = 1 << 3;
        const CORE = Self::GRADIENT.bits() | Self::EQUALIZER.bits() | Self::SPOTLIGHT.bits();
    }
}

impl LayerSet {
    pub fn has(self, layer: LayerId) -> bool {
        self.contains(layer.flag())
    }

    /// Enabled layers in compositing order.
    pub fn layers(self) -> impl Iterator<Item = LayerId> {
        LayerId::ORDER.into_iter().filter(move |l| self.has(*l))
    }
}

/// Everything the compositor needs to draw a frame.
///
/// `enabled` is never empty and always agrees with `mode`: a singleton mode
/// holds exactly its own core layer, `combined` holds at least one core layer,
/// and the particle overlay may be on in any mode.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizationState {
    mode: VisualMode,
    enabled: LayerSet,
    config: VisualConfig,
    /// Tempo the gradient cycles at when it is not synced to the music.
    free_bpm: f32,
    pub gradient: GradientState,
    pub equalizer: EqualizerState,
    pub spotlight: SpotlightState,
    pub particles: ParticleState,
}

impl VisualizationState {
    pub fn new(config: VisualConfig, free_bpm: f32) -> Self {
        let config = config.sanitized();
        let mut enabled = config.mode.core_layers();
        if config.particles {
            enabled |= LayerSet::PARTICLES;
        }
        Self {
            mode: config.mode,
            enabled,
            free_bpm,
            gradient: GradientState::new(
                (config.colors.primary, config.colors.secondary),
                config.gradient_angle,
                config.bpm_sync,
            ),
            equalizer: EqualizerState::new(config.smoothing),
            spotlight: SpotlightState::new(&config.colors),
            particles: ParticleState::new(PARTICLE_CAPACITY),
            config,
        }
    }

    pub fn mode(&self) -> VisualMode {
        self.mode
    }

    pub fn enabled_layers(&self) -> LayerSet {
        self.enabled
    }

    pub fn config(&self) -> &VisualConfig {
        &self.config
    }

    /// Switches to `mode`'s core set, keeping auxiliary layers and the state
    /// of every layer.
    pub fn set_mode(&mut self, mode: VisualMode) {
        self.mode = mode;
        self.config.mode = mode;
        self.enabled = mode.core_layers() | (self.enabled - LayerSet::CORE);
    }

    /// Turns `layer` on. A core layer outside the current singleton mode
    /// promotes the mode to `combined`.
    pub fn enable_layer(&mut self, layer: LayerId) {
        if self.enabled.has(layer) {
            return;
        }
        if layer.is_core() && self.mode != VisualMode::Combined {
            self.mode = VisualMode::Combined;
            self.config.mode = VisualMode::Combined;
        }
        if layer == LayerId::Particles {
            self.config.particles = true;
        }
        self.enabled |= layer.flag();
    }

    /// Turns `layer` off. Returns `false` (and changes nothing) when it is the
    /// last enabled core layer.
    pub fn disable_layer(&mut self, layer: LayerId) -> bool {
        if !self.enabled.has(layer) {
            return true;
        }
        if layer.is_core() && (self.enabled & LayerSet::CORE) == layer.flag() {
            return false;
        }
        self.enabled -= layer.flag();
        if layer == LayerId::Particles {
            self.config.particles = false;
        }
        if self.mode == VisualMode::Combined {
            let core = self.enabled & LayerSet::CORE;
            for mode in [VisualMode::Gradient, VisualMode::Equalizer, VisualMode::Spotlight] {
                if core == mode.core_layers() {
                    self.mode = mode;
                    self.config.mode = mode;
                }
            }
        }
        true
    }

    /// Clamps `config` against the current values and applies it to every
    /// layer without resetting animation state.
    pub fn apply_config(&mut self, config: VisualConfig) -> &VisualConfig {
        let config = config.sanitized_against(&self.config);
        if config.mode != self.mode {
            self.set_mode(config.mode);
        }
        if config.particles {
            self.enabled |= LayerSet::PARTICLES;
        } else {
            self.enabled -= LayerSet::PARTICLES;
        }
        self.gradient.color_pair = (config.colors.primary, config.colors.secondary);
        self.gradient.angle = config.gradient_angle;
        self.gradient.bpm_sync = config.bpm_sync;
        self.equalizer.set_smoothing(config.smoothing);
        self.spotlight.set_colors(&config.colors);
        self.config = config;
        &self.config
    }

    /// Puts every layer back to its starting animation state. Mode, enabled
    /// layers and config are kept.
    pub fn reset_layers(&mut self) {
        self.gradient.reset();
        self.equalizer.reset();
        self.spotlight = SpotlightState::new(&self.config.colors);
        self.particles.reset();
    }

    /// Advances every enabled layer to `frame`. `elapsed` is playback time and
    /// `dt` the step since the previous tick.
    pub fn advance(&mut self, frame: &AudioFrame, elapsed: f64, dt: f64) {
        let sensitivity = self.config.sensitivity;
        for layer in self.enabled.layers() {
            match layer {
                LayerId::Gradient => {
                    let bpm = if self.gradient.bpm_sync {
                        frame.bpm()
                    } else {
                        self.free_bpm
                    };
                    self.gradient.advance(elapsed, bpm);
                }
                LayerId::Equalizer => self.equalizer.advance(frame.frequency_data()),
                LayerId::Spotlight => self.spotlight.advance(dt, frame.energy(), sensitivity),
                LayerId::Particles => self.particles.advance(dt, frame.energy(), sensitivity),
            }
        }
    }
}
