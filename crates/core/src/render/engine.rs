use std::fmt;

use super::{Compositor, DrawingSurface, RenderQuality};
use crate::{
    analysis::AudioFrame,
    assets::{AssetStore, BackdropImage, BackdropSource},
    config::{VisualConfig, VisualConfigPatch},
    scene::{LayerId, LayerSet, VisualMode, VisualizationState},
    PulseVizError, Result,
};

/// Owns the visualisation state and renders it onto a host-provided surface.
///
/// The surface is lent to the engine through [`attach_surface`] and handed
/// back by [`detach_surface`]; the engine never creates or destroys one.
///
/// [`attach_surface`]: VisualizationEngine::attach_surface
/// [`detach_surface`]: VisualizationEngine::detach_surface
pub struct VisualizationEngine {
    state: VisualizationState,
    compositor: Compositor,
    surface: Option<Box<dyn DrawingSurface>>,
    assets: AssetStore,
    backdrop: Option<BackdropSource>,
    resolved_backdrop: Option<BackdropImage>,
}

impl VisualizationEngine {
    /// `free_bpm` is the tempo the gradient cycles at when beat sync is off.
    pub fn new(config: VisualConfig, free_bpm: f32) -> Self {
        Self {
            state: VisualizationState::new(config, free_bpm),
            compositor: Compositor::new(),
            surface: None,
            assets: AssetStore::new(),
            backdrop: None,
            resolved_backdrop: None,
        }
    }

    /// Takes `surface` for rendering and returns the one it replaces.
    pub fn attach_surface(
        &mut self,
        surface: Box<dyn DrawingSurface>,
    ) -> Result<Option<Box<dyn DrawingSurface>>> {
        let (width, height) = surface.size();
        if width == 0 || height == 0 {
            return Err(PulseVizError::initialization(format!(
                "drawing surface is {width}x{height}"
            )));
        }
        self.compositor.reset_quality();
        tracing::debug!(width, height, "drawing surface attached");
        Ok(self.surface.replace(surface))
    }

    pub fn detach_surface(&mut self) -> Option<Box<dyn DrawingSurface>> {
        let surface = self.surface.take();
        if surface.is_some() {
            tracing::debug!("drawing surface detached");
        }
        surface
    }

    /// Whether a surface is attached.
    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    /// Layer state as of the last advance.
    pub fn state(&self) -> &VisualizationState {
        &self.state
    }

    /// Active visual mode.
    pub fn mode(&self) -> VisualMode {
        self.state.mode()
    }

    pub fn enabled_layers(&self) -> LayerSet {
        self.state.enabled_layers()
    }

    /// The clamped visual settings in effect.
    pub fn config(&self) -> &VisualConfig {
        self.state.config()
    }

    pub fn render_quality(&self) -> RenderQuality {
        self.compositor.quality()
    }

    pub fn set_mode(&mut self, mode: VisualMode) {
        if mode != self.state.mode() {
            tracing::debug!(from = ?self.state.mode(), to = ?mode, "visual mode changed");
        }
        self.state.set_mode(mode);
    }

    pub fn enable_layer(&mut self, layer: LayerId) {
        self.state.enable_layer(layer);
    }

    /// Returns `false` when `layer` is the last enabled core layer.
    pub fn disable_layer(&mut self, layer: LayerId) -> bool {
        let disabled = self.state.disable_layer(layer);
        if !disabled {
            tracing::warn!(?layer, "refusing to disable the last core layer");
        }
        disabled
    }

    /// Replaces the visual settings, clamping out-of-range values, and
    /// returns what is now active.
    pub fn set_config(&mut self, config: VisualConfig) -> &VisualConfig {
        self.state.apply_config(config)
    }

    /// Applies a partial update from the AI configuration generator.
    pub fn apply_ai_config(&mut self, patch: &VisualConfigPatch) -> &VisualConfig {
        let merged = patch.merged_onto(self.state.config());
        self.state.apply_config(merged)
    }

    /// Shows `source` behind the gradient. URL references that the asset
    /// store cannot resolve yet are retried on every render.
    pub fn set_background_image(&mut self, source: BackdropSource) {
        self.resolved_backdrop = self.assets.resolve(&source);
        if self.resolved_backdrop.is_none() {
            tracing::debug!(?source, "backdrop pending until its image is registered");
        }
        self.backdrop = Some(source);
    }

    pub fn clear_background_image(&mut self) {
        self.backdrop = None;
        self.resolved_backdrop = None;
    }

    pub fn backdrop(&self) -> Option<&BackdropImage> {
        self.resolved_backdrop.as_ref()
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetStore {
        &mut self.assets
    }

    /// Moves every enabled layer to `frame` without drawing.
    pub fn advance(&mut self, frame: &AudioFrame, elapsed: f64, dt: f64) {
        self.state.advance(frame, elapsed, dt);
    }

    /// Advances to `frame` and renders. A failed render rolls the layers back,
    /// so the skipped tick leaves both the screen and the animation as they
    /// were.
    pub fn advance_and_render(&mut self, frame: &AudioFrame, elapsed: f64, dt: f64) -> Result<()> {
        let previous = self.state.clone();
        self.state.advance(frame, elapsed, dt);
        if let Err(err) = self.render() {
            self.state = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Starting animation state for every layer; mode and config are kept.
    pub fn reset_layers(&mut self) {
        self.state.reset_layers();
    }

    /// Composites the enabled layers onto the attached surface.
    pub fn render(&mut self) -> Result<()> {
        if self.resolved_backdrop.is_none() {
            if let Some(source) = &self.backdrop {
                self.resolved_backdrop = self.assets.resolve(source);
            }
        }
        let surface = self
            .surface
            .as_deref_mut()
            .ok_or_else(|| PulseVizError::initialization("no drawing surface attached"))?;
        self.compositor
            .render(surface, &self.state, self.resolved_backdrop.as_ref())
    }
}

impl fmt::Debug for VisualizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualizationEngine")
            .field("mode", &self.state.mode())
            .field("enabled", &self.state.enabled_layers())
            .field("quality", &self.compositor.quality())
            .field("surface", &self.surface.as_ref().map(|s| s.size()))
            .field("backdrop", &self.backdrop)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{render::PixelSurface, testing::RecordingSurface};

    fn engine() -> VisualizationEngine {
        VisualizationEngine::new(VisualConfig::default(), 120.0)
    }

    #[test]
    fn zero_sized_surfaces_are_rejected() {
        let mut engine = engine();
        let result = engine.attach_surface(Box::new(PixelSurface::new(0, 10)));
        assert!(matches!(result, Err(PulseVizError::Initialization(_))));
        assert!(!engine.has_surface());
    }

    #[test]
    fn rendering_without_a_surface_fails() {
        assert!(matches!(engine().render(), Err(PulseVizError::Initialization(_))));
    }

    #[test]
    fn surfaces_are_handed_back() {
        let mut engine = engine();
        assert!(engine
            .attach_surface(Box::new(PixelSurface::new(4, 4)))
            .unwrap()
            .is_none());
        let previous = engine
            .attach_surface(Box::new(PixelSurface::new(8, 8)))
            .unwrap();
        assert_eq!(previous.map(|s| s.size()), Some((4, 4)));
        assert_eq!(engine.detach_surface().map(|s| s.size()), Some((8, 8)));
        assert!(engine.detach_surface().is_none());
    }

    #[test]
    fn set_config_reads_back_clamped() {
        let mut engine = engine();
        let active = engine
            .set_config(VisualConfig {
                smoothing: 1.5,
                ..VisualConfig::default()
            })
            .clone();
        assert_eq!(active.smoothing, 1.0);
        assert_eq!(engine.config(), &active);
    }

    #[test]
    fn ai_patches_merge_onto_the_active_config() {
        let mut engine = engine();
        let patch =
            VisualConfigPatch::from_json(r#"{ "sensitivity": 40, "mode": "spotlight" }"#).unwrap();
        let active = engine.apply_ai_config(&patch).clone();
        assert_eq!(active.sensitivity, VisualConfig::MAX_SENSITIVITY);
        assert_eq!(active.smoothing, VisualConfig::default().smoothing);
        assert_eq!(engine.mode(), VisualMode::Spotlight);
        assert_eq!(engine.enabled_layers(), LayerSet::SPOTLIGHT);
    }

    #[test]
    fn pending_backdrop_resolves_once_registered() {
        let mut engine = engine();
        engine
            .attach_surface(Box::new(RecordingSurface::new(8, 8)))
            .unwrap();
        engine.set_background_image(BackdropSource::Url("thumb://1".into()));
        assert!(engine.backdrop().is_none());
        engine.render().unwrap();

        let image = BackdropImage::from_rgba8(1, 1, vec![9, 9, 9, 255]).unwrap();
        engine.assets_mut().register_image("thumb://1", image);
        engine.render().unwrap();
        assert!(engine.backdrop().is_some());

        engine.clear_background_image();
        assert!(engine.backdrop().is_none());
    }

    #[test]
    fn renders_pixels_onto_a_raster_surface() {
        let mut engine = engine();
        engine
            .attach_surface(Box::new(PixelSurface::new(32, 16)))
            .unwrap();
        let frame = AudioFrame::new(vec![200; 16], vec![128; 32], 120.0, 0.4, 0.2);
        engine.advance(&frame, 0.2, 0.016);
        engine.render().unwrap();
        assert_eq!(engine.render_quality(), RenderQuality::Full);
    }

    #[test]
    fn failed_render_rolls_the_layers_back() {
        let mut engine = VisualizationEngine::new(
            VisualConfig {
                mode: VisualMode::Equalizer,
                smoothing: 0.5,
                ..VisualConfig::default()
            },
            120.0,
        );
        let mut surface = RecordingSurface::new(32, 16);
        surface.fail_after_clear.set(true);
        engine.attach_surface(Box::new(surface)).unwrap();

        let frame = AudioFrame::new(vec![200; 16], vec![128; 32], 120.0, 0.0, 0.1);
        assert!(engine.advance_and_render(&frame, 0.1, 0.016).is_err());
        assert!(engine.state().equalizer.bar_heights().is_empty());
    }

    #[test]
    fn refuses_to_disable_the_last_core_layer() {
        let mut engine = engine();
        assert!(!engine.disable_layer(LayerId::Gradient));
        assert_eq!(engine.enabled_layers(), LayerSet::GRADIENT);
        engine.enable_layer(LayerId::Particles);
        assert!(engine.disable_layer(LayerId::Particles));
    }
}
