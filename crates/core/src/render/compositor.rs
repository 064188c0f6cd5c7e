use kurbo::{Point, Rect, Vec2};

use super::{BlendMode, DrawingSurface, GradientStop, SurfaceCapabilities};
use crate::{
    assets::{BackdropImage, Rgba},
    scene::{LayerId, VisualizationState},
    PulseVizError, Result,
};

/// Widest bar count the equalizer draws, whatever the surface width.
const MAX_BARS: usize = 128;
/// Pixels per bar including the gap.
const BAR_PITCH: f64 = 6.0;
const PARTICLE_RADIUS: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderQuality {
    /// Gradients, images and per-layer blend modes.
    Full,
    /// Solid fills with normal blending.
    Simplified,
}

/// Draws a [`VisualizationState`] onto a surface, bottom to top: backdrop,
/// background gradient, equalizer, spotlights, particles.
#[derive(Debug)]
pub struct Compositor {
    quality: RenderQuality,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            quality: RenderQuality::Full,
        }
    }

    pub fn quality(&self) -> RenderQuality {
        self.quality
    }

    /// Goes back to full quality, e.g. after a new surface is attached.
    pub fn reset_quality(&mut self) {
        self.quality = RenderQuality::Full;
    }

    /// Renders one frame. A failed full-quality pass drops to simplified
    /// rendering for good and retries the frame once.
    pub fn render(
        &mut self,
        surface: &mut dyn DrawingSurface,
        state: &VisualizationState,
        backdrop: Option<&BackdropImage>,
    ) -> Result<()> {
        if self.quality == RenderQuality::Full && !supports_full(surface.capabilities()) {
            tracing::warn!("surface lacks gradients or blend modes, using simplified rendering");
            self.quality = RenderQuality::Simplified;
        }

        if self.quality == RenderQuality::Full {
            match draw_frame(surface, state, backdrop, RenderQuality::Full) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "full-quality render failed, falling back");
                    self.quality = RenderQuality::Simplified;
                }
            }
        }

        draw_frame(surface, state, backdrop, RenderQuality::Simplified).map_err(|err| match err {
            PulseVizError::Render(_) => err,
            other => PulseVizError::render(other.to_string()),
        })
    }
}

fn supports_full(caps: SurfaceCapabilities) -> bool {
    caps.gradients && caps.blend_modes
}

/// Draws one frame off screen and presents it only if every layer succeeded.
fn draw_frame(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    backdrop: Option<&BackdropImage>,
    quality: RenderQuality,
) -> Result<()> {
    surface.begin_frame()?;
    let drawn = draw_layers(surface, state, backdrop, quality).and_then(|()| surface.present());
    if drawn.is_err() {
        surface.discard_frame();
    }
    drawn
}

fn draw_layers(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    backdrop: Option<&BackdropImage>,
    quality: RenderQuality,
) -> Result<()> {
    let (width, height) = surface.size();
    let bounds = Rect::new(0.0, 0.0, f64::from(width), f64::from(height));
    let config = state.config();

    surface.clear(config.colors.background)?;
    if let Some(image) = backdrop {
        if quality == RenderQuality::Full && surface.capabilities().images {
            surface.draw_image(image, bounds)?;
        }
    }

    for layer in state.enabled_layers().layers() {
        match layer {
            LayerId::Gradient => draw_gradient(surface, state, bounds, quality)?,
            LayerId::Equalizer => draw_equalizer(surface, state, bounds)?,
            LayerId::Spotlight => draw_spotlights(surface, state, bounds, quality)?,
            LayerId::Particles => draw_particles(surface, state, bounds, quality)?,
        }
    }
    Ok(())
}

/// Triangle wave over one cycle: 0 at the ends, 1 at the middle.
fn cycle_mix(phase: f64) -> f32 {
    (1.0 - (2.0 * phase.rem_euclid(1.0) - 1.0).abs()) as f32
}

fn draw_gradient(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    bounds: Rect,
    quality: RenderQuality,
) -> Result<()> {
    let gradient = &state.gradient;
    let (a, b) = gradient.color_pair;
    let phase = gradient.phase();
    // Backdrop shows through the gradient when one is attached.
    let alpha = 0.85;

    if quality == RenderQuality::Simplified {
        let color = a.lerp(b, cycle_mix(phase)).with_alpha(alpha);
        return surface.fill_rect(bounds, color, BlendMode::Normal);
    }

    let dir = Vec2::from_angle(f64::from(gradient.angle).to_radians());
    let half = 0.5 * (bounds.width() * dir.x.abs() + bounds.height() * dir.y.abs());
    let center = bounds.center();
    let stops = [0.0f32, 0.5, 1.0].map(|offset| GradientStop {
        offset,
        color: a
            .lerp(b, cycle_mix(phase + f64::from(offset) * 0.5))
            .with_alpha(alpha),
    });
    surface.fill_linear_gradient(
        bounds,
        center - dir * half,
        center + dir * half,
        &stops,
        LayerId::Gradient.blend_mode(),
    )
}

/// Max-pools per-bin heights into `bars` columns.
pub fn pool_bars(heights: &[f32], bars: usize) -> Vec<f32> {
    if heights.is_empty() || bars == 0 {
        return Vec::new();
    }
    let bars = bars.min(heights.len());
    (0..bars)
        .map(|i| {
            let start = i * heights.len() / bars;
            let end = ((i + 1) * heights.len() / bars).max(start + 1);
            heights[start..end].iter().copied().fold(0.0, f32::max)
        })
        .collect()
}

fn draw_equalizer(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    bounds: Rect,
) -> Result<()> {
    let config = state.config();
    let slots = ((bounds.width() / BAR_PITCH) as usize).clamp(1, MAX_BARS);
    let bars = pool_bars(state.equalizer.bar_heights(), slots);
    if bars.is_empty() {
        return Ok(());
    }

    let pitch = bounds.width() / bars.len() as f64;
    let gap = (pitch * 0.2).min(2.0);
    for (i, &height) in bars.iter().enumerate() {
        let level = (height / 255.0 * config.sensitivity).clamp(0.0, 1.0);
        if level <= 0.0 {
            continue;
        }
        let x0 = bounds.x0 + i as f64 * pitch;
        let top = bounds.y1 - f64::from(level) * bounds.height();
        let color = config.colors.primary.lerp(config.colors.accent, level);
        surface.fill_rect(
            Rect::new(x0, top, x0 + pitch - gap, bounds.y1),
            color,
            LayerId::Equalizer.blend_mode(),
        )?;
    }
    Ok(())
}

fn draw_spotlights(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    bounds: Rect,
    quality: RenderQuality,
) -> Result<()> {
    let spot = &state.spotlight;
    if spot.intensity <= 0.0 {
        return Ok(());
    }
    let scale = bounds.width().min(bounds.height());
    for light in &spot.lights {
        let center = Point::new(
            bounds.x0 + light.position.x * bounds.width(),
            bounds.y0 + light.position.y * bounds.height(),
        );
        let radius = light.radius * scale * (0.6 + 0.4 * f64::from(spot.intensity));
        match quality {
            RenderQuality::Full => surface.fill_radial(
                center,
                radius,
                light.color.with_alpha(spot.intensity),
                light.color.with_alpha(0.0),
                LayerId::Spotlight.blend_mode(),
            )?,
            RenderQuality::Simplified => surface.fill_rect(
                Rect::from_center_size(center, (radius, radius)),
                light.color.with_alpha(spot.intensity * 0.5),
                BlendMode::Normal,
            )?,
        }
    }
    Ok(())
}

fn draw_particles(
    surface: &mut dyn DrawingSurface,
    state: &VisualizationState,
    bounds: Rect,
    quality: RenderQuality,
) -> Result<()> {
    let accent: Rgba = state.config().colors.accent;
    for particle in &state.particles.particles {
        let center = Point::new(
            bounds.x0 + particle.position.x * bounds.width(),
            bounds.y0 + particle.position.y * bounds.height(),
        );
        match quality {
            RenderQuality::Full => surface.fill_radial(
                center,
                PARTICLE_RADIUS,
                accent.with_alpha(particle.life),
                accent.with_alpha(0.0),
                LayerId::Particles.blend_mode(),
            )?,
            RenderQuality::Simplified => surface.fill_rect(
                Rect::from_center_size(center, (2.0, 2.0)),
                accent.with_alpha(particle.life),
                BlendMode::Normal,
            )?,
        }
    }
    Ok(())
}
