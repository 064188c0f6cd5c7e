//! Drawing surface abstraction and the layer compositor built on it.

pub mod compositor;
pub mod engine;
pub mod raster;

use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

use crate::{
    assets::{BackdropImage, Rgba},
    Result,
};

pub use compositor::{Compositor, RenderQuality};
pub use engine::VisualizationEngine;
pub use raster::PixelSurface;

/// How a layer's pixels combine with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    /// Source over destination.
    Normal,
    Screen,
    /// Additive, saturating.
    Add,
}

/// What a surface can do beyond solid fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceCapabilities {
    pub gradients: bool,
    pub blend_modes: bool,
    pub images: bool,
}

impl SurfaceCapabilities {
    pub const fn full() -> Self {
        Self {
            gradients: true,
            blend_modes: true,
            images: true,
        }
    }

    /// Solid fills with normal blending only.
    pub const fn basic() -> Self {
        Self {
            gradients: false,
            blend_modes: false,
            images: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    /// Position along the gradient axis in `[0, 1]`.
    pub offset: f32,
    pub color: Rgba,
}

/// A 2-D target owned by the host UI. Coordinates are in pixels with the
/// origin at the top left.
pub trait DrawingSurface {
    fn size(&self) -> (u32, u32);

    fn capabilities(&self) -> SurfaceCapabilities;

    fn clear(&mut self, color: Rgba) -> Result<()>;

    fn fill_rect(&mut self, rect: Rect, color: Rgba, blend: BlendMode) -> Result<()>;

    /// Fills `rect` with a gradient running from `start` to `end`.
    fn fill_linear_gradient(
        &mut self,
        rect: Rect,
        start: Point,
        end: Point,
        stops: &[GradientStop],
        blend: BlendMode,
    ) -> Result<()>;

    /// Circle fading from `inner` at the centre to `outer` at `radius`.
    fn fill_radial(
        &mut self,
        center: Point,
        radius: f64,
        inner: Rgba,
        outer: Rgba,
        blend: BlendMode,
    ) -> Result<()>;

    /// Stretches `image` over `rect`.
    fn draw_image(&mut self, image: &BackdropImage, rect: Rect) -> Result<()>;

    /// Starts an off-screen frame. Until [`DrawingSurface::present`] or
    /// [`DrawingSurface::discard_frame`], draw calls must not change what is
    /// visible.
    fn begin_frame(&mut self) -> Result<()> {
        Ok(())
    }

    /// Makes the frame started by [`DrawingSurface::begin_frame`] visible.
    fn present(&mut self) -> Result<()> {
        Ok(())
    }

    /// Drops the frame in progress; the previous contents stay on screen.
    fn discard_frame(&mut self) {}

    /// Straight-alpha copy of the contents, for surfaces that can provide one.
    fn read_back(&self) -> Result<Option<image::RgbaImage>> {
        Ok(None)
    }
}

/// Colour at `t` along `stops`, which must be sorted by offset.
pub fn sample_stops(stops: &[GradientStop], t: f32) -> Rgba {
    let Some(first) = stops.first() else {
        return Rgba::TRANSPARENT;
    };
    if t <= first.offset {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.offset {
            let span = (b.offset - a.offset).max(f32::EPSILON);
            return a.color.lerp(b.color, (t - a.offset) / span);
        }
    }
    stops[stops.len() - 1].color
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_interpolate_and_clamp() {
        let stops = [
            GradientStop {
                offset: 0.0,
                color: Rgba::BLACK,
            },
            GradientStop {
                offset: 1.0,
                color: Rgba::WHITE,
            },
        ];
        assert_eq!(sample_stops(&stops, -1.0), Rgba::BLACK);
        assert_eq!(sample_stops(&stops, 2.0), Rgba::WHITE);
        let mid = sample_stops(&stops, 0.5);
        assert!((mid.r - 0.5).abs() < 1e-6);
        assert_eq!(sample_stops(&[], 0.5), Rgba::TRANSPARENT);
    }
}
