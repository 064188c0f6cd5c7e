use std::fmt;

use kurbo::{Point, Rect, Vec2};

use super::{sample_stops, BlendMode, DrawingSurface, GradientStop, SurfaceCapabilities};
use crate::{
    assets::{BackdropImage, Rgba},
    PulseVizError, Result,
};

pub type PremulRgba8 = [u8; 4];

/// CPU surface holding premultiplied RGBA8 pixels.
///
/// Frames opened with [`DrawingSurface::begin_frame`] are drawn into a back
/// buffer seeded from the visible pixels and swapped in on present.
#[derive(Clone)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    back: Vec<u8>,
    in_frame: bool,
    capabilities: SurfaceCapabilities,
}

impl PixelSurface {
    /// Transparent surface of `width` x `height` pixels with every capability.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
            back: Vec::new(),
            in_frame: false,
            capabilities: SurfaceCapabilities::full(),
        }
    }

    /// Restricts the operations the surface accepts; unsupported calls fail
    /// with a render error.
    pub fn with_capabilities(mut self, capabilities: SurfaceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Visible pixel at `(x, y)`, premultiplied.
    pub fn pixel(&self, x: u32, y: u32) -> Option<PremulRgba8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.index(x, y);
        let px = &self.pixels[idx..idx + 4];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Straight-alpha copy of the surface.
    pub fn to_image(&self) -> Result<image::RgbaImage> {
        let mut raw = self.pixels.clone();
        for px in raw.chunks_exact_mut(4) {
            let a = u16::from(px[3]);
            if a == 0 {
                continue;
            }
            for c in &mut px[..3] {
                *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
            }
        }
        image::RgbaImage::from_raw(self.width, self.height, raw)
            .ok_or_else(|| PulseVizError::render("surface buffer does not match its size"))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// Buffer draw calls write to: the back buffer while a frame is open.
    fn target(&mut self) -> &mut [u8] {
        if self.in_frame {
            &mut self.back
        } else {
            &mut self.pixels
        }
    }

    /// Pixel ranges whose centres fall inside `rect`, clipped to the surface.
    fn span(&self, rect: Rect) -> Option<(u32, u32, u32, u32)> {
        let rect = rect.abs();
        let x0 = (rect.x0 - 0.5).ceil().max(0.0);
        let y0 = (rect.y0 - 0.5).ceil().max(0.0);
        let x1 = (rect.x1 - 0.5).ceil().min(f64::from(self.width));
        let y1 = (rect.y1 - 0.5).ceil().min(f64::from(self.height));
        if !(x0 < x1 && y0 < y1) {
            return None;
        }
        Some((x0 as u32, y0 as u32, x1 as u32, y1 as u32))
    }

    fn shade(
        &mut self,
        rect: Rect,
        blend: BlendMode,
        mut color_at: impl FnMut(Point) -> Option<PremulRgba8>,
    ) {
        let Some((x0, y0, x1, y1)) = self.span(rect) else {
            return;
        };
        let stride = self.width as usize * 4;
        let target = self.target();
        for y in y0..y1 {
            for x in x0..x1 {
                let center = Point::new(f64::from(x) + 0.5, f64::from(y) + 0.5);
                let Some(src) = color_at(center) else {
                    continue;
                };
                let idx = y as usize * stride + x as usize * 4;
                let dst = [target[idx], target[idx + 1], target[idx + 2], target[idx + 3]];
                target[idx..idx + 4].copy_from_slice(&blend_pixel(dst, src, blend));
            }
        }
    }

    fn require(&self, supported: bool, what: &str) -> Result<()> {
        if supported {
            Ok(())
        } else {
            Err(PulseVizError::render(format!("surface does not support {what}")))
        }
    }

    fn require_blend(&self, blend: BlendMode) -> Result<()> {
        self.require(
            blend == BlendMode::Normal || self.capabilities.blend_modes,
            "non-normal blend modes",
        )
    }
}

impl DrawingSurface for PixelSurface {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> Result<()> {
        self.back.clear();
        self.back.extend_from_slice(&self.pixels);
        self.in_frame = true;
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if self.in_frame {
            std::mem::swap(&mut self.pixels, &mut self.back);
            self.in_frame = false;
        }
        Ok(())
    }

    fn discard_frame(&mut self) {
        self.in_frame = false;
    }

    fn read_back(&self) -> Result<Option<image::RgbaImage>> {
        self.to_image().map(Some)
    }

    fn capabilities(&self) -> SurfaceCapabilities {
        self.capabilities
    }

    fn clear(&mut self, color: Rgba) -> Result<()> {
        let px = color.to_premul_rgba8();
        for chunk in self.target().chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
        Ok(())
    }

    fn fill_rect(&mut self, rect: Rect, color: Rgba, blend: BlendMode) -> Result<()> {
        self.require_blend(blend)?;
        let px = color.to_premul_rgba8();
        self.shade(rect, blend, |_| Some(px));
        Ok(())
    }

    fn fill_linear_gradient(
        &mut self,
        rect: Rect,
        start: Point,
        end: Point,
        stops: &[GradientStop],
        blend: BlendMode,
    ) -> Result<()> {
        self.require(self.capabilities.gradients, "gradients")?;
        self.require_blend(blend)?;
        let axis = end - start;
        let len2 = axis.hypot2();
        self.shade(rect, blend, |p| {
            let t = if len2 <= f64::EPSILON {
                0.0
            } else {
                ((p - start).dot(axis) / len2).clamp(0.0, 1.0)
            };
            Some(sample_stops(stops, t as f32).to_premul_rgba8())
        });
        Ok(())
    }

    fn fill_radial(
        &mut self,
        center: Point,
        radius: f64,
        inner: Rgba,
        outer: Rgba,
        blend: BlendMode,
    ) -> Result<()> {
        self.require(self.capabilities.gradients, "radial gradients")?;
        self.require_blend(blend)?;
        if !(radius > 0.0) {
            return Ok(());
        }
        let bounds = Rect::from_center_size(center, (radius * 2.0, radius * 2.0));
        self.shade(bounds, blend, |p| {
            let d = (p - center).hypot() / radius;
            (d <= 1.0).then(|| inner.lerp(outer, d as f32).to_premul_rgba8())
        });
        Ok(())
    }

    fn draw_image(&mut self, image: &BackdropImage, rect: Rect) -> Result<()> {
        self.require(self.capabilities.images, "images")?;
        let rect = rect.abs();
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return Ok(());
        }
        let origin = Vec2::new(rect.x0, rect.y0);
        self.shade(rect, BlendMode::Normal, |p| {
            let local = p.to_vec2() - origin;
            let u = (local.x / rect.width()) as f32;
            let v = (local.y / rect.height()) as f32;
            Some(image.sample(u, v))
        });
        Ok(())
    }
}

impl fmt::Debug for PixelSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

pub fn blend_pixel(dst: PremulRgba8, src: PremulRgba8, mode: BlendMode) -> PremulRgba8 {
    match mode {
        BlendMode::Normal => over(dst, src),
        BlendMode::Screen => {
            let mut out = [0u8; 4];
            for i in 0..4 {
                let (s, d) = (u16::from(src[i]), u16::from(dst[i]));
                out[i] = (s + d - u16::from(mul_div255(s, d))).min(255) as u8;
            }
            out
        }
        BlendMode::Add => {
            let mut out = [0u8; 4];
            for i in 0..4 {
                out[i] = dst[i].saturating_add(src[i]);
            }
            out
        }
    }
}

/// Premultiplied source-over.
pub fn over(dst: PremulRgba8, src: PremulRgba8) -> PremulRgba8 {
    if src[3] == 0 {
        return dst;
    }
    let inv = 255u16 - u16::from(src[3]);
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = src[i].saturating_add(mul_div255(u16::from(dst[i]), inv));
    }
    out
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}
