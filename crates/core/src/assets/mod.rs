pub mod color;

use std::{collections::HashMap, path::Path, sync::Arc};

use crate::{PulseVizError, Result};

pub use color::Rgba;

/// Decoded backdrop image stored as premultiplied RGBA8.
#[derive(Clone, PartialEq)]
pub struct BackdropImage {
    width: u32,
    height: u32,
    rgba8_premul: Arc<Vec<u8>>,
}

impl BackdropImage {
    /// Builds an image from straight-alpha RGBA8 pixels.
    pub fn from_rgba8(width: u32, height: u32, mut rgba8: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| PulseVizError::config("backdrop size overflow"))?;
        if width == 0 || height == 0 || rgba8.len() != expected {
            return Err(PulseVizError::config(format!(
                "backdrop expects {width}x{height}x4 bytes, got {}",
                rgba8.len()
            )));
        }
        premultiply_rgba8_in_place(&mut rgba8);
        Ok(Self {
            width,
            height,
            rgba8_premul: Arc::new(rgba8),
        })
    }

    /// Decodes PNG or JPEG bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba8(width, height, rgba.into_raw())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let rgba = image::open(path)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Self::from_rgba8(width, height, rgba.into_raw())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Nearest-neighbour lookup at normalised coordinates.
    pub fn sample(&self, u: f32, v: f32) -> [u8; 4] {
        let x = ((u.clamp(0.0, 1.0) * self.width as f32) as u32).min(self.width - 1);
        let y = ((v.clamp(0.0, 1.0) * self.height as f32) as u32).min(self.height - 1);
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        let px = &self.rgba8_premul[idx..idx + 4];
        [px[0], px[1], px[2], px[3]]
    }
}

impl std::fmt::Debug for BackdropImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackdropImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// What the host hands to `set_background_image`: pixels it already has, or a
/// reference (typically a thumbnail URL) to resolve through the [`AssetStore`].
#[derive(Debug, Clone)]
pub enum BackdropSource {
    Url(String),
    Image(BackdropImage),
}

/// Registry of backdrop images keyed by the reference the host uses for them.
///
/// Nothing here fetches from the network: the host registers images once it
/// has bytes for them, and pending references resolve on the next render.
#[derive(Debug, Default)]
pub struct AssetStore {
    images: HashMap<String, BackdropImage>,
}

impl AssetStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
        }
    }

    /// Registers `image` under `key`, replacing any earlier one.
    pub fn register_image(&mut self, key: impl Into<String>, image: BackdropImage) {
        self.images.insert(key.into(), image);
    }

    /// Decodes `bytes` and registers the result under `key`.
    pub fn register_encoded(&mut self, key: impl Into<String>, bytes: &[u8]) -> Result<()> {
        let image = BackdropImage::decode(bytes)?;
        self.register_image(key, image);
        Ok(())
    }

    /// Image registered under `key`, if any.
    pub fn image(&self, key: &str) -> Option<&BackdropImage> {
        self.images.get(key)
    }

    /// The image `source` refers to, or `None` while a URL is unregistered.
    pub fn resolve(&self, source: &BackdropSource) -> Option<BackdropImage> {
        match source {
            BackdropSource::Image(image) => Some(image.clone()),
            BackdropSource::Url(url) => self.image(url).cloned(),
        }
    }
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = px[3] as u16;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            continue;
        }
        px[0] = ((px[0] as u16 * a + 127) / 255) as u8;
        px[1] = ((px[1] as u16 * a + 127) / 255) as u8;
        px[2] = ((px[2] as u16 * a + 127) / 255) as u8;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbaImage::from_raw(2, 1, vec![255, 0, 0, 255, 0, 0, 255, 128]).unwrap();
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn resolves_registered_urls() {
        let mut store = AssetStore::new();
        store
            .register_encoded("https://img.example/thumb.png", &png_bytes())
            .unwrap();

        let source = BackdropSource::Url("https://img.example/thumb.png".to_string());
        let image = store.resolve(&source).expect("registered url resolves");
        assert_eq!((image.width(), image.height()), (2, 1));
        assert_eq!(image.sample(0.9, 0.5), [0, 0, 128, 128]);
    }

    #[test]
    fn unknown_urls_stay_unresolved() {
        let store = AssetStore::new();
        let source = BackdropSource::Url("missing.png".to_string());
        assert!(store.resolve(&source).is_none());
    }

    #[test]
    fn rejects_mismatched_pixel_buffers() {
        let err = BackdropImage::from_rgba8(2, 2, vec![0; 4]).unwrap_err();
        assert!(format!("{err}").contains("2x2x4"));
    }
}
