use serde::{Deserialize, Serialize, Serializer};

use crate::{PulseVizError, Result};

/// Straight-alpha colour with channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#rgb`, `#rrggbb` or `#rrggbbaa` (the `#` is optional).
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix('#').unwrap_or(s);

        fn byte(pair: &str) -> Result<f32> {
            u8::from_str_radix(pair, 16)
                .map(|v| f32::from(v) / 255.0)
                .map_err(|_| PulseVizError::config(format!("invalid hex byte \"{pair}\"")))
        }

        match s.len() {
            3 => {
                let mut channels = [0.0f32; 3];
                for (slot, c) in channels.iter_mut().zip(s.chars()) {
                    let pair: String = [c, c].iter().collect();
                    *slot = byte(&pair)?;
                }
                Ok(Self::rgb(channels[0], channels[1], channels[2]))
            }
            6 | 8 => {
                if !s.is_ascii() {
                    return Err(PulseVizError::config(format!("invalid hex colour \"{s}\"")));
                }
                let r = byte(&s[0..2])?;
                let g = byte(&s[2..4])?;
                let b = byte(&s[4..6])?;
                let a = if s.len() == 8 { byte(&s[6..8])? } else { 1.0 };
                Ok(Self::rgba(r, g, b, a))
            }
            _ => Err(PulseVizError::config(format!(
                "hex colour must have 3, 6 or 8 digits, got \"{s}\""
            ))),
        }
    }

    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        if a == 255 {
            format!("#{r:02x}{g:02x}{b:02x}")
        } else {
            format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }

    /// Clamps every channel into `[0, 1]`; non-finite channels become 0.
    pub fn clamped(self) -> Self {
        fn unit(x: f32) -> f32 {
            if x.is_finite() {
                x.clamp(0.0, 1.0)
            } else {
                0.0
            }
        }
        Self::rgba(unit(self.r), unit(self.g), unit(self.b), unit(self.a))
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::rgba(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
            self.a + (other.a - self.a) * t,
        )
    }

    pub fn to_rgba8(self) -> [u8; 4] {
        fn to_u8(x: f32) -> u8 {
            (x.clamp(0.0, 1.0) * 255.0).round() as u8
        }
        let c = self.clamped();
        [to_u8(c.r), to_u8(c.g), to_u8(c.b), to_u8(c.a)]
    }

    /// Premultiplied RGBA8, the pixel format of [`crate::render::PixelSurface`].
    pub fn to_premul_rgba8(self) -> [u8; 4] {
        let c = self.clamped();
        Self::rgba(c.r * c.a, c.g * c.a, c.b * c.a, c.a).to_rgba8()
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::BLACK
    }
}

impl Serialize for Rgba {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Hex(String),
            Obj {
                r: f32,
                g: f32,
                b: f32,
                #[serde(default = "one")]
                a: f32,
            },
            Arr(Vec<f32>),
        }

        fn one() -> f32 {
            1.0
        }

        let color = match Repr::deserialize(deserializer)? {
            Repr::Hex(s) => Self::from_hex(&s).map_err(serde::de::Error::custom)?,
            Repr::Obj { r, g, b, a } => Self::rgba(r, g, b, a),
            Repr::Arr(v) => match v.as_slice() {
                [r, g, b] => Self::rgb(*r, *g, *b),
                [r, g, b, a] => Self::rgba(*r, *g, *b, *a),
                _ => {
                    return Err(serde::de::Error::custom(
                        "rgba array must have len 3 ([r,g,b]) or 4 ([r,g,b,a])",
                    ))
                }
            },
        };
        // Out-of-range channels are clamped rather than rejected.
        Ok(color.clamped())
    }
}
