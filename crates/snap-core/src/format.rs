//! Pixel formats for texture storage and readback.
//!
//! # Types
//!
//! - [`PixelFormat`] - Byte layout of a texel in a texture or a readback buffer
//!
//! # Usage
//!
//! ```rust
//! use snap_core::PixelFormat;
//!
//! let mut out = [0u8; 4];
//! PixelFormat::Bgra8.encode([10, 20, 30, 255], &mut out);
//! assert_eq!(out, [30, 20, 10, 255]);
//! ```

/// Byte layout of one texel.
///
/// Textures are sampled as RGBA; the format decides how texels are laid
/// out in memory when stored or read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8-bit R, G, B, A.
    #[default]
    Rgba8,
    /// 8-bit B, G, R, A (the native layout of 32-bit host bitmaps).
    Bgra8,
    /// 16-bit packed 5-6-5 RGB, little-endian, alpha dropped.
    Rgb565,
}

impl PixelFormat {
    /// Bytes per texel.
    #[inline]
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 4,
            Self::Rgb565 => 2,
        }
    }

    /// Bytes needed for a tightly packed image of `width` x `height`.
    #[inline]
    pub const fn image_bytes(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }

    /// Human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba8",
            Self::Bgra8 => "bgra8",
            Self::Rgb565 => "rgb565",
        }
    }

    /// Writes an RGBA texel into `out` in this format.
    ///
    /// `out` must be at least [`bytes_per_pixel`](Self::bytes_per_pixel) long.
    #[inline]
    pub fn encode(&self, rgba: [u8; 4], out: &mut [u8]) {
        match self {
            Self::Rgba8 => out[..4].copy_from_slice(&rgba),
            Self::Bgra8 => out[..4].copy_from_slice(&[rgba[2], rgba[1], rgba[0], rgba[3]]),
            Self::Rgb565 => {
                let r = (rgba[0] as u16 >> 3) << 11;
                let g = (rgba[1] as u16 >> 2) << 5;
                let b = rgba[2] as u16 >> 3;
                out[..2].copy_from_slice(&(r | g | b).to_le_bytes());
            }
        }
    }

    /// Reads a texel in this format back to RGBA.
    ///
    /// RGB565 channels are expanded by bit replication; alpha is opaque.
    #[inline]
    pub fn decode(&self, texel: &[u8]) -> [u8; 4] {
        match self {
            Self::Rgba8 => [texel[0], texel[1], texel[2], texel[3]],
            Self::Bgra8 => [texel[2], texel[1], texel[0], texel[3]],
            Self::Rgb565 => {
                let v = u16::from_le_bytes([texel[0], texel[1]]);
                let r = ((v >> 11) & 0x1f) as u8;
                let g = ((v >> 5) & 0x3f) as u8;
                let b = (v & 0x1f) as u8;
                [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
            }
        }
    }

    /// Rounds an RGBA texel to the precision this format can hold.
    #[inline]
    pub fn quantize(&self, rgba: [u8; 4]) -> [u8; 4] {
        match self {
            Self::Rgba8 | Self::Bgra8 => rgba,
            Self::Rgb565 => {
                let mut packed = [0u8; 2];
                self.encode(rgba, &mut packed);
                self.decode(&packed)
            }
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb565.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Bgra8.image_bytes(3, 2), 24);
    }

    #[test]
    fn test_rgb565_extremes() {
        let mut out = [0u8; 2];
        PixelFormat::Rgb565.encode([255, 255, 255, 0], &mut out);
        assert_eq!(out, [0xff, 0xff]);
        assert_eq!(PixelFormat::Rgb565.decode(&out), [255, 255, 255, 255]);

        PixelFormat::Rgb565.encode([255, 0, 0, 255], &mut out);
        assert_eq!(u16::from_le_bytes(out), 0xf800);
    }

    #[test]
    fn test_quantize_keeps_8bit() {
        let px = [1, 2, 3, 4];
        assert_eq!(PixelFormat::Rgba8.quantize(px), px);
        assert_eq!(PixelFormat::Rgb565.quantize([255, 0, 255, 7]), [255, 0, 255, 255]);
    }
}
