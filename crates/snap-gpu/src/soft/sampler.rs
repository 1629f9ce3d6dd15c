//! Texture storage and the resample / planar draw kernels.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use snap_core::pixel::{Plane, apply_weights, to_u8};
use snap_core::{Error, PixelFormat, Rect, Size};

use crate::GpuResult;

/// Texture storage. Texels are held as RGBA8; RGB565 surfaces quantize on write.
#[derive(Debug, Clone)]
pub(crate) struct Surface {
    pub size: Size,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

pub(crate) type SharedSurface = Arc<Mutex<Surface>>;

pub(crate) fn lock_surface(surface: &SharedSurface) -> MutexGuard<'_, Surface> {
    surface.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Surface {
    pub fn new(size: Size, format: PixelFormat) -> Self {
        Self {
            size,
            format,
            data: vec![0; PixelFormat::Rgba8.image_bytes(size.width, size.height)],
        }
    }

    /// Builds a surface from texels encoded in `format`.
    pub fn from_encoded(size: Size, format: PixelFormat, encoded: &[u8]) -> GpuResult<Self> {
        let required = format.image_bytes(size.width, size.height);
        if encoded.len() < required {
            return Err(Error::buffer_too_small(required, encoded.len()).into());
        }
        let mut surface = Self::new(size, format);
        let bpp = format.bytes_per_pixel();
        for (texel, out) in encoded[..required]
            .chunks_exact(bpp)
            .zip(surface.data.chunks_exact_mut(4))
        {
            out.copy_from_slice(&format.quantize(format.decode(texel)));
        }
        Ok(surface)
    }

    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.size.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Encodes `rect` in `format`, tightly packed.
    pub fn read_rect(&self, rect: Rect, format: PixelFormat) -> Vec<u8> {
        let bpp = format.bytes_per_pixel();
        let mut out = vec![0u8; format.image_bytes(rect.width, rect.height)];
        for (row, chunk) in out.chunks_exact_mut(rect.width as usize * bpp).enumerate() {
            let y = rect.y + row as u32;
            for (col, texel) in chunk.chunks_exact_mut(bpp).enumerate() {
                format.encode(self.texel(rect.x + col as u32, y), texel);
            }
        }
        out
    }

    /// Copies `rect` of `src` to `(dst_x, dst_y)`, clipped to this surface.
    pub fn copy_rect(&mut self, src: &Surface, rect: Rect, dst_x: u32, dst_y: u32) {
        let width = rect.width.min(self.size.width.saturating_sub(dst_x));
        let height = rect.height.min(self.size.height.saturating_sub(dst_y));
        let format = self.format;
        for row in 0..height {
            for col in 0..width {
                let texel = format.quantize(src.texel(rect.x + col, rect.y + row));
                let i = ((dst_y + row) as usize * self.size.width as usize
                    + (dst_x + col) as usize)
                    * 4;
                self.data[i..i + 4].copy_from_slice(&texel);
            }
        }
    }
}

/// How a draw reads its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SampleMode {
    Nearest,
    Bilinear,
    Bicubic,
}

/// Read-only copy of a source texture taken before a draw.
pub(crate) struct SourceImage {
    size: Size,
    data: Vec<u8>,
}

impl SourceImage {
    pub fn snapshot(surface: &Surface) -> Self {
        Self {
            size: surface.size,
            data: surface.data.clone(),
        }
    }

    /// Clamp-to-edge texel fetch.
    #[inline]
    fn fetch(&self, x: i64, y: i64) -> [f32; 4] {
        if self.size.is_empty() {
            return [0.0; 4];
        }
        let x = x.clamp(0, self.size.width as i64 - 1) as usize;
        let y = y.clamp(0, self.size.height as i64 - 1) as usize;
        let i = (y * self.size.width as usize + x) * 4;
        [
            self.data[i] as f32,
            self.data[i + 1] as f32,
            self.data[i + 2] as f32,
            self.data[i + 3] as f32,
        ]
    }

    /// Samples at texel coordinates `(u, v)`; texel centers sit at `i + 0.5`.
    pub fn sample(&self, mode: SampleMode, u: f32, v: f32) -> [f32; 4] {
        match mode {
            SampleMode::Nearest => self.fetch(u.floor() as i64, v.floor() as i64),
            SampleMode::Bilinear => {
                let x = u - 0.5;
                let y = v - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let p00 = self.fetch(x0, y0);
                let p10 = self.fetch(x0 + 1, y0);
                let p01 = self.fetch(x0, y0 + 1);
                let p11 = self.fetch(x0 + 1, y0 + 1);

                let mut out = [0.0; 4];
                for c in 0..4 {
                    let top = p00[c] * (1.0 - fx) + p10[c] * fx;
                    let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
                    out[c] = top * (1.0 - fy) + bottom * fy;
                }
                out
            }
            SampleMode::Bicubic => {
                let x = u - 0.5;
                let y = v - 0.5;
                let x0 = x.floor();
                let y0 = y.floor();
                let fx = x - x0;
                let fy = y - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);

                let mut sum = [0.0f32; 4];
                let mut total = 0.0f32;
                for j in -1..=2i64 {
                    let wy = mitchell(j as f32 - fy);
                    for i in -1..=2i64 {
                        let w = mitchell(i as f32 - fx) * wy;
                        let p = self.fetch(x0 + i, y0 + j);
                        for c in 0..4 {
                            sum[c] += p[c] * w;
                        }
                        total += w;
                    }
                }
                if total.abs() > f32::EPSILON {
                    for c in &mut sum {
                        *c /= total;
                    }
                }
                sum
            }
        }
    }
}

/// Mitchell-Netravali weight (B = C = 1/3).
#[inline]
pub(crate) fn mitchell(x: f32) -> f32 {
    const B: f32 = 1.0 / 3.0;
    const C: f32 = 1.0 / 3.0;

    let ax = x.abs();
    if ax < 1.0 {
        ((12.0 - 9.0 * B - 6.0 * C) * ax * ax * ax
            + (-18.0 + 12.0 * B + 6.0 * C) * ax * ax
            + (6.0 - 2.0 * B))
            / 6.0
    } else if ax < 2.0 {
        ((-B - 6.0 * C) * ax * ax * ax
            + (6.0 * B + 30.0 * C) * ax * ax
            + (-12.0 * B - 48.0 * C) * ax
            + (8.0 * B + 24.0 * C))
            / 6.0
    } else {
        0.0
    }
}

#[inline]
fn to_texel(value: [f32; 4]) -> [u8; 4] {
    value.map(|c| c.round().clamp(0.0, 255.0) as u8)
}

/// Source position of output pixel `i` along one axis.
#[inline]
fn source_coord(origin: f32, extent: f32, out_extent: u32, i: u32) -> f32 {
    origin + (i as f32 + 0.5) * extent / out_extent as f32
}

/// Scales `src_rect` of `src` onto the `dst_size` corner of `target`.
pub(crate) fn resample(
    src: &SourceImage,
    mode: SampleMode,
    src_rect: [f32; 4],
    dst_size: Size,
    flip_vertically: bool,
    swizzle: bool,
    target: &mut Surface,
) {
    if dst_size.is_empty() {
        return;
    }
    let [sx, sy, sw, sh] = src_rect;
    let rows = dst_size.height.min(target.size.height) as usize;
    let cols = dst_size.width.min(target.size.width);
    let row_bytes = target.size.width as usize * 4;
    let format = target.format;

    target
        .data
        .par_chunks_mut(row_bytes)
        .take(rows)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            let src_row = if flip_vertically { dst_size.height - 1 - y } else { y };
            let v = source_coord(sy, sh, dst_size.height, src_row);
            for x in 0..cols {
                let u = source_coord(sx, sw, dst_size.width, x);
                let mut texel = to_texel(src.sample(mode, u, v));
                if swizzle {
                    texel.swap(0, 2);
                }
                let i = x as usize * 4;
                row[i..i + 4].copy_from_slice(&format.quantize(texel));
            }
        });
}

/// Converts `src_rect` of `src` to one plane of `logical` samples, packed
/// four samples per RGBA texel of `target`.
pub(crate) fn convert_plane(
    src: &SourceImage,
    mode: SampleMode,
    src_rect: [f32; 4],
    plane: Plane,
    logical: Size,
    target: &mut Surface,
) {
    if logical.is_empty() {
        return;
    }
    let [sx, sy, sw, sh] = src_rect;
    let weights = plane.weights();
    let rows = logical.height.min(target.size.height) as usize;
    let cols = logical.width.div_ceil(4).min(target.size.width);
    let row_bytes = target.size.width as usize * 4;

    target
        .data
        .par_chunks_mut(row_bytes)
        .take(rows)
        .enumerate()
        .for_each(|(y, row)| {
            let v = source_coord(sy, sh, logical.height, y as u32);
            for tx in 0..cols {
                for k in 0..4u32 {
                    let x = tx * 4 + k;
                    let sample = if x < logical.width {
                        let u = source_coord(sx, sw, logical.width, x);
                        let [r, g, b, _] = src.sample(mode, u, v);
                        to_u8(apply_weights(weights, [r / 255.0, g / 255.0, b / 255.0]))
                    } else {
                        0
                    };
                    row[tx as usize * 4 + k as usize] = sample;
                }
            }
        });
}
