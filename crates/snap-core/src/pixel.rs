//! RGB to YUV conversion weights.
//!
//! Planar output uses BT.601 limited range ("studio swing"): luma spans
//! 16..=235 and chroma 16..=240 centered on 128. The weights operate on
//! normalized [0, 1] RGB and the fourth component is the constant offset,
//! which is the form the GPU conversion pass consumes.
//!
//! # Usage
//!
//! ```rust
//! use snap_core::pixel::{rgb_to_yuv, Plane};
//!
//! let [y, u, v] = rgb_to_yuv([1.0, 1.0, 1.0]);
//! assert!((y * 255.0 - 235.0).abs() < 0.5);
//! assert!((u - 0.5).abs() < 1e-4 && (v - 0.5).abs() < 1e-4);
//! assert_eq!(Plane::U.weights(), snap_core::pixel::BT601_U);
//! ```

/// Luma weights and offset.
pub const BT601_Y: [f32; 4] = [0.257, 0.504, 0.098, 0.0625];

/// Cb weights and offset.
pub const BT601_U: [f32; 4] = [-0.148, -0.291, 0.439, 0.5];

/// Cr weights and offset.
pub const BT601_V: [f32; 4] = [0.439, -0.368, -0.071, 0.5];

/// One plane of a planar YUV image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Luma, full resolution.
    Y,
    /// Blue-difference chroma, half resolution on both axes.
    U,
    /// Red-difference chroma, half resolution on both axes.
    V,
}

impl Plane {
    /// All planes in storage order.
    pub const ALL: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];

    /// Conversion weights for this plane.
    #[inline]
    pub const fn weights(&self) -> [f32; 4] {
        match self {
            Plane::Y => BT601_Y,
            Plane::U => BT601_U,
            Plane::V => BT601_V,
        }
    }

    /// Subsampling divisor on each axis (1 for luma, 2 for chroma).
    #[inline]
    pub const fn subsampling(&self) -> u32 {
        match self {
            Plane::Y => 1,
            Plane::U | Plane::V => 2,
        }
    }

    /// Plane index in a three-plane frame.
    #[inline]
    pub const fn index(&self) -> usize {
        match self {
            Plane::Y => 0,
            Plane::U => 1,
            Plane::V => 2,
        }
    }
}

/// Applies one plane's weights to a normalized RGB value.
#[inline]
pub fn apply_weights(weights: [f32; 4], rgb: [f32; 3]) -> f32 {
    weights[0] * rgb[0] + weights[1] * rgb[1] + weights[2] * rgb[2] + weights[3]
}

/// Converts a normalized RGB value to normalized (Y, U, V).
#[inline]
pub fn rgb_to_yuv(rgb: [f32; 3]) -> [f32; 3] {
    [
        apply_weights(BT601_Y, rgb),
        apply_weights(BT601_U, rgb),
        apply_weights(BT601_V, rgb),
    ]
}

/// Converts a normalized value to an 8-bit sample with rounding.
#[inline]
pub fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_black_is_studio_black() {
        let [y, u, v] = rgb_to_yuv([0.0, 0.0, 0.0]);
        assert_eq!(to_u8(y), 16);
        assert_abs_diff_eq!(u, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(v, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_red() {
        let [y, u, v] = rgb_to_yuv([1.0, 0.0, 0.0]);
        assert_eq!(to_u8(y), 81);
        assert_eq!(to_u8(u), 90);
        assert_eq!(to_u8(v), 239);
    }

    #[test]
    fn test_plane_props() {
        assert_eq!(Plane::Y.subsampling(), 1);
        assert_eq!(Plane::V.subsampling(), 2);
        assert_eq!(Plane::ALL.map(|p| p.index()), [0, 1, 2]);
    }
}
