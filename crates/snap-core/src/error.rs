//! Error types for snap-core.
//!
//! # Usage
//!
//! ```rust
//! use snap_core::{Error, Rect, Result, Size};
//!
//! fn check(rect: Rect, size: Size) -> Result<()> {
//!     if !rect.is_within(size) {
//!         return Err(Error::invalid_region(rect, size));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check(Rect::new(0, 0, 8, 8), Size::new(4, 4)).is_err());
//! ```

use thiserror::Error;

use crate::rect::{Rect, Size};

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by geometry and host-buffer validation.
#[derive(Debug, Error)]
pub enum Error {
    /// A rectangle does not fit the texture or frame it addresses.
    #[error("region ({rx}, {ry}, {rw}x{rh}) exceeds bounds {width}x{height}")]
    InvalidRegion {
        /// Region X origin
        rx: u32,
        /// Region Y origin
        ry: u32,
        /// Region width
        rw: u32,
        /// Region height
        rh: u32,
        /// Bounds width
        width: u32,
        /// Bounds height
        height: u32,
    },

    /// Dimensions are zero or violate a layout constraint.
    #[error("invalid dimensions: {width}x{height} ({reason})")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Why the dimensions were rejected
        reason: String,
    },

    /// A host buffer is smaller than the data it must receive.
    #[error("buffer too small: need {required} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes required
        required: usize,
        /// Bytes available
        actual: usize,
    },

    /// Catch-all with a message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Creates an [`Error::InvalidRegion`] for `rect` against `bounds`.
    #[inline]
    pub fn invalid_region(rect: Rect, bounds: Size) -> Self {
        Self::InvalidRegion {
            rx: rect.x,
            ry: rect.y,
            rw: rect.width,
            rh: rect.height,
            width: bounds.width,
            height: bounds.height,
        }
    }

    /// Creates an [`Error::InvalidDimensions`].
    #[inline]
    pub fn invalid_dimensions(width: u32, height: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDimensions {
            width,
            height,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::BufferTooSmall`].
    #[inline]
    pub fn buffer_too_small(required: usize, actual: usize) -> Self {
        Self::BufferTooSmall { required, actual }
    }

    /// Returns `true` for region and dimension errors.
    #[inline]
    pub fn is_geometry_error(&self) -> bool {
        matches!(self, Self::InvalidRegion { .. } | Self::InvalidDimensions { .. })
    }
}
