//! Host-side planar video frames.
//!
//! A [`VideoFrame`] is the CPU destination of a YUV readback. The frame owns
//! one buffer per plane; the readback writes rows straight into them.
//!
//! # Layouts
//!
//! - [`FrameFormat::Yv12`] - three planes: Y, U, V with 2x2 chroma subsampling
//! - [`FrameFormat::Nv12`] - two planes: Y and interleaved UV
//!
//! # Example
//!
//! ```rust
//! use snap_core::{FrameFormat, Size, VideoFrame};
//! use snap_core::pixel::Plane;
//!
//! let frame = VideoFrame::new(FrameFormat::Yv12, Size::new(64, 48)).unwrap();
//! assert_eq!(frame.plane(Plane::Y).size(), Size::new(64, 48));
//! assert_eq!(frame.plane(Plane::U).size(), Size::new(32, 24));
//! ```

use crate::error::{Error, Result};
use crate::pixel::Plane;
use crate::rect::Size;

/// Plane layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameFormat {
    /// Planar 4:2:0 with separate U and V planes.
    #[default]
    Yv12,
    /// Semi-planar 4:2:0 with interleaved chroma.
    Nv12,
}

impl FrameFormat {
    /// Number of planes the format stores.
    pub const fn plane_count(&self) -> usize {
        match self {
            Self::Yv12 => 3,
            Self::Nv12 => 2,
        }
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yv12 => f.write_str("YV12"),
            Self::Nv12 => f.write_str("NV12"),
        }
    }
}

/// One plane's bytes with its row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneBuffer {
    data: Vec<u8>,
    size: Size,
    stride: usize,
}

impl PlaneBuffer {
    fn new(size: Size, bytes_per_sample: usize) -> Self {
        let stride = size.width as usize * bytes_per_sample;
        Self {
            data: vec![0; stride * size.height as usize],
            size,
            stride,
        }
    }

    /// Plane dimensions in samples.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// All plane bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// All plane bytes, mutable.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// One row of the plane.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.stride]
    }

    /// One row of the plane, mutable.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride;
        &mut self.data[start..start + self.stride]
    }

    /// Fills the plane with one value.
    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }
}

/// A planar frame in host memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    format: FrameFormat,
    coded_size: Size,
    planes: Vec<PlaneBuffer>,
}

impl VideoFrame {
    /// Allocates a zeroed frame.
    ///
    /// Both dimensions must be even and non-zero for 4:2:0 subsampling.
    pub fn new(format: FrameFormat, coded_size: Size) -> Result<Self> {
        if coded_size.is_empty() || !coded_size.is_even() {
            return Err(Error::invalid_dimensions(
                coded_size.width,
                coded_size.height,
                "4:2:0 frames need even, non-zero dimensions",
            ));
        }
        let chroma = Size::new(coded_size.width / 2, coded_size.height / 2);
        let planes = match format {
            FrameFormat::Yv12 => vec![
                PlaneBuffer::new(coded_size, 1),
                PlaneBuffer::new(chroma, 1),
                PlaneBuffer::new(chroma, 1),
            ],
            FrameFormat::Nv12 => vec![PlaneBuffer::new(coded_size, 1), PlaneBuffer::new(chroma, 2)],
        };
        Ok(Self {
            format,
            coded_size,
            planes,
        })
    }

    /// Plane layout.
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Full frame size (the luma plane size).
    pub fn coded_size(&self) -> Size {
        self.coded_size
    }

    /// Returns a plane.
    ///
    /// For NV12, `U` and `V` both address the interleaved chroma plane.
    pub fn plane(&self, plane: Plane) -> &PlaneBuffer {
        &self.planes[self.storage_index(plane)]
    }

    /// Returns a plane, mutable.
    pub fn plane_mut(&mut self, plane: Plane) -> &mut PlaneBuffer {
        let index = self.storage_index(plane);
        &mut self.planes[index]
    }

    /// Total bytes across planes.
    pub fn size_bytes(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }

    /// Writes the planes in storage order (Y, U, V for YV12) to one buffer.
    pub fn to_planar_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        for plane in &self.planes {
            out.extend_from_slice(&plane.data);
        }
        out
    }

    fn storage_index(&self, plane: Plane) -> usize {
        match self.format {
            FrameFormat::Yv12 => plane.index(),
            FrameFormat::Nv12 => plane.index().min(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yv12_layout() {
        let frame = VideoFrame::new(FrameFormat::Yv12, Size::new(8, 4)).unwrap();
        assert_eq!(frame.plane(Plane::Y).stride(), 8);
        assert_eq!(frame.plane(Plane::V).size(), Size::new(4, 2));
        assert_eq!(frame.size_bytes(), 32 + 8 + 8);
    }

    #[test]
    fn test_nv12_layout() {
        let frame = VideoFrame::new(FrameFormat::Nv12, Size::new(8, 4)).unwrap();
        assert_eq!(frame.plane(Plane::U).stride(), 8);
        assert_eq!(frame.format().plane_count(), 2);
    }

    #[test]
    fn test_odd_size_rejected() {
        let err = VideoFrame::new(FrameFormat::Yv12, Size::new(101, 100)).unwrap_err();
        assert!(err.to_string().contains("101x100"));
    }

    #[test]
    fn test_rows() {
        let mut frame = VideoFrame::new(FrameFormat::Yv12, Size::new(4, 2)).unwrap();
        frame.plane_mut(Plane::Y).row_mut(1).copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(frame.plane(Plane::Y).row(1), &[1, 2, 3, 4]);
        assert_eq!(frame.plane(Plane::Y).row(0), &[0, 0, 0, 0]);
    }
}
