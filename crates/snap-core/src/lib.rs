//! # snap-core
//!
//! Host-side types for GPU snapshot and readback.
//!
//! - [`Size`], [`Rect`] - Texture and sub-rectangle geometry
//! - [`Region`] - Damage regions (disjoint rectangle sets)
//! - [`PixelFormat`] - Texel byte layouts for storage and readback
//! - [`VideoFrame`] - Planar YUV destination frames
//! - [`pixel`] - BT.601 conversion weights shared by the GPU passes
//!
//! ## Crate Structure
//!
//! ```text
//! snap-core (this crate)
//!    ^
//!    |
//!    +-- snap-gpu (device trait, scaler, readback, mailboxes)
//!    +-- snap-cli
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod frame;
pub mod pixel;
pub mod rect;
pub mod region;

pub use error::{Error, Result};
pub use format::PixelFormat;
pub use frame::{FrameFormat, PlaneBuffer, VideoFrame};
pub use pixel::Plane;
pub use rect::{Rect, Size};
pub use region::Region;
