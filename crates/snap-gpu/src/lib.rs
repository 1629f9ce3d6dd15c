//! GPU texture crop, scale, YUV conversion and readback.
//!
//! Produces thumbnails and video frames from rendered surfaces: crops a
//! source texture, scales it through a cached chain of passes, optionally
//! converts it to planar YUV, and reads the result back to host memory
//! without disturbing the caller's GPU state.
//!
//! # Architecture
//!
//! ```text
//! GlHelper (orchestrator)
//!     ├── ScalerFactory ── Scaler (FAST / GOOD / BEST pass chains)
//!     ├── ReadbackYuvPipeline (Scaler + Y/U/V planar passes, MRT)
//!     ├── ReadbackQueue (async transfers + completion queries)
//!     └── GraphicsDevice trait
//!             └── SoftDevice (CPU reference device, rayon)
//! ```
//!
//! Every GPU object the helper allocates is owned by a scoped handle from
//! [`handles`], so early returns never leak objects or bind state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use snap_core::{PixelFormat, Rect, Size};
//! use snap_gpu::{CropScaleRequest, GlHelper, ScalerQuality, SoftDevice};
//!
//! let device = SoftDevice::new();
//! let src = device
//!     .create_texture_with_data(Size::new(8, 8), PixelFormat::Rgba8, &[200; 8 * 8 * 4])
//!     .unwrap();
//!
//! let mut helper = GlHelper::new(&device);
//! let request = CropScaleRequest::new(Size::new(8, 8), Rect::new(0, 0, 8, 8), Size::new(2, 2))
//!     .with_quality(ScalerQuality::Good);
//! let out = Arc::new(Mutex::new(vec![0u8; 2 * 2 * 4]));
//! helper
//!     .crop_scale_readback_and_clean_texture(src, &request, out.clone(), Box::new(|ok| assert!(ok)))
//!     .unwrap();
//!
//! helper.finish();
//! assert_eq!(out.lock().unwrap()[0], 200);
//! ```

pub mod cache;
pub mod config;
pub mod device;
pub mod handles;
pub mod helper;
pub mod mailbox;
pub mod readback;
pub mod scaler;
pub mod shaders;
pub mod soft;
pub mod yuv;

pub use cache::{CacheStats, LruCache};
pub use config::HelperConfig;
pub use device::{
    BufferId, BufferTarget, DrawCall, Filter, FramebufferId, FramebufferTarget, GlObjectId,
    GlParam, GraphicsDevice, ProgramId, QueryId, QueryTarget, SamplerParams, ShaderId,
    ShaderStage, TextureId, TextureTarget, Wrap,
};
pub use helper::{CropScaleRequest, GlHelper};
pub use mailbox::{Mailbox, MailboxHolder, SyncPoint};
pub use readback::{ReadbackCallback, SharedFrame, SharedPixels};
pub use scaler::{ScaleStage, Scaler, ScalerInterface, ScalerQuality, compute_scaler_stages};
pub use shaders::ShaderType;
pub use soft::{ShareGroup, SoftDevice, SoftDeviceBuilder, SoftStats};
pub use yuv::{ReadbackYuvInterface, ReadbackYuvPipeline};

use snap_core::{PixelFormat, Size};
use thiserror::Error;

/// GPU helper errors.
#[derive(Error, Debug)]
pub enum GpuError {
    #[error(transparent)]
    Core(#[from] snap_core::Error),

    #[error("graphics context lost")]
    ContextLost,

    #[error("out of texture memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("texture too large: {width}x{height} exceeds device limit {limit}")]
    TextureTooLarge { width: u32, height: u32, limit: u32 },

    #[error("failed to compile shader: {0}")]
    ShaderCompilation(String),

    #[error("failed to link program: {0}")]
    ProgramLink(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("readback format {0} not supported by this device")]
    UnsupportedReadbackFormat(PixelFormat),

    #[error("invalid YUV geometry: {0}")]
    InvalidYuvGeometry(String),

    #[error("destination frame mismatch: {0}")]
    FrameMismatch(String),

    #[error("mailbox could not be consumed")]
    InvalidMailbox,

    #[error("helper destroyed")]
    HelperDestroyed,
}

impl GpuError {
    /// Creates an [`GpuError::InvalidOperation`].
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Creates a [`GpuError::TextureTooLarge`] for `size` against `limit`.
    pub fn texture_too_large(size: Size, limit: u32) -> Self {
        Self::TextureTooLarge {
            width: size.width,
            height: size.height,
            limit,
        }
    }

    /// Returns `true` when a lower scaler quality may still succeed.
    ///
    /// Allocation failures and shader failures are capability shortfalls;
    /// context loss and contract violations are not.
    pub fn is_capability_shortfall(&self) -> bool {
        matches!(
            self,
            Self::OutOfMemory { .. }
                | Self::TextureTooLarge { .. }
                | Self::ShaderCompilation(_)
                | Self::ProgramLink(_)
        )
    }
}

/// Result alias for GPU helper operations.
pub type GpuResult<T> = Result<T, GpuError>;
