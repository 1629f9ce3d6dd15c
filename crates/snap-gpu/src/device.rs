//! Graphics device capability trait.
//!
//! [`GraphicsDevice`] is the command-stream surface the helper consumes:
//! object allocation, bind points, texture storage and copies, programs and
//! draws, pixel transfers, completion queries, mailboxes and sync points.
//! Implementations serialize calls internally, so every method takes `&self`.
//!
//! The bind model follows GL: storage, sampler and copy calls act on the
//! texture bound to a [`TextureTarget`], attachment and read calls act on the
//! framebuffer bound to [`FramebufferTarget::Framebuffer`], and transfers go
//! to the buffer bound to [`BufferTarget::PixelPackTransfer`].

use snap_core::{PixelFormat, Rect, Size};

use crate::GpuResult;
use crate::mailbox::{Mailbox, SyncPoint};
use crate::shaders::ShaderType;

/// Extension advertising more than one draw buffer.
pub const EXT_DRAW_BUFFERS: &str = "GL_EXT_draw_buffers";

/// Extension allowing BGRA pixel readback.
pub const EXT_READ_FORMAT_BGRA: &str = "GL_EXT_read_format_bgra";

/// Extension providing mailbox texture sharing.
pub const CHROMIUM_TEXTURE_MAILBOX: &str = "GL_CHROMIUM_texture_mailbox";

/// Common behavior of GPU object names.
pub trait GlObjectId: Copy + Eq + std::fmt::Debug {
    /// The reserved "no object" name.
    const NULL: Self;

    /// Raw object name.
    fn raw(self) -> u32;

    /// Returns `true` for the reserved zero name.
    fn is_null(self) -> bool {
        self == Self::NULL
    }
}

macro_rules! gl_object_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub u32);

        impl $name {
            /// The reserved "no object" name.
            pub const NULL: Self = Self(0);

            /// Returns `true` for the reserved zero name.
            #[inline]
            pub const fn is_null(&self) -> bool {
                self.0 == 0
            }
        }

        impl GlObjectId for $name {
            const NULL: Self = Self(0);

            #[inline]
            fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

gl_object_id!(
    /// Texture object name.
    TextureId
);
gl_object_id!(
    /// Framebuffer object name.
    FramebufferId
);
gl_object_id!(
    /// Buffer object name.
    BufferId
);
gl_object_id!(
    /// Compiled shader name.
    ShaderId
);
gl_object_id!(
    /// Linked program name.
    ProgramId
);
gl_object_id!(
    /// Query object name.
    QueryId
);

/// Texture bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Texture2D,
}

/// Framebuffer bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramebufferTarget {
    Framebuffer,
}

/// Buffer bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Destination of asynchronous pixel readback.
    PixelPackTransfer,
}

/// Query kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTarget {
    /// Completes once every command issued before it has executed.
    CommandsCompleted,
}

/// Shader pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Integer device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlParam {
    MaxDrawBuffers,
    MaxTextureSize,
}

/// Texture filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Nearest,
    Linear,
}

/// Texture coordinate wrap mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Wrap {
    #[default]
    Repeat,
    ClampToEdge,
}

/// Sampling state of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerParams {
    pub min_filter: Filter,
    pub mag_filter: Filter,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
}

impl SamplerParams {
    /// Linear filtering with clamp-to-edge wrapping, required by every scale pass.
    pub const LINEAR_CLAMP: Self = Self {
        min_filter: Filter::Linear,
        mag_filter: Filter::Linear,
        wrap_s: Wrap::ClampToEdge,
        wrap_t: Wrap::ClampToEdge,
    };

    /// Returns `true` when either filter is linear.
    pub fn is_linear(&self) -> bool {
        self.min_filter == Filter::Linear || self.mag_filter == Filter::Linear
    }
}

/// One full-target draw.
///
/// The program samples `source` over `src_rect` (texel coordinates, origin
/// at the first stored row) and covers a logical output of `dst_size`
/// pixels in the bound framebuffer. Planar shaders pack four logical pixels
/// into each RGBA texel of their attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawCall {
    pub program: ProgramId,
    pub shader: ShaderType,
    pub source: TextureId,
    pub src_rect: [f32; 4],
    pub dst_size: Size,
    pub flip_vertically: bool,
    /// Swap red and blue on output.
    pub swizzle: bool,
}

impl DrawCall {
    /// Converts an integer rectangle to the `src_rect` form.
    pub fn rect_to_f32(rect: Rect) -> [f32; 4] {
        [
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        ]
    }
}

/// Command-stream capabilities consumed by the helper.
pub trait GraphicsDevice {
    // =========================================================================
    // Objects
    // =========================================================================

    /// Allocates a texture name. Returns [`TextureId::NULL`] on a lost context.
    fn gen_texture(&self) -> TextureId;
    fn delete_texture(&self, id: TextureId);
    fn gen_framebuffer(&self) -> FramebufferId;
    fn delete_framebuffer(&self, id: FramebufferId);
    fn gen_buffer(&self) -> BufferId;
    fn delete_buffer(&self, id: BufferId);
    fn gen_query(&self) -> QueryId;
    fn delete_query(&self, id: QueryId);

    // =========================================================================
    // Bind points
    // =========================================================================

    fn bind_texture(&self, target: TextureTarget, id: TextureId);
    fn bind_framebuffer(&self, target: FramebufferTarget, id: FramebufferId);
    fn bind_buffer(&self, target: BufferTarget, id: BufferId);

    // =========================================================================
    // Textures
    // =========================================================================

    /// (Re)allocates storage for the bound texture, optionally with RGBA8 or
    /// RGB565 initial contents.
    fn tex_image_2d(
        &self,
        target: TextureTarget,
        size: Size,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> GpuResult<()>;

    /// Sets sampling state of the bound texture.
    fn tex_parameters(&self, target: TextureTarget, params: SamplerParams);

    /// Copies `src` of the bound framebuffer into the bound texture at `(dst_x, dst_y)`.
    fn copy_tex_sub_image_2d(
        &self,
        target: TextureTarget,
        dst_x: u32,
        dst_y: u32,
        src: Rect,
    ) -> GpuResult<()>;

    /// Reallocates the bound texture to `src.size()` and copies `src` into it.
    fn copy_tex_image_2d(
        &self,
        target: TextureTarget,
        format: PixelFormat,
        src: Rect,
    ) -> GpuResult<()>;

    // =========================================================================
    // Framebuffers and draws
    // =========================================================================

    /// Attaches `texture` as color attachment `attachment` of the bound framebuffer.
    fn framebuffer_texture_2d(
        &self,
        target: FramebufferTarget,
        attachment: u32,
        texture: TextureId,
    );

    /// Enables the first `count` color attachments for drawing.
    fn draw_buffers(&self, count: u32) -> GpuResult<()>;

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> GpuResult<ShaderId>;
    fn delete_shader(&self, id: ShaderId);
    fn link_program(&self, vertex: ShaderId, fragment: ShaderId) -> GpuResult<ProgramId>;
    fn delete_program(&self, id: ProgramId);

    /// Draws into the bound framebuffer.
    fn draw(&self, call: &DrawCall) -> GpuResult<()>;

    // =========================================================================
    // Pixel transfers
    // =========================================================================

    /// Blocking read of `rect` from the bound framebuffer.
    fn read_pixels(&self, rect: Rect, format: PixelFormat, out: &mut [u8]) -> GpuResult<()>;

    /// Queues a read of `rect` into the bound pixel-pack buffer.
    fn read_pixels_to_buffer(&self, rect: Rect, format: PixelFormat) -> GpuResult<()>;

    /// Returns the contents of the buffer bound to `target`.
    fn map_buffer(&self, target: BufferTarget) -> GpuResult<Vec<u8>>;

    // =========================================================================
    // Queries
    // =========================================================================

    fn begin_query(&self, target: QueryTarget, id: QueryId);
    fn end_query(&self, target: QueryTarget);
    fn query_result_available(&self, id: QueryId) -> bool;

    // =========================================================================
    // Cross-context sharing
    // =========================================================================

    /// Generates a fresh mailbox name, empty on failure.
    fn gen_mailbox(&self) -> Mailbox;

    /// Publishes the bound texture's storage under `mailbox`.
    fn produce_texture(&self, target: TextureTarget, mailbox: &Mailbox) -> GpuResult<()>;

    /// Binds the storage published under `mailbox` to the bound texture.
    fn consume_texture(&self, target: TextureTarget, mailbox: &Mailbox) -> GpuResult<()>;

    fn insert_sync_point(&self) -> SyncPoint;

    /// Blocks this command stream until `sync_point` has passed.
    fn wait_sync_point(&self, sync_point: SyncPoint);

    // =========================================================================
    // Stream control and info
    // =========================================================================

    fn flush(&self);
    fn finish(&self);
    fn get_integer(&self, param: GlParam) -> u32;
    fn has_extension(&self, name: &str) -> bool;

    /// Readback format the bound framebuffer supports besides RGBA8.
    fn implementation_color_read_format(&self) -> PixelFormat;
    fn is_context_lost(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_ids() {
        assert!(TextureId::NULL.is_null());
        assert!(!TextureId(3).is_null());
        assert_eq!(<QueryId as GlObjectId>::NULL.raw(), 0);
        assert_eq!(FramebufferId(7).to_string(), "FramebufferId(7)");
    }

    #[test]
    fn test_sampler_defaults() {
        let params = SamplerParams::default();
        assert!(!params.is_linear());
        assert!(SamplerParams::LINEAR_CLAMP.is_linear());
        assert_eq!(SamplerParams::LINEAR_CLAMP.wrap_t, Wrap::ClampToEdge);
    }
}
