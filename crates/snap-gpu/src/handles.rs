//! Scoped ownership of GPU objects and bind state.
//!
//! - [`ScopedGlObject`] owns one object name and deletes it on drop
//! - [`ScopedBinder`] binds an object to a target and restores the null
//!   binding on drop
//! - [`ScopedFlush`] flushes the command stream on drop
//!
//! Every wrapper is move-only and runs its release on every exit path,
//! including `?` propagation.
//!
//! # Example
//!
//! ```rust
//! use snap_gpu::handles::{ScopedTexture, ScopedTextureBinder};
//! use snap_gpu::{SoftDevice, TextureTarget};
//!
//! let device = SoftDevice::new();
//! {
//!     let texture = ScopedTexture::new(&device);
//!     let _bound = ScopedTextureBinder::new(&device, TextureTarget::Texture2D, texture.id());
//!     assert_eq!(device.stats().textures, 1);
//! }
//! assert_eq!(device.stats().textures, 0);
//! ```

use crate::device::{
    BufferId, BufferTarget, FramebufferId, FramebufferTarget, GlObjectId, GraphicsDevice,
    ProgramId, QueryId, ShaderId, TextureId, TextureTarget,
};

/// Owns one GPU object and deletes it when dropped.
///
/// The generate and delete calls are plain function pointers, usually
/// trait methods of the device (`D::gen_texture`, `D::delete_texture`).
pub struct ScopedGlObject<'d, D: GraphicsDevice, Id: GlObjectId> {
    device: &'d D,
    id: Id,
    delete: fn(&D, Id),
}

impl<'d, D: GraphicsDevice, Id: GlObjectId> ScopedGlObject<'d, D, Id> {
    /// Allocates a new object with `generate`.
    pub fn generate(device: &'d D, generate: fn(&D) -> Id, delete: fn(&D, Id)) -> Self {
        Self {
            device,
            id: generate(device),
            delete,
        }
    }

    /// Takes ownership of an existing object name.
    pub fn from_raw(device: &'d D, id: Id, delete: fn(&D, Id)) -> Self {
        Self { device, id, delete }
    }

    /// Object name, possibly null if allocation failed.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.id.is_null()
    }

    /// Releases ownership without deleting the object.
    pub fn into_raw(mut self) -> Id {
        std::mem::replace(&mut self.id, Id::NULL)
    }

    pub fn device(&self) -> &'d D {
        self.device
    }
}

impl<D: GraphicsDevice, Id: GlObjectId> Drop for ScopedGlObject<'_, D, Id> {
    fn drop(&mut self) {
        if !self.id.is_null() {
            (self.delete)(self.device, self.id);
        }
    }
}

impl<D: GraphicsDevice, Id: GlObjectId> std::fmt::Debug for ScopedGlObject<'_, D, Id> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ScopedGlObject").field(&self.id).finish()
    }
}

pub type ScopedTexture<'d, D> = ScopedGlObject<'d, D, TextureId>;
pub type ScopedFramebuffer<'d, D> = ScopedGlObject<'d, D, FramebufferId>;
pub type ScopedBuffer<'d, D> = ScopedGlObject<'d, D, BufferId>;
pub type ScopedQuery<'d, D> = ScopedGlObject<'d, D, QueryId>;
pub type ScopedShader<'d, D> = ScopedGlObject<'d, D, ShaderId>;
pub type ScopedProgram<'d, D> = ScopedGlObject<'d, D, ProgramId>;

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, TextureId> {
    pub fn new(device: &'d D) -> Self {
        Self::generate(device, D::gen_texture, D::delete_texture)
    }

    /// Adopts a texture created elsewhere (e.g. by consuming a mailbox).
    pub fn adopt(device: &'d D, id: TextureId) -> Self {
        Self::from_raw(device, id, D::delete_texture)
    }
}

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, FramebufferId> {
    pub fn new(device: &'d D) -> Self {
        Self::generate(device, D::gen_framebuffer, D::delete_framebuffer)
    }
}

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, BufferId> {
    pub fn new(device: &'d D) -> Self {
        Self::generate(device, D::gen_buffer, D::delete_buffer)
    }
}

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, QueryId> {
    pub fn new(device: &'d D) -> Self {
        Self::generate(device, D::gen_query, D::delete_query)
    }
}

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, ShaderId> {
    pub fn adopt(device: &'d D, id: ShaderId) -> Self {
        Self::from_raw(device, id, D::delete_shader)
    }
}

impl<'d, D: GraphicsDevice> ScopedGlObject<'d, D, ProgramId> {
    pub fn adopt(device: &'d D, id: ProgramId) -> Self {
        Self::from_raw(device, id, D::delete_program)
    }
}

/// Binds an object to a target for the lifetime of the guard.
pub struct ScopedBinder<'d, D: GraphicsDevice, T: Copy, Id: GlObjectId> {
    device: &'d D,
    target: T,
    bind: fn(&D, T, Id),
}

impl<'d, D: GraphicsDevice, T: Copy, Id: GlObjectId> ScopedBinder<'d, D, T, Id> {
    /// Binds `id` to `target` with `bind`.
    pub fn bind(device: &'d D, target: T, id: Id, bind: fn(&D, T, Id)) -> Self {
        bind(device, target, id);
        Self {
            device,
            target,
            bind,
        }
    }
}

impl<D: GraphicsDevice, T: Copy, Id: GlObjectId> Drop for ScopedBinder<'_, D, T, Id> {
    fn drop(&mut self) {
        (self.bind)(self.device, self.target, Id::NULL);
    }
}

pub type ScopedTextureBinder<'d, D> = ScopedBinder<'d, D, TextureTarget, TextureId>;
pub type ScopedFramebufferBinder<'d, D> = ScopedBinder<'d, D, FramebufferTarget, FramebufferId>;
pub type ScopedBufferBinder<'d, D> = ScopedBinder<'d, D, BufferTarget, BufferId>;

impl<'d, D: GraphicsDevice> ScopedBinder<'d, D, TextureTarget, TextureId> {
    pub fn new(device: &'d D, target: TextureTarget, id: TextureId) -> Self {
        Self::bind(device, target, id, D::bind_texture)
    }
}

impl<'d, D: GraphicsDevice> ScopedBinder<'d, D, FramebufferTarget, FramebufferId> {
    pub fn new(device: &'d D, target: FramebufferTarget, id: FramebufferId) -> Self {
        Self::bind(device, target, id, D::bind_framebuffer)
    }
}

impl<'d, D: GraphicsDevice> ScopedBinder<'d, D, BufferTarget, BufferId> {
    pub fn new(device: &'d D, target: BufferTarget, id: BufferId) -> Self {
        Self::bind(device, target, id, D::bind_buffer)
    }
}

/// Flushes the command stream when dropped.
pub struct ScopedFlush<'d, D: GraphicsDevice> {
    device: &'d D,
}

impl<'d, D: GraphicsDevice> ScopedFlush<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self { device }
    }
}

impl<D: GraphicsDevice> Drop for ScopedFlush<'_, D> {
    fn drop(&mut self) {
        self.device.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    #[test]
    fn test_scoped_object_deletes() {
        let device = SoftDevice::new();
        {
            let _fb = ScopedFramebuffer::new(&device);
            let _buf = ScopedBuffer::new(&device);
            let _query = ScopedQuery::new(&device);
            let stats = device.stats();
            assert_eq!((stats.framebuffers, stats.buffers, stats.queries), (1, 1, 1));
        }
        assert!(device.stats().is_clean());
    }

    #[test]
    fn test_into_raw_keeps_object() {
        let device = SoftDevice::new();
        let id = ScopedTexture::new(&device).into_raw();
        assert!(!id.is_null());
        assert_eq!(device.stats().textures, 1);
        device.delete_texture(id);
        assert_eq!(device.stats().textures, 0);
    }

    #[test]
    fn test_null_is_not_deleted() {
        let device = SoftDevice::new();
        let texture = ScopedTexture::adopt(&device, TextureId::NULL);
        assert!(texture.is_null());
        drop(texture);
        assert!(device.stats().is_clean());
    }

    #[test]
    fn test_binder_restores_null_on_error_path() {
        fn failing(device: &SoftDevice, id: FramebufferId) -> Result<(), ()> {
            let _bound = ScopedFramebufferBinder::new(device, FramebufferTarget::Framebuffer, id);
            Err(())
        }

        let device = SoftDevice::new();
        let fb = ScopedFramebuffer::new(&device);
        assert!(failing(&device, fb.id()).is_err());
        assert_eq!(device.bound_framebuffer(), FramebufferId::NULL);
    }
}
