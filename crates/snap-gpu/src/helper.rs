//! The copy/readback orchestrator.
//!
//! [`GlHelper`] owns one command stream's worth of helper state: a lazily
//! built [`ScalerFactory`], an LRU cache of scalers for crop/scale readbacks,
//! the asynchronous readback queue and the RGB565 capability probe.
//!
//! Every entry point leaves the device's bindings as it found them (null
//! objects bound) and releases every temporary it allocated, whether it
//! succeeds or not.
//!
//! # Completion
//!
//! Asynchronous calls return as soon as their transfers are queued. Their
//! callbacks run from [`GlHelper::process_completed_readbacks`] (or
//! [`GlHelper::finish`]) in issue order. Dropping the helper fails every
//! pending callback with `false`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::PoisonError;

use snap_core::{Error, PixelFormat, Rect, Region, Size};
use tracing::{debug, trace, warn};

use crate::cache::{CacheStats, LruCache};
use crate::config::HelperConfig;
use crate::device::{
    EXT_DRAW_BUFFERS, EXT_READ_FORMAT_BGRA, FramebufferTarget, GlParam, GraphicsDevice,
    SamplerParams, ShaderId, ShaderStage, TextureId, TextureTarget,
};
use crate::handles::{
    ScopedFlush, ScopedFramebuffer, ScopedFramebufferBinder, ScopedTexture, ScopedTextureBinder,
};
use crate::mailbox::{Mailbox, MailboxHolder, SyncPoint};
use crate::readback::{
    PendingReadback, ReadbackCallback, ReadbackDestination, ReadbackPart, ReadbackQueue,
    SharedPixels, dispatch,
};
use crate::scaler::{Scaler, ScalerFactory, ScalerInterface, ScalerQuality, allocate_texture};
use crate::yuv::{ReadbackYuvInterface, ReadbackYuvPipeline};
use crate::{GpuError, GpuResult};

/// Geometry and output format of a crop/scale readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropScaleRequest {
    /// Size of the source texture.
    pub src_size: Size,
    /// Region of the source to read.
    pub src_subrect: Rect,
    /// Output size; `src_subrect` is scaled to exactly this.
    pub dst_size: Size,
    /// `None` uses [`HelperConfig::default_quality`].
    pub quality: Option<ScalerQuality>,
    /// `Bgra8`, `Rgba8` or `Rgb565`.
    pub format: PixelFormat,
}

impl CropScaleRequest {
    pub fn new(src_size: Size, src_subrect: Rect, dst_size: Size) -> Self {
        Self {
            src_size,
            src_subrect,
            dst_size,
            quality: None,
            format: PixelFormat::Bgra8,
        }
    }

    pub fn with_quality(mut self, quality: ScalerQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Bytes the destination buffer must hold.
    pub fn output_bytes(&self) -> usize {
        self.format
            .image_bytes(self.dst_size.width, self.dst_size.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ScalerKey {
    quality: ScalerQuality,
    src_size: Size,
    src_subrect: Rect,
    dst_size: Size,
    flip_vertically: bool,
    swizzle: bool,
}

/// Crop, scale, convert and read back textures on one command stream.
pub struct GlHelper<'d, D: GraphicsDevice> {
    device: &'d D,
    config: HelperConfig,
    factory: Option<ScalerFactory<'d, D>>,
    scalers: LruCache<ScalerKey, Scaler<'d, D>>,
    queue: Rc<RefCell<ReadbackQueue<'d, D>>>,
    rgb565_support: Cell<Option<bool>>,
}

impl<'d, D: GraphicsDevice> GlHelper<'d, D> {
    /// Helper with [`HelperConfig::default`].
    pub fn new(device: &'d D) -> Self {
        Self::with_config(device, HelperConfig::default())
    }

    pub fn with_config(device: &'d D, config: HelperConfig) -> Self {
        debug!(?config, "GlHelper created");
        Self {
            device,
            scalers: LruCache::with_capacity(config.scaler_cache_capacity),
            config,
            factory: None,
            queue: Rc::new(RefCell::new(ReadbackQueue::new(device))),
            rgb565_support: Cell::new(None),
        }
    }

    pub fn device(&self) -> &'d D {
        self.device
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    /// Hit/miss statistics of the crop/scale scaler cache.
    pub fn scaler_cache_stats(&self) -> CacheStats {
        self.scalers.stats()
    }

    fn factory(&mut self) -> &mut ScalerFactory<'d, D> {
        let device = self.device;
        self.factory.get_or_insert_with(|| ScalerFactory::new(device))
    }

    /// Device format and CPU red/blue swap needed to deliver `format`.
    fn transfer_format(&self, format: PixelFormat) -> (PixelFormat, bool) {
        match format {
            PixelFormat::Bgra8 if !self.device.has_extension(EXT_READ_FORMAT_BGRA) => {
                (PixelFormat::Rgba8, true)
            }
            other => (other, false),
        }
    }

    fn framebuffer(&self) -> GpuResult<ScopedFramebuffer<'d, D>> {
        let framebuffer = ScopedFramebuffer::new(self.device);
        if framebuffer.is_null() {
            return Err(GpuError::ContextLost);
        }
        Ok(framebuffer)
    }

    // === Readback ===

    /// Blocking read of `src_rect` of `texture` into `out`.
    pub fn readback_texture_sync(
        &self,
        texture: TextureId,
        src_rect: Rect,
        out: &mut [u8],
        format: PixelFormat,
    ) -> GpuResult<()> {
        let required = format.image_bytes(src_rect.width, src_rect.height);
        if out.len() < required {
            return Err(Error::buffer_too_small(required, out.len()).into());
        }
        let (read_format, swap_red_blue) = self.transfer_format(format);

        let framebuffer = self.framebuffer()?;
        let _bound = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            framebuffer.id(),
        );
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, texture);
        self.device.read_pixels(src_rect, read_format, out)?;
        if swap_red_blue {
            for texel in out[..required].chunks_exact_mut(4) {
                texel.swap(0, 2);
            }
        }
        Ok(())
    }

    /// Queues a read of the top-left `dst_size` pixels of `texture` into `out`.
    ///
    /// Returns once the transfer is queued. `callback` receives `true` after
    /// the data has landed, or `false` if the context is lost or the helper
    /// is dropped first.
    pub fn readback_texture_async(
        &self,
        texture: TextureId,
        dst_size: Size,
        out: SharedPixels,
        format: PixelFormat,
        callback: ReadbackCallback,
    ) -> GpuResult<()> {
        let required = format.image_bytes(dst_size.width, dst_size.height);
        let available = out.lock().unwrap_or_else(PoisonError::into_inner).len();
        if available < required {
            return Err(Error::buffer_too_small(required, available).into());
        }
        let (read_format, swap_red_blue) = self.transfer_format(format);

        let _flush = ScopedFlush::new(self.device);
        let framebuffer = self.framebuffer()?;
        let _bound = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            framebuffer.id(),
        );
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, texture);
        let part = ReadbackPart::issue(
            self.device,
            Rect::from_size(dst_size),
            read_format,
            ReadbackDestination::Pixels { out, swap_red_blue },
        )?;
        self.queue
            .borrow_mut()
            .push(PendingReadback::new(vec![part], callback))
    }

    /// Crops, scales and reads back `src`, releasing every intermediate.
    ///
    /// The scaler for the request's geometry is cached. The caller's texture
    /// is not deleted; its sampling state is set to linear clamp.
    pub fn crop_scale_readback_and_clean_texture(
        &mut self,
        src: TextureId,
        request: &CropScaleRequest,
        out: SharedPixels,
        callback: ReadbackCallback,
    ) -> GpuResult<()> {
        let required = request.output_bytes();
        let available = out.lock().unwrap_or_else(PoisonError::into_inner).len();
        if available < required {
            return Err(Error::buffer_too_small(required, available).into());
        }

        let (read_format, swizzle) = match request.format {
            PixelFormat::Rgb565 if !self.can_use_rgb565_readback() => {
                return Err(GpuError::UnsupportedReadbackFormat(PixelFormat::Rgb565));
            }
            PixelFormat::Bgra8 if !self.device.has_extension(EXT_READ_FORMAT_BGRA) => {
                (PixelFormat::Rgba8, true)
            }
            format => (format, false),
        };
        let storage = match request.format {
            PixelFormat::Rgb565 => PixelFormat::Rgb565,
            _ => PixelFormat::Rgba8,
        };
        let key = ScalerKey {
            quality: request.quality.unwrap_or(self.config.default_quality),
            src_size: request.src_size,
            src_subrect: request.src_subrect,
            dst_size: request.dst_size,
            flip_vertically: self.config.flip_readback,
            swizzle,
        };

        let device = self.device;
        let _flush = ScopedFlush::new(device);
        let factory = self.factory.get_or_insert_with(|| ScalerFactory::new(device));
        let scaler = self.scalers.get_or_try_insert_with(key, || {
            factory.create(
                key.quality,
                key.src_size,
                key.src_subrect,
                key.dst_size,
                key.flip_vertically,
                key.swizzle,
            )
        })?;

        let scaled = allocate_texture(device, request.dst_size, storage)?;
        scaler.scale(src, scaled.id())?;

        let framebuffer = ScopedFramebuffer::new(device);
        if framebuffer.is_null() {
            return Err(GpuError::ContextLost);
        }
        let _bound =
            ScopedFramebufferBinder::new(device, FramebufferTarget::Framebuffer, framebuffer.id());
        device.framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, scaled.id());
        let part = ReadbackPart::issue(
            device,
            Rect::from_size(request.dst_size),
            read_format,
            ReadbackDestination::Pixels {
                out,
                swap_red_blue: false,
            },
        )?;
        trace!(src = %src, dst = %request.dst_size, format = %request.format, "crop/scale readback queued");
        self.queue
            .borrow_mut()
            .push(PendingReadback::new(vec![part], callback))
    }

    /// Like [`Self::crop_scale_readback_and_clean_texture`], reading the
    /// texture published under `mailbox` after waiting on `sync_point`.
    pub fn crop_scale_readback_and_clean_mailbox(
        &mut self,
        mailbox: &Mailbox,
        sync_point: SyncPoint,
        request: &CropScaleRequest,
        out: SharedPixels,
        callback: ReadbackCallback,
    ) -> GpuResult<()> {
        let id = self.consume_mailbox_to_texture(mailbox, sync_point);
        if id.is_null() {
            return Err(if self.device.is_context_lost() {
                GpuError::ContextLost
            } else {
                GpuError::InvalidMailbox
            });
        }
        let source = ScopedTexture::adopt(self.device, id);
        self.crop_scale_readback_and_clean_texture(source.id(), request, out, callback)
    }

    /// Runs callbacks of completed readbacks in issue order.
    ///
    /// Returns the number of callbacks run.
    pub fn process_completed_readbacks(&self) -> usize {
        let completed = self.queue.borrow_mut().take_completed();
        dispatch(completed)
    }

    /// Readbacks whose callbacks have not run yet.
    pub fn pending_readbacks(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Blocks until the device is idle, then runs completed callbacks.
    pub fn finish(&self) -> usize {
        self.device.finish();
        self.process_completed_readbacks()
    }

    // === Copies ===

    /// Returns a new texture holding a copy of `texture`.
    ///
    /// The caller owns the result.
    pub fn copy_texture(&mut self, texture: TextureId, size: Size) -> GpuResult<TextureId> {
        self.copy_and_scale_texture(texture, size, size, false, ScalerQuality::Fast)
    }

    /// Returns a new `dst_size` texture holding `texture` scaled.
    ///
    /// The caller owns the result.
    pub fn copy_and_scale_texture(
        &mut self,
        texture: TextureId,
        src_size: Size,
        dst_size: Size,
        flip_vertically: bool,
        quality: ScalerQuality,
    ) -> GpuResult<TextureId> {
        let scaler = self.factory().create(
            quality,
            src_size,
            Rect::from_size(src_size),
            dst_size,
            flip_vertically,
            false,
        )?;
        let dst = allocate_texture(self.device, dst_size, PixelFormat::Rgba8)?;
        scaler.scale(texture, dst.id())?;
        Ok(dst.into_raw())
    }

    /// Generates a texture with linear clamp sampling and no storage.
    pub fn create_texture(&self) -> TextureId {
        let texture = self.device.gen_texture();
        if texture.is_null() {
            return texture;
        }
        let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
        self.device
            .tex_parameters(TextureTarget::Texture2D, SamplerParams::LINEAR_CLAMP);
        texture
    }

    pub fn delete_texture(&self, texture: TextureId) {
        if !texture.is_null() {
            self.device.delete_texture(texture);
        }
    }

    /// Reallocates `texture` as uninitialized RGBA8 storage of `size`.
    pub fn resize_texture(&self, texture: TextureId, size: Size) -> GpuResult<()> {
        let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
        self.device
            .tex_image_2d(TextureTarget::Texture2D, size, PixelFormat::Rgba8, None)
    }

    /// Copies `rect` of the bound framebuffer into the same rect of `texture`.
    pub fn copy_texture_sub_image(&self, texture: TextureId, rect: Rect) -> GpuResult<()> {
        let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
        self.device
            .copy_tex_sub_image_2d(TextureTarget::Texture2D, rect.x, rect.y, rect)
    }

    /// Replaces `texture` with the top-left `size` of the bound framebuffer.
    pub fn copy_texture_full_image(&self, texture: TextureId, size: Size) -> GpuResult<()> {
        let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
        self.device.copy_tex_image_2d(
            TextureTarget::Texture2D,
            PixelFormat::Rgba8,
            Rect::from_size(size),
        )
    }

    /// Copies the part of `old_damage` not covered by `new_damage` from
    /// `previous_texture` into `texture`.
    ///
    /// Issues no device commands when `new_damage` covers `old_damage`.
    pub fn copy_sub_buffer_damage(
        &self,
        texture: TextureId,
        previous_texture: TextureId,
        new_damage: &Region,
        old_damage: &Region,
    ) -> GpuResult<()> {
        let stale = old_damage.difference(new_damage);
        if stale.is_empty() {
            return Ok(());
        }

        let framebuffer = self.framebuffer()?;
        let _fb = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            framebuffer.id(),
        );
        let _tex = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, previous_texture);
        for rect in stale.iter() {
            self.device
                .copy_tex_sub_image_2d(TextureTarget::Texture2D, rect.x, rect.y, *rect)?;
        }
        trace!(rects = stale.rects().len(), area = stale.area(), "damage copied");
        Ok(())
    }

    /// Compiles `source`, returning the null shader on failure.
    pub fn compile_shader_from_source(&self, source: &str, stage: ShaderStage) -> ShaderId {
        match self.device.compile_shader(stage, source) {
            Ok(id) => id,
            Err(err) => {
                warn!(?stage, error = %err, "Shader compilation failed");
                ShaderId::NULL
            }
        }
    }

    // === Sharing ===

    pub fn insert_sync_point(&self) -> SyncPoint {
        self.device.insert_sync_point()
    }

    pub fn wait_sync_point(&self, sync_point: SyncPoint) {
        self.device.wait_sync_point(sync_point);
    }

    /// Publishes `texture` under a fresh mailbox with a sync point to wait on.
    ///
    /// Returns an empty holder on failure.
    pub fn produce_mailbox_from_texture(&self, texture: TextureId) -> MailboxHolder {
        let mailbox = self.device.gen_mailbox();
        if mailbox.is_empty() {
            warn!(%texture, "No mailbox available");
            return MailboxHolder::default();
        }
        {
            let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture);
            if let Err(err) = self
                .device
                .produce_texture(TextureTarget::Texture2D, &mailbox)
            {
                warn!(%texture, error = %err, "Failed to produce mailbox");
                return MailboxHolder::default();
            }
        }
        MailboxHolder::new(mailbox, self.device.insert_sync_point())
    }

    /// Waits on `sync_point`, then returns a new texture sharing the storage
    /// published under `mailbox`.
    ///
    /// Returns the null texture on failure. The caller owns the result.
    pub fn consume_mailbox_to_texture(&self, mailbox: &Mailbox, sync_point: SyncPoint) -> TextureId {
        if mailbox.is_empty() {
            return TextureId::NULL;
        }
        self.device.wait_sync_point(sync_point);
        let texture = ScopedTexture::new(self.device);
        if texture.is_null() {
            return TextureId::NULL;
        }
        let consumed = {
            let _bound =
                ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture.id());
            self.device.consume_texture(TextureTarget::Texture2D, mailbox)
        };
        match consumed {
            Ok(()) => texture.into_raw(),
            Err(err) => {
                warn!(%mailbox, error = %err, "Failed to consume mailbox");
                TextureId::NULL
            }
        }
    }

    // === Capabilities ===

    /// Draw buffers usable for multi-target output; 0 without the extension.
    pub fn max_draw_buffers(&self) -> u32 {
        if !self.device.has_extension(EXT_DRAW_BUFFERS) {
            return 0;
        }
        self.device.get_integer(GlParam::MaxDrawBuffers)
    }

    /// Returns `true` when RGB565 framebuffers can be read as RGB565.
    ///
    /// Probed once with a 1x1 framebuffer and cached.
    pub fn can_use_rgb565_readback(&self) -> bool {
        if let Some(supported) = self.rgb565_support.get() {
            return supported;
        }
        let supported = self.probe_rgb565().unwrap_or_else(|err| {
            debug!(error = %err, "RGB565 probe failed");
            false
        });
        debug!(supported, "RGB565 readback probed");
        self.rgb565_support.set(Some(supported));
        supported
    }

    fn probe_rgb565(&self) -> GpuResult<bool> {
        let texture = allocate_texture(self.device, Size::new(1, 1), PixelFormat::Rgb565)?;
        let framebuffer = self.framebuffer()?;
        let _bound = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            framebuffer.id(),
        );
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, texture.id());
        Ok(self.device.implementation_color_read_format() == PixelFormat::Rgb565)
    }

    // === Factories ===

    /// Builds a standalone scaler; see [`ScalerFactory::create`].
    pub fn create_scaler(
        &mut self,
        quality: ScalerQuality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        flip_vertically: bool,
        swizzle: bool,
    ) -> GpuResult<Box<dyn ScalerInterface + 'd>> {
        let scaler = self.factory().create(
            quality,
            src_size,
            src_subrect,
            dst_size,
            flip_vertically,
            swizzle,
        )?;
        Ok(Box::new(scaler))
    }

    /// Builds a YUV readback pipeline sharing this helper's readback queue.
    ///
    /// The multi-target path is used when `use_mrt` is set, the
    /// configuration allows it and the device has three draw buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn create_readback_pipeline_yuv(
        &mut self,
        quality: ScalerQuality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        dst_subrect: Rect,
        flip_vertically: bool,
        use_mrt: bool,
    ) -> GpuResult<Box<dyn ReadbackYuvInterface + 'd>> {
        let mrt = use_mrt && self.config.allow_mrt && self.max_draw_buffers() >= 3;
        if use_mrt && !mrt {
            debug!(
                max_draw_buffers = self.max_draw_buffers(),
                allowed = self.config.allow_mrt,
                "Multi-target YUV not available"
            );
        }
        let device = self.device;
        let queue = Rc::clone(&self.queue);
        let pipeline = ReadbackYuvPipeline::new(
            device,
            self.factory(),
            queue,
            quality,
            src_size,
            src_subrect,
            dst_size,
            dst_subrect,
            flip_vertically,
            mrt,
        )?;
        Ok(Box::new(pipeline))
    }
}

impl<D: GraphicsDevice> Drop for GlHelper<'_, D> {
    fn drop(&mut self) {
        let pending = self.queue.borrow_mut().close();
        if !pending.is_empty() {
            warn!(count = pending.len(), "GlHelper dropped with pending readbacks");
        }
        for readback in pending {
            readback.fail();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftDevice;

    #[test]
    fn test_request_defaults() {
        let request = CropScaleRequest::new(Size::new(8, 8), Rect::new(0, 0, 8, 8), Size::new(4, 2));
        assert_eq!(request.format, PixelFormat::Bgra8);
        assert_eq!(request.quality, None);
        assert_eq!(request.output_bytes(), 32);
        assert_eq!(
            request.with_format(PixelFormat::Rgb565).output_bytes(),
            16
        );
    }

    #[test]
    fn test_transfer_format() {
        let device = SoftDevice::builder().bgra_readback(false).build();
        let helper = GlHelper::new(&device);
        assert_eq!(
            helper.transfer_format(PixelFormat::Bgra8),
            (PixelFormat::Rgba8, true)
        );

        let device = SoftDevice::new();
        let helper = GlHelper::new(&device);
        assert_eq!(
            helper.transfer_format(PixelFormat::Bgra8),
            (PixelFormat::Bgra8, false)
        );
    }

    #[test]
    fn test_rgb565_probe_is_cached() {
        let device = SoftDevice::new();
        let helper = GlHelper::new(&device);
        assert!(helper.can_use_rgb565_readback());
        device.lose_context();
        assert!(helper.can_use_rgb565_readback());

        let device = SoftDevice::builder().rgb565_readback(false).build();
        let helper = GlHelper::new(&device);
        assert!(!helper.can_use_rgb565_readback());
        assert!(device.stats().is_clean());
    }

    #[test]
    fn test_max_draw_buffers() {
        let device = SoftDevice::builder().max_draw_buffers(1).build();
        assert_eq!(GlHelper::new(&device).max_draw_buffers(), 0);

        let device = SoftDevice::builder().max_draw_buffers(4).build();
        assert_eq!(GlHelper::new(&device).max_draw_buffers(), 4);
    }

    #[test]
    fn test_scaler_cache_reuse() {
        let device = SoftDevice::new();
        let src = device
            .create_texture_with_data(Size::new(16, 16), PixelFormat::Rgba8, &[0; 16 * 16 * 4])
            .unwrap();
        let mut helper = GlHelper::new(&device);
        let request =
            CropScaleRequest::new(Size::new(16, 16), Rect::new(0, 0, 16, 16), Size::new(4, 4));
        for _ in 0..3 {
            let out = std::sync::Arc::new(std::sync::Mutex::new(vec![0; 64]));
            helper
                .crop_scale_readback_and_clean_texture(src, &request, out, Box::new(|_| {}))
                .unwrap();
        }
        let stats = helper.scaler_cache_stats();
        assert_eq!((stats.misses, stats.hits, stats.entries), (1, 2, 1));
    }
}
