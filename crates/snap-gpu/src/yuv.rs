//! Scaled YUV 4:2:0 readback.
//!
//! A [`ReadbackYuvPipeline`] scales a shared texture into an intermediate of
//! `dst_subrect` size, converts it to Y, U and V planes packed four samples
//! per RGBA texel, and reads the planes back into a YV12 [`VideoFrame`].
//! With three draw buffers the planes come from one multi-target draw,
//! otherwise from three planar passes over the same intermediate.
//!
//! [`VideoFrame`]: snap_core::VideoFrame

use std::cell::RefCell;
use std::rc::Rc;

use snap_core::pixel::Plane;
use snap_core::{FrameFormat, PixelFormat, Rect, Size};
use tracing::{debug, trace, warn};

use crate::device::{DrawCall, FramebufferTarget, GraphicsDevice, TextureId, TextureTarget};
use crate::handles::{
    ScopedFlush, ScopedFramebuffer, ScopedFramebufferBinder, ScopedTexture, ScopedTextureBinder,
};
use crate::mailbox::{Mailbox, SyncPoint};
use crate::readback::{
    PendingReadback, ReadbackCallback, ReadbackDestination, ReadbackPart, ReadbackQueue,
    SharedFrame,
};
use crate::scaler::{Scaler, ScalerFactory, ScalerInterface, ScalerQuality, allocate_texture};
use crate::shaders::{ShaderProgram, ShaderType};
use crate::{GpuError, GpuResult};

/// Operations of a built YUV readback pipeline.
pub trait ReadbackYuvInterface {
    /// Reads the texture behind `mailbox` into `frame` as scaled YV12.
    ///
    /// Waits on `sync_point` before consuming. `frame` must be YV12 with a
    /// coded size equal to the pipeline's destination size. Only the
    /// destination sub-rectangle of each plane is written. `callback` runs
    /// once the planes have landed, from
    /// [`GlHelper::process_completed_readbacks`](crate::GlHelper::process_completed_readbacks).
    fn readback_yuv(
        &self,
        mailbox: &Mailbox,
        sync_point: SyncPoint,
        frame: SharedFrame,
        callback: ReadbackCallback,
    ) -> GpuResult<()>;

    /// The scaler feeding the conversion.
    fn scaler(&self) -> &dyn ScalerInterface;

    /// Returns `true` when the planes are produced by one multi-target draw.
    fn uses_mrt(&self) -> bool;
}

enum Conversion<'d, D: GraphicsDevice> {
    Mrt(Rc<ShaderProgram<'d, D>>),
    Planar([Rc<ShaderProgram<'d, D>>; 3]),
}

/// Packed plane texture and where its samples land in the frame.
struct PlaneTarget<'d, D: GraphicsDevice> {
    plane: Plane,
    texture: ScopedTexture<'d, D>,
    /// Packed storage size, four samples per texel.
    packed: Size,
    /// Samples covered within the plane.
    logical: Rect,
}

/// Scaler plus planar conversion for one geometry.
pub struct ReadbackYuvPipeline<'d, D: GraphicsDevice> {
    device: &'d D,
    queue: Rc<RefCell<ReadbackQueue<'d, D>>>,
    scaler: Scaler<'d, D>,
    dst_size: Size,
    dst_subrect: Rect,
    conversion: Conversion<'d, D>,
    scaled: ScopedTexture<'d, D>,
    planes: [PlaneTarget<'d, D>; 3],
    framebuffer: ScopedFramebuffer<'d, D>,
}

fn check_yuv_geometry(dst_size: Size, dst_subrect: Rect) -> GpuResult<()> {
    if dst_size.is_empty() || !dst_size.is_even() {
        return Err(GpuError::InvalidYuvGeometry(format!(
            "destination size {dst_size} must be non-empty with even dimensions"
        )));
    }
    if dst_subrect.is_empty() || !dst_subrect.is_even() {
        return Err(GpuError::InvalidYuvGeometry(format!(
            "destination sub-rectangle {dst_subrect} must be non-empty with even components"
        )));
    }
    if !dst_subrect.is_within(dst_size) {
        return Err(GpuError::InvalidYuvGeometry(format!(
            "destination sub-rectangle {dst_subrect} outside {dst_size}"
        )));
    }
    Ok(())
}

fn plane_target<'d, D: GraphicsDevice>(
    device: &'d D,
    plane: Plane,
    dst_subrect: Rect,
) -> GpuResult<PlaneTarget<'d, D>> {
    let logical = match plane {
        Plane::Y => dst_subrect,
        Plane::U | Plane::V => dst_subrect.half(),
    };
    let packed = Size::new(logical.width.div_ceil(4), logical.height);
    Ok(PlaneTarget {
        plane,
        texture: allocate_texture(device, packed, PixelFormat::Rgba8)?,
        packed,
        logical,
    })
}

impl<'d, D: GraphicsDevice> ReadbackYuvPipeline<'d, D> {
    /// Builds the pipeline. `use_mrt` requests the merged draw; it falls back
    /// to planar passes when the merged program cannot be built.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        device: &'d D,
        factory: &mut ScalerFactory<'d, D>,
        queue: Rc<RefCell<ReadbackQueue<'d, D>>>,
        quality: ScalerQuality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        dst_subrect: Rect,
        flip_vertically: bool,
        use_mrt: bool,
    ) -> GpuResult<Self> {
        check_yuv_geometry(dst_size, dst_subrect)?;

        let scaler = factory.create(
            quality,
            src_size,
            src_subrect,
            dst_subrect.size(),
            flip_vertically,
            false,
        )?;

        let mrt = if use_mrt {
            match factory.program(ShaderType::YuvMrt) {
                Ok(program) => Some(program),
                Err(err) if err.is_capability_shortfall() => {
                    warn!(error = %err, "Multi-target YUV unavailable, using planar passes");
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };
        let conversion = match mrt {
            Some(program) => Conversion::Mrt(program),
            None => Conversion::Planar([
                factory.program(ShaderType::Planar(Plane::Y))?,
                factory.program(ShaderType::Planar(Plane::U))?,
                factory.program(ShaderType::Planar(Plane::V))?,
            ]),
        };

        let scaled = allocate_texture(device, dst_subrect.size(), PixelFormat::Rgba8)?;
        let planes = [
            plane_target(device, Plane::Y, dst_subrect)?,
            plane_target(device, Plane::U, dst_subrect)?,
            plane_target(device, Plane::V, dst_subrect)?,
        ];
        let framebuffer = ScopedFramebuffer::new(device);
        if framebuffer.is_null() {
            return Err(GpuError::ContextLost);
        }

        debug!(
            quality = %scaler.quality(),
            dst = %dst_size,
            subrect = %dst_subrect,
            mrt = matches!(conversion, Conversion::Mrt(_)),
            "Created YUV readback pipeline"
        );
        Ok(Self {
            device,
            queue,
            scaler,
            dst_size,
            dst_subrect,
            conversion,
            scaled,
            planes,
            framebuffer,
        })
    }

    pub fn dst_size(&self) -> Size {
        self.dst_size
    }

    pub fn dst_subrect(&self) -> Rect {
        self.dst_subrect
    }

    /// Consumes `mailbox` into a scoped local texture.
    fn consume(&self, mailbox: &Mailbox, sync_point: SyncPoint) -> GpuResult<ScopedTexture<'d, D>> {
        if mailbox.is_empty() {
            return Err(GpuError::InvalidMailbox);
        }
        self.device.wait_sync_point(sync_point);
        let texture = ScopedTexture::new(self.device);
        if texture.is_null() {
            return Err(GpuError::ContextLost);
        }
        let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, texture.id());
        match self.device.consume_texture(TextureTarget::Texture2D, mailbox) {
            Ok(()) => Ok(texture),
            Err(GpuError::ContextLost) => Err(GpuError::ContextLost),
            Err(err) => {
                warn!(%mailbox, error = %err, "Failed to consume mailbox for YUV readback");
                Err(GpuError::InvalidMailbox)
            }
        }
    }

    /// Writes the three packed planes from the scaled intermediate.
    /// Expects the pipeline framebuffer to be bound.
    fn convert(&self) -> GpuResult<()> {
        let src_rect = DrawCall::rect_to_f32(Rect::from_size(self.dst_subrect.size()));
        let draw = |program: &ShaderProgram<'d, D>, dst_size: Size| {
            self.device.draw(&DrawCall {
                program: program.id(),
                shader: program.shader_type(),
                source: self.scaled.id(),
                src_rect,
                dst_size,
                flip_vertically: false,
                swizzle: false,
            })
        };

        match &self.conversion {
            Conversion::Mrt(program) => {
                for (i, target) in self.planes.iter().enumerate() {
                    self.device.framebuffer_texture_2d(
                        FramebufferTarget::Framebuffer,
                        i as u32,
                        target.texture.id(),
                    );
                }
                self.device.draw_buffers(3)?;
                let result = draw(&**program, self.dst_subrect.size());
                self.device.draw_buffers(1)?;
                for i in 1..3 {
                    self.device.framebuffer_texture_2d(
                        FramebufferTarget::Framebuffer,
                        i,
                        TextureId::NULL,
                    );
                }
                result?;
                trace!("yuv mrt pass");
            }
            Conversion::Planar(programs) => {
                for (program, target) in programs.iter().zip(&self.planes) {
                    self.device.framebuffer_texture_2d(
                        FramebufferTarget::Framebuffer,
                        0,
                        target.texture.id(),
                    );
                    draw(&**program, target.logical.size())?;
                    trace!(plane = ?target.plane, "yuv planar pass");
                }
            }
        }
        Ok(())
    }

    fn check_frame(&self, frame: &SharedFrame) -> GpuResult<()> {
        let frame = frame.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if frame.format() != FrameFormat::Yv12 {
            return Err(GpuError::FrameMismatch(format!(
                "expected YV12, got {}",
                frame.format()
            )));
        }
        if frame.coded_size() != self.dst_size {
            return Err(GpuError::FrameMismatch(format!(
                "coded size {} differs from destination {}",
                frame.coded_size(),
                self.dst_size
            )));
        }
        Ok(())
    }
}

impl<'d, D: GraphicsDevice> ReadbackYuvInterface for ReadbackYuvPipeline<'d, D> {
    fn readback_yuv(
        &self,
        mailbox: &Mailbox,
        sync_point: SyncPoint,
        frame: SharedFrame,
        callback: ReadbackCallback,
    ) -> GpuResult<()> {
        if self.queue.borrow().is_closed() {
            return Err(GpuError::HelperDestroyed);
        }
        self.check_frame(&frame)?;
        let _flush = ScopedFlush::new(self.device);

        let source = self.consume(mailbox, sync_point)?;
        self.scaler.scale(source.id(), self.scaled.id())?;

        let _fb = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            self.framebuffer.id(),
        );
        self.convert()?;

        let mut parts = Vec::with_capacity(self.planes.len());
        for target in &self.planes {
            self.device.framebuffer_texture_2d(
                FramebufferTarget::Framebuffer,
                0,
                target.texture.id(),
            );
            parts.push(ReadbackPart::issue(
                self.device,
                Rect::from_size(target.packed),
                PixelFormat::Rgba8,
                ReadbackDestination::FramePlane {
                    frame: frame.clone(),
                    plane: target.plane,
                    x: target.logical.x,
                    y: target.logical.y,
                    width: target.logical.width,
                },
            )?);
        }
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, TextureId::NULL);

        self.queue
            .borrow_mut()
            .push(PendingReadback::new(parts, callback))
    }

    fn scaler(&self) -> &dyn ScalerInterface {
        &self.scaler
    }

    fn uses_mrt(&self) -> bool {
        matches!(self.conversion, Conversion::Mrt(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_rules() {
        let dst = Size::new(64, 32);
        assert!(check_yuv_geometry(dst, Rect::new(0, 0, 64, 32)).is_ok());
        assert!(check_yuv_geometry(dst, Rect::new(8, 4, 32, 16)).is_ok());

        for (size, rect) in [
            (Size::new(101, 101), Rect::new(0, 0, 100, 100)),
            (Size::new(64, 32), Rect::new(1, 0, 32, 16)),
            (Size::new(64, 32), Rect::new(0, 0, 33, 16)),
            (Size::new(64, 32), Rect::new(40, 0, 32, 16)),
            (Size::new(0, 0), Rect::new(0, 0, 0, 0)),
        ] {
            let err = check_yuv_geometry(size, rect).unwrap_err();
            assert!(matches!(err, GpuError::InvalidYuvGeometry(_)), "{size} {rect}");
        }
    }

    #[test]
    fn test_plane_packing() {
        let device = crate::soft::SoftDevice::new();
        let rect = Rect::new(4, 2, 30, 10);
        let y = plane_target(&device, Plane::Y, rect).unwrap();
        let u = plane_target(&device, Plane::U, rect).unwrap();
        assert_eq!(y.packed, Size::new(8, 10));
        assert_eq!(u.logical, Rect::new(2, 1, 15, 5));
        assert_eq!(u.packed, Size::new(4, 5));
    }
}
