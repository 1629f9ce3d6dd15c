//! Multi-pass texture scaling.
//!
//! A [`Scaler`] is built once for an exact geometry (source size, source
//! sub-rectangle, destination size, quality, flip, swizzle) and then
//! executed any number of times. Its intermediate textures live as long as
//! the scaler, so repeated scales allocate nothing.
//!
//! # Quality tiers
//!
//! | Quality | Passes | Filter |
//! |---------|--------|--------|
//! | `Fast`  | 1 | bilinear |
//! | `Good`  | cascade of 50% steps, then exact | bilinear |
//! | `Best`  | cascade of 50% steps, then exact | bicubic (Mitchell-Netravali) |
//!
//! # Cascade rule
//!
//! Per axis, keep halving (rounding up) while the halved size stays
//! strictly above the target, then step to the target exactly. An axis
//! that needs upscaling reaches its target in the first pass. The pass
//! count is the larger of the two axes' step counts; the shorter axis holds
//! its target for the remaining passes.
//!
//! ```rust
//! use snap_core::{Rect, Size};
//! use snap_gpu::{ScalerQuality, compute_scaler_stages};
//!
//! let stages = compute_scaler_stages(
//!     ScalerQuality::Good,
//!     Size::new(512, 512),
//!     Rect::new(0, 0, 512, 512),
//!     Size::new(64, 64),
//!     false,
//!     false,
//! );
//! let sizes: Vec<_> = stages.iter().map(|s| s.dst_size.width).collect();
//! assert_eq!(sizes, [256, 128, 64]);
//! ```

use std::rc::Rc;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snap_core::{Error, PixelFormat, Rect, Size};
use thiserror::Error as ThisError;
use tracing::{debug, trace, warn};

use crate::cache::LruCache;
use crate::device::{
    DrawCall, FramebufferTarget, GlParam, GraphicsDevice, SamplerParams, TextureId, TextureTarget,
};
use crate::handles::{ScopedFramebuffer, ScopedFramebufferBinder, ScopedTexture, ScopedTextureBinder};
use crate::shaders::{ShaderProgram, ShaderType};
use crate::{GpuError, GpuResult};

/// Scaling quality, in increasing cost and fidelity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ScalerQuality {
    /// Single bilinear pass.
    Fast = 1,
    /// Bilinear 50% cascade.
    #[default]
    Good = 2,
    /// Bicubic 50% cascade.
    Best = 3,
}

impl ScalerQuality {
    /// All tiers, lowest first.
    pub const ALL: [ScalerQuality; 3] = [Self::Fast, Self::Good, Self::Best];

    /// The next lower tier, or `None` for `Fast`.
    pub fn degrade(self) -> Option<Self> {
        match self {
            Self::Fast => None,
            Self::Good => Some(Self::Fast),
            Self::Best => Some(Self::Good),
        }
    }

    /// Lowercase name, as accepted by `FromStr`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Good => "good",
            Self::Best => "best",
        }
    }

    fn shader(&self) -> ShaderType {
        match self {
            Self::Best => ShaderType::Bicubic,
            Self::Fast | Self::Good => ShaderType::Bilinear,
        }
    }
}

impl std::fmt::Display for ScalerQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Unknown quality name.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("unknown scaler quality '{0}' (expected fast, good or best)")]
pub struct ParseQualityError(String);

impl FromStr for ScalerQuality {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" | "1" => Ok(Self::Fast),
            "good" | "2" => Ok(Self::Good),
            "best" | "3" => Ok(Self::Best),
            _ => Err(ParseQualityError(s.to_string())),
        }
    }
}

/// One pass of a scale chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleStage {
    /// Filter program for this pass.
    pub shader: ShaderType,
    /// Size of the texture sampled by this pass.
    pub src_size: Size,
    /// Region of the input that is sampled.
    pub src_subrect: Rect,
    /// Output size of this pass.
    pub dst_size: Size,
    /// Writes rows bottom to top.
    pub flip_vertically: bool,
    /// Exchanges red and blue on output.
    pub swizzle: bool,
}

/// Sizes one axis passes through on its way from `src` to `dst`.
fn axis_steps(src: u32, dst: u32) -> Vec<u32> {
    let mut steps = Vec::new();
    let mut current = src;
    while current.div_ceil(2) > dst {
        current = current.div_ceil(2);
        steps.push(current);
    }
    steps.push(dst);
    steps
}

/// Plans the passes that scale `src_subrect` of a `src_size` texture to `dst_size`.
///
/// Flip and swizzle apply to the last pass only.
pub fn compute_scaler_stages(
    quality: ScalerQuality,
    src_size: Size,
    src_subrect: Rect,
    dst_size: Size,
    flip_vertically: bool,
    swizzle: bool,
) -> Vec<ScaleStage> {
    let shader = quality.shader();
    let (xs, ys) = match quality {
        ScalerQuality::Fast => (vec![dst_size.width], vec![dst_size.height]),
        ScalerQuality::Good | ScalerQuality::Best => (
            axis_steps(src_subrect.width, dst_size.width),
            axis_steps(src_subrect.height, dst_size.height),
        ),
    };
    let passes = xs.len().max(ys.len());
    let at = |steps: &[u32], i: usize| steps[i.min(steps.len() - 1)];

    let mut stages = Vec::with_capacity(passes);
    let mut input_size = src_size;
    let mut input_rect = src_subrect;
    for i in 0..passes {
        let last = i + 1 == passes;
        let output = Size::new(at(&xs, i), at(&ys, i));
        stages.push(ScaleStage {
            shader,
            src_size: input_size,
            src_subrect: input_rect,
            dst_size: output,
            flip_vertically: last && flip_vertically,
            swizzle: last && swizzle,
        });
        input_size = output;
        input_rect = Rect::from_size(output);
    }
    stages
}

/// Operations of a built scaler.
pub trait ScalerInterface {
    /// Scales `src` into `dst`, which must have storage of at least `dst_size()`.
    ///
    /// Sets the sampling state of `src` to linear filtering with
    /// clamp-to-edge wrapping.
    fn scale(&self, src: TextureId, dst: TextureId) -> GpuResult<()>;

    /// Size of the source texture the scaler was built for.
    fn src_size(&self) -> Size;
    /// Region of the source that is scaled.
    fn src_subrect(&self) -> Rect;
    /// Output size of the last pass.
    fn dst_size(&self) -> Size;

    /// Effective quality after any degradation at build time.
    fn quality(&self) -> ScalerQuality;

    /// Number of draws per `scale` call.
    fn pass_count(&self) -> usize;
}

struct ScalerPass<'d, D: GraphicsDevice> {
    stage: ScaleStage,
    program: Rc<ShaderProgram<'d, D>>,
    /// Output of this pass; `None` for the last pass, which writes `dst`.
    intermediate: Option<ScopedTexture<'d, D>>,
}

/// A scale chain for one exact geometry.
pub struct Scaler<'d, D: GraphicsDevice> {
    device: &'d D,
    quality: ScalerQuality,
    src_size: Size,
    src_subrect: Rect,
    dst_size: Size,
    passes: Vec<ScalerPass<'d, D>>,
    framebuffer: ScopedFramebuffer<'d, D>,
}

impl<'d, D: GraphicsDevice> Scaler<'d, D> {
    pub fn stages(&self) -> impl Iterator<Item = &ScaleStage> {
        self.passes.iter().map(|p| &p.stage)
    }
}

impl<D: GraphicsDevice> ScalerInterface for Scaler<'_, D> {
    fn scale(&self, src: TextureId, dst: TextureId) -> GpuResult<()> {
        if self.device.is_context_lost() {
            return Err(GpuError::ContextLost);
        }
        {
            let _bound = ScopedTextureBinder::new(self.device, TextureTarget::Texture2D, src);
            self.device
                .tex_parameters(TextureTarget::Texture2D, SamplerParams::LINEAR_CLAMP);
        }

        let _fb = ScopedFramebufferBinder::new(
            self.device,
            FramebufferTarget::Framebuffer,
            self.framebuffer.id(),
        );
        let mut input = src;
        for (i, pass) in self.passes.iter().enumerate() {
            let output = pass.intermediate.as_ref().map_or(dst, |t| t.id());
            self.device
                .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, output);
            self.device.draw(&DrawCall {
                program: pass.program.id(),
                shader: pass.stage.shader,
                source: input,
                src_rect: DrawCall::rect_to_f32(pass.stage.src_subrect),
                dst_size: pass.stage.dst_size,
                flip_vertically: pass.stage.flip_vertically,
                swizzle: pass.stage.swizzle,
            })?;
            trace!(pass = i, dst = %pass.stage.dst_size, "scale pass");
            input = output;
        }
        self.device
            .framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, TextureId::NULL);
        Ok(())
    }

    fn src_size(&self) -> Size {
        self.src_size
    }

    fn src_subrect(&self) -> Rect {
        self.src_subrect
    }

    fn dst_size(&self) -> Size {
        self.dst_size
    }

    fn quality(&self) -> ScalerQuality {
        self.quality
    }

    fn pass_count(&self) -> usize {
        self.passes.len()
    }
}

/// Allocates `format` storage with linear clamp sampling for a new texture.
pub(crate) fn allocate_texture<'d, D: GraphicsDevice>(
    device: &'d D,
    size: Size,
    format: PixelFormat,
) -> GpuResult<ScopedTexture<'d, D>> {
    let texture = ScopedTexture::new(device);
    if texture.is_null() {
        return Err(GpuError::ContextLost);
    }
    let _bound = ScopedTextureBinder::new(device, TextureTarget::Texture2D, texture.id());
    device.tex_image_2d(TextureTarget::Texture2D, size, format, None)?;
    device.tex_parameters(TextureTarget::Texture2D, SamplerParams::LINEAR_CLAMP);
    Ok(texture)
}

/// Builds scalers and owns the programs they share.
pub struct ScalerFactory<'d, D: GraphicsDevice> {
    device: &'d D,
    programs: LruCache<ShaderType, Rc<ShaderProgram<'d, D>>>,
}

impl<'d, D: GraphicsDevice> ScalerFactory<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self {
            device,
            programs: LruCache::unbounded(),
        }
    }

    /// Returns the linked program for `shader`, building it on first use.
    pub fn program(&mut self, shader: ShaderType) -> GpuResult<Rc<ShaderProgram<'d, D>>> {
        let device = self.device;
        self.programs
            .get_or_try_insert_with(shader, || ShaderProgram::build(device, shader).map(Rc::new))
            .map(Rc::clone)
    }

    /// Number of linked programs held.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Builds a scaler, degrading quality on capability shortfalls.
    pub fn create(
        &mut self,
        quality: ScalerQuality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        flip_vertically: bool,
        swizzle: bool,
    ) -> GpuResult<Scaler<'d, D>> {
        if src_subrect.is_empty() || !src_subrect.is_within(src_size) {
            return Err(Error::invalid_region(src_subrect, src_size).into());
        }
        if dst_size.is_empty() {
            return Err(Error::invalid_dimensions(
                dst_size.width,
                dst_size.height,
                "scaler destination is empty",
            )
            .into());
        }

        let mut quality = quality;
        loop {
            match self.build(quality, src_size, src_subrect, dst_size, flip_vertically, swizzle) {
                Ok(scaler) => return Ok(scaler),
                Err(err) if err.is_capability_shortfall() => match quality.degrade() {
                    Some(lower) => {
                        warn!(from = %quality, to = %lower, error = %err, "Degrading scaler quality");
                        quality = lower;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    fn build(
        &mut self,
        quality: ScalerQuality,
        src_size: Size,
        src_subrect: Rect,
        dst_size: Size,
        flip_vertically: bool,
        swizzle: bool,
    ) -> GpuResult<Scaler<'d, D>> {
        let stages =
            compute_scaler_stages(quality, src_size, src_subrect, dst_size, flip_vertically, swizzle);
        let max_size = self.device.get_integer(GlParam::MaxTextureSize);
        if let Some(stage) = stages.iter().find(|s| s.dst_size.max_dim() > max_size) {
            return Err(GpuError::texture_too_large(stage.dst_size, max_size));
        }

        let framebuffer = ScopedFramebuffer::new(self.device);
        if framebuffer.is_null() {
            return Err(GpuError::ContextLost);
        }

        let last = stages.len() - 1;
        let mut passes = Vec::with_capacity(stages.len());
        for (i, stage) in stages.into_iter().enumerate() {
            let program = self.program(stage.shader)?;
            let intermediate = if i < last {
                Some(allocate_texture(self.device, stage.dst_size, PixelFormat::Rgba8)?)
            } else {
                None
            };
            passes.push(ScalerPass {
                stage,
                program,
                intermediate,
            });
        }

        debug!(
            %quality,
            src = %src_size,
            subrect = %src_subrect,
            dst = %dst_size,
            passes = passes.len(),
            "Created scaler"
        );
        Ok(Scaler {
            device: self.device,
            quality,
            src_size,
            src_subrect,
            dst_size,
            passes,
            framebuffer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(quality: ScalerQuality, src: (u32, u32), dst: (u32, u32)) -> Vec<ScaleStage> {
        let src = Size::from(src);
        compute_scaler_stages(quality, src, Rect::from_size(src), Size::from(dst), false, false)
    }

    fn log2_ceil(ratio: f64) -> usize {
        ratio.log2().ceil().max(1.0) as usize
    }

    #[test]
    fn test_fast_is_single_pass() {
        let stages = plan(ScalerQuality::Fast, (1024, 768), (16, 16));
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].shader, ShaderType::Bilinear);
    }

    #[test]
    fn test_best_uses_bicubic() {
        let stages = plan(ScalerQuality::Best, (256, 256), (32, 32));
        assert_eq!(stages.len(), 3);
        assert!(stages.iter().all(|s| s.shader == ShaderType::Bicubic));
    }

    #[test]
    fn test_final_pass_is_exact_not_half() {
        // 100 -> 64 is one direct pass, not 100 -> 50 -> 64.
        let stages = plan(ScalerQuality::Good, (100, 100), (64, 64));
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].dst_size, Size::new(64, 64));
    }

    #[test]
    fn test_odd_halving_rounds_up() {
        let stages = plan(ScalerQuality::Good, (101, 101), (25, 25));
        let widths: Vec<_> = stages.iter().map(|s| s.dst_size.width).collect();
        assert_eq!(widths, [51, 26, 25]);
    }

    #[test]
    fn test_pass_count_is_log2_ceil() {
        for (src, dst) in [(512, 64), (1000, 3), (333, 100), (257, 128), (256, 128), (7, 7), (640, 1)] {
            let stages = plan(ScalerQuality::Good, (src, src), (dst, dst));
            assert_eq!(stages.len(), log2_ceil(src as f64 / dst as f64), "{src} -> {dst}");
            assert_eq!(stages.last().unwrap().dst_size, Size::new(dst, dst));
        }
    }

    #[test]
    fn test_axes_step_independently() {
        let stages = plan(ScalerQuality::Good, (512, 100), (64, 64));
        let sizes: Vec<_> = stages.iter().map(|s| s.dst_size).collect();
        assert_eq!(
            sizes,
            [Size::new(256, 64), Size::new(128, 64), Size::new(64, 64)]
        );
    }

    #[test]
    fn test_upscale_axis_first_pass() {
        let stages = plan(ScalerQuality::Good, (400, 50), (100, 100));
        assert_eq!(stages[0].dst_size.height, 100);
        assert_eq!(stages.last().unwrap().dst_size, Size::new(100, 100));
    }

    #[test]
    fn test_flip_and_swizzle_on_last_stage_only() {
        let src = Size::new(64, 64);
        let stages = compute_scaler_stages(
            ScalerQuality::Good,
            src,
            Rect::new(8, 8, 48, 48),
            Size::new(6, 6),
            true,
            true,
        );
        let (last, rest) = stages.split_last().unwrap();
        assert!(last.flip_vertically && last.swizzle);
        assert!(rest.iter().all(|s| !s.flip_vertically && !s.swizzle));
        assert_eq!(stages[0].src_subrect, Rect::new(8, 8, 48, 48));
        assert_eq!(stages[1].src_subrect, Rect::from_size(stages[0].dst_size));
    }

    #[test]
    fn test_quality_parse_and_degrade() {
        assert_eq!("BEST".parse::<ScalerQuality>().unwrap(), ScalerQuality::Best);
        assert!("ultra".parse::<ScalerQuality>().is_err());
        assert_eq!(ScalerQuality::Best.degrade(), Some(ScalerQuality::Good));
        assert_eq!(ScalerQuality::Fast.degrade(), None);
        assert_eq!(ScalerQuality::Good as u8, 2);
    }
}
