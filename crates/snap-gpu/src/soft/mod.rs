//! CPU reference implementation of [`GraphicsDevice`].
//!
//! [`SoftDevice`] executes every command immediately on the calling thread
//! (draws are parallelized with rayon) and keeps GL bind semantics, so the
//! helper runs unchanged against it. Completion queries become available on
//! the next `flush`/`finish`, which keeps asynchronous readbacks observably
//! asynchronous.
//!
//! Capabilities and faults are configurable through [`SoftDevice::builder`]:
//!
//! ```rust
//! use snap_gpu::{GlParam, GraphicsDevice, SoftDevice};
//!
//! let device = SoftDevice::builder()
//!     .max_draw_buffers(1)
//!     .rgb565_readback(false)
//!     .build();
//! assert_eq!(device.get_integer(GlParam::MaxDrawBuffers), 1);
//! ```

mod sampler;
mod share;

pub use share::ShareGroup;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use snap_core::{Error, PixelFormat, Rect, Size};
use tracing::{debug, trace, warn};

use crate::device::{
    BufferId, BufferTarget, CHROMIUM_TEXTURE_MAILBOX, DrawCall, EXT_DRAW_BUFFERS,
    EXT_READ_FORMAT_BGRA, FramebufferId, FramebufferTarget, GlParam, GraphicsDevice, ProgramId,
    QueryId, QueryTarget, SamplerParams, ShaderId, ShaderStage, TextureId, TextureTarget,
};
use crate::mailbox::{Mailbox, SyncPoint};
use crate::shaders::ShaderType;
use crate::{GpuError, GpuResult};
use sampler::{SampleMode, SharedSurface, SourceImage, Surface, lock_surface};

/// Color attachments per framebuffer.
pub const MAX_COLOR_ATTACHMENTS: u32 = 4;

/// Default maximum texture dimension.
pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 8192;

/// Live object counts, for leak checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SoftStats {
    pub textures: usize,
    pub framebuffers: usize,
    pub buffers: usize,
    pub queries: usize,
    pub shaders: usize,
    pub programs: usize,
}

impl SoftStats {
    /// Returns `true` when no object is alive.
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone)]
struct Caps {
    max_texture_size: u32,
    max_draw_buffers: u32,
    rgb565_readback: bool,
    bgra_readback: bool,
    texture_memory_limit: u64,
    rejected_keyword: Option<String>,
}

#[derive(Default)]
struct TextureObject {
    surface: Option<SharedSurface>,
    sampler: SamplerParams,
}

struct FramebufferObject {
    attachments: [TextureId; MAX_COLOR_ATTACHMENTS as usize],
    draw_buffers: u32,
}

impl Default for FramebufferObject {
    fn default() -> Self {
        Self {
            attachments: [TextureId::NULL; MAX_COLOR_ATTACHMENTS as usize],
            draw_buffers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryState {
    Idle,
    Active,
    Pending,
    Available,
}

#[derive(Default)]
struct SoftState {
    next_id: u32,
    textures: HashMap<TextureId, TextureObject>,
    framebuffers: HashMap<FramebufferId, FramebufferObject>,
    buffers: HashMap<BufferId, Vec<u8>>,
    queries: HashMap<QueryId, QueryState>,
    shaders: HashMap<ShaderId, ShaderStage>,
    programs: HashSet<ProgramId>,
    bound_texture: TextureId,
    bound_framebuffer: FramebufferId,
    bound_buffer: BufferId,
    active_query: Option<QueryId>,
    waited: SyncPoint,
    context_lost: bool,
    queries_held: bool,
}

impl SoftState {
    fn next_name(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn bound_texture_mut(&mut self) -> GpuResult<&mut TextureObject> {
        let id = self.bound_texture;
        self.textures
            .get_mut(&id)
            .ok_or_else(|| GpuError::invalid_operation("no texture bound"))
    }

    fn framebuffer(&self) -> GpuResult<&FramebufferObject> {
        self.framebuffers
            .get(&self.bound_framebuffer)
            .ok_or_else(|| GpuError::invalid_operation("no framebuffer bound"))
    }

    fn attachment_surface(&self, attachment: usize) -> GpuResult<SharedSurface> {
        let texture = self.framebuffer()?.attachments[attachment];
        self.textures
            .get(&texture)
            .and_then(|t| t.surface.clone())
            .ok_or_else(|| {
                GpuError::invalid_operation(format!("color attachment {attachment} incomplete"))
            })
    }

    /// Bytes held by distinct surfaces, excluding the bound texture's own.
    fn texture_bytes_excluding_bound(&self) -> u64 {
        let bound = self
            .textures
            .get(&self.bound_texture)
            .and_then(|t| t.surface.as_ref())
            .map(Arc::as_ptr);
        let mut seen = HashSet::new();
        let mut total = 0;
        for surface in self.textures.values().filter_map(|t| t.surface.as_ref()) {
            let ptr = Arc::as_ptr(surface);
            if Some(ptr) != bound && seen.insert(ptr) {
                total += lock_surface(surface).byte_size();
            }
        }
        total
    }
}

/// Builder for [`SoftDevice`].
pub struct SoftDeviceBuilder {
    caps: Caps,
    share_group: Option<ShareGroup>,
}

impl SoftDeviceBuilder {
    fn new() -> Self {
        // Get system RAM (fallback to 4GB if detection fails)
        let available = sys_info::mem_info()
            .map(|m| m.avail * 1024)
            .unwrap_or(4 * 1024 * 1024 * 1024);

        Self {
            caps: Caps {
                max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
                max_draw_buffers: MAX_COLOR_ATTACHMENTS,
                rgb565_readback: true,
                bgra_readback: true,
                texture_memory_limit: available / 2,
                rejected_keyword: None,
            },
            share_group: None,
        }
    }

    pub fn max_texture_size(mut self, size: u32) -> Self {
        self.caps.max_texture_size = size;
        self
    }

    /// Draw buffers advertised; values above one enable `GL_EXT_draw_buffers`.
    pub fn max_draw_buffers(mut self, count: u32) -> Self {
        self.caps.max_draw_buffers = count.clamp(1, MAX_COLOR_ATTACHMENTS);
        self
    }

    pub fn rgb565_readback(mut self, enabled: bool) -> Self {
        self.caps.rgb565_readback = enabled;
        self
    }

    pub fn bgra_readback(mut self, enabled: bool) -> Self {
        self.caps.bgra_readback = enabled;
        self
    }

    /// Total bytes of texture storage before allocations fail.
    pub fn texture_memory_limit(mut self, bytes: u64) -> Self {
        self.caps.texture_memory_limit = bytes;
        self
    }

    /// Fails compilation of any shader whose source contains `keyword`.
    pub fn reject_shaders_containing(mut self, keyword: &str) -> Self {
        self.caps.rejected_keyword = Some(keyword.to_string());
        self
    }

    /// Joins an existing share group instead of starting a new one.
    pub fn share_group(mut self, group: &ShareGroup) -> Self {
        self.share_group = Some(group.clone());
        self
    }

    pub fn build(self) -> SoftDevice {
        let share = self.share_group.unwrap_or_default();
        let stream = share.register_stream();
        debug!(
            stream,
            max_texture_size = self.caps.max_texture_size,
            max_draw_buffers = self.caps.max_draw_buffers,
            "SoftDevice created"
        );
        SoftDevice {
            state: Mutex::new(SoftState::default()),
            share,
            stream,
            caps: self.caps,
        }
    }
}

/// CPU graphics device.
pub struct SoftDevice {
    state: Mutex<SoftState>,
    share: ShareGroup,
    stream: u32,
    caps: Caps,
}

impl SoftDevice {
    /// Device with default capabilities in a fresh share group.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SoftDeviceBuilder {
        SoftDeviceBuilder::new()
    }

    fn state(&self) -> MutexGuard<'_, SoftState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn share_group(&self) -> &ShareGroup {
        &self.share
    }

    /// Command stream id within the share group.
    pub fn stream_id(&self) -> u32 {
        self.stream
    }

    pub fn stats(&self) -> SoftStats {
        let state = self.state();
        SoftStats {
            textures: state.textures.len(),
            framebuffers: state.framebuffers.len(),
            buffers: state.buffers.len(),
            queries: state.queries.len(),
            shaders: state.shaders.len(),
            programs: state.programs.len(),
        }
    }

    /// Simulates a lost context: every later command fails and queries never complete.
    pub fn lose_context(&self) {
        warn!(stream = self.stream, "Context lost");
        self.state().context_lost = true;
    }

    /// While held, `flush`/`finish` leave queries pending.
    pub fn set_queries_held(&self, held: bool) {
        self.state().queries_held = held;
    }

    pub fn bound_texture(&self) -> TextureId {
        self.state().bound_texture
    }

    pub fn bound_framebuffer(&self) -> FramebufferId {
        self.state().bound_framebuffer
    }

    pub fn bound_buffer(&self) -> BufferId {
        self.state().bound_buffer
    }

    /// Sampling state of a texture.
    pub fn texture_sampler(&self, id: TextureId) -> Option<SamplerParams> {
        self.state().textures.get(&id).map(|t| t.sampler)
    }

    /// Storage size of a texture, if allocated.
    pub fn texture_size(&self, id: TextureId) -> Option<Size> {
        let surface = self.state().textures.get(&id)?.surface.clone()?;
        let size = lock_surface(&surface).size;
        Some(size)
    }

    /// Creates a texture with contents encoded in `format`, leaving bindings untouched.
    pub fn create_texture_with_data(
        &self,
        size: Size,
        format: PixelFormat,
        data: &[u8],
    ) -> GpuResult<TextureId> {
        let surface = Surface::from_encoded(size, format, data)?;
        let mut state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        let id = TextureId(state.next_name());
        state.textures.insert(
            id,
            TextureObject {
                surface: Some(Arc::new(Mutex::new(surface))),
                sampler: SamplerParams::default(),
            },
        );
        Ok(id)
    }

    /// Reads a whole texture as RGBA8, bypassing framebuffers.
    pub fn read_texture(&self, id: TextureId) -> GpuResult<Vec<u8>> {
        let surface = self
            .state()
            .textures
            .get(&id)
            .and_then(|t| t.surface.clone())
            .ok_or_else(|| GpuError::invalid_operation(format!("{id} has no storage")))?;
        let surface = lock_surface(&surface);
        Ok(surface.data.clone())
    }

    fn check_size(&self, size: Size) -> GpuResult<()> {
        if size.max_dim() > self.caps.max_texture_size {
            return Err(GpuError::texture_too_large(size, self.caps.max_texture_size));
        }
        Ok(())
    }

    fn check_readback_format(&self, surface: &Surface, format: PixelFormat) -> GpuResult<()> {
        let supported = match format {
            PixelFormat::Rgba8 => true,
            PixelFormat::Bgra8 => self.caps.bgra_readback,
            PixelFormat::Rgb565 => {
                self.caps.rgb565_readback && surface.format == PixelFormat::Rgb565
            }
        };
        if supported {
            Ok(())
        } else {
            Err(GpuError::UnsupportedReadbackFormat(format))
        }
    }

    /// Reads `rect` of the bound framebuffer's first attachment.
    fn read_framebuffer(&self, rect: Rect, format: PixelFormat) -> GpuResult<Vec<u8>> {
        let surface = {
            let state = self.state();
            if state.context_lost {
                return Err(GpuError::ContextLost);
            }
            state.attachment_surface(0)?
        };
        let surface = lock_surface(&surface);
        if !rect.is_within(surface.size) {
            return Err(Error::invalid_region(rect, surface.size).into());
        }
        self.check_readback_format(&surface, format)?;
        Ok(surface.read_rect(rect, format))
    }

    fn complete_queries(&self) {
        let mut state = self.state();
        if state.queries_held || state.context_lost {
            return;
        }
        for query in state.queries.values_mut() {
            if *query == QueryState::Pending {
                *query = QueryState::Available;
            }
        }
    }
}

impl Default for SoftDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftDevice")
            .field("stream", &self.stream)
            .field("stats", &self.stats())
            .finish()
    }
}

impl GraphicsDevice for SoftDevice {
    fn gen_texture(&self) -> TextureId {
        let mut state = self.state();
        if state.context_lost {
            return TextureId::NULL;
        }
        let id = TextureId(state.next_name());
        state.textures.insert(id, TextureObject::default());
        id
    }

    fn delete_texture(&self, id: TextureId) {
        let mut state = self.state();
        state.textures.remove(&id);
        if state.bound_texture == id {
            state.bound_texture = TextureId::NULL;
        }
        for fb in state.framebuffers.values_mut() {
            for attachment in &mut fb.attachments {
                if *attachment == id {
                    *attachment = TextureId::NULL;
                }
            }
        }
    }

    fn gen_framebuffer(&self) -> FramebufferId {
        let mut state = self.state();
        if state.context_lost {
            return FramebufferId::NULL;
        }
        let id = FramebufferId(state.next_name());
        state.framebuffers.insert(id, FramebufferObject::default());
        id
    }

    fn delete_framebuffer(&self, id: FramebufferId) {
        let mut state = self.state();
        state.framebuffers.remove(&id);
        if state.bound_framebuffer == id {
            state.bound_framebuffer = FramebufferId::NULL;
        }
    }

    fn gen_buffer(&self) -> BufferId {
        let mut state = self.state();
        if state.context_lost {
            return BufferId::NULL;
        }
        let id = BufferId(state.next_name());
        state.buffers.insert(id, Vec::new());
        id
    }

    fn delete_buffer(&self, id: BufferId) {
        let mut state = self.state();
        state.buffers.remove(&id);
        if state.bound_buffer == id {
            state.bound_buffer = BufferId::NULL;
        }
    }

    fn gen_query(&self) -> QueryId {
        let mut state = self.state();
        if state.context_lost {
            return QueryId::NULL;
        }
        let id = QueryId(state.next_name());
        state.queries.insert(id, QueryState::Idle);
        id
    }

    fn delete_query(&self, id: QueryId) {
        let mut state = self.state();
        state.queries.remove(&id);
        if state.active_query == Some(id) {
            state.active_query = None;
        }
    }

    fn bind_texture(&self, _target: TextureTarget, id: TextureId) {
        self.state().bound_texture = id;
    }

    fn bind_framebuffer(&self, _target: FramebufferTarget, id: FramebufferId) {
        self.state().bound_framebuffer = id;
    }

    fn bind_buffer(&self, _target: BufferTarget, id: BufferId) {
        self.state().bound_buffer = id;
    }

    fn tex_image_2d(
        &self,
        _target: TextureTarget,
        size: Size,
        format: PixelFormat,
        data: Option<&[u8]>,
    ) -> GpuResult<()> {
        self.check_size(size)?;
        let surface = match data {
            Some(data) => Surface::from_encoded(size, format, data)?,
            None => Surface::new(size, format),
        };

        let mut state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        let used = state.texture_bytes_excluding_bound();
        let requested = surface.byte_size();
        if used + requested > self.caps.texture_memory_limit {
            return Err(GpuError::OutOfMemory {
                requested,
                available: self.caps.texture_memory_limit.saturating_sub(used),
            });
        }
        let texture = state.bound_texture_mut()?;
        texture.surface = Some(Arc::new(Mutex::new(surface)));
        trace!(%size, %format, "tex_image_2d");
        Ok(())
    }

    fn tex_parameters(&self, _target: TextureTarget, params: SamplerParams) {
        let mut state = self.state();
        if let Ok(texture) = state.bound_texture_mut() {
            texture.sampler = params;
        }
    }

    fn copy_tex_sub_image_2d(
        &self,
        _target: TextureTarget,
        dst_x: u32,
        dst_y: u32,
        src: Rect,
    ) -> GpuResult<()> {
        let (source, dest) = {
            let mut state = self.state();
            if state.context_lost {
                return Err(GpuError::ContextLost);
            }
            let source = state.attachment_surface(0)?;
            let dest = state
                .bound_texture_mut()?
                .surface
                .clone()
                .ok_or_else(|| GpuError::invalid_operation("bound texture has no storage"))?;
            (source, dest)
        };

        let snapshot = lock_surface(&source).clone();
        if !src.is_within(snapshot.size) {
            return Err(Error::invalid_region(src, snapshot.size).into());
        }
        let mut dest = lock_surface(&dest);
        let dst_rect = Rect::new(dst_x, dst_y, src.width, src.height);
        if !dst_rect.is_within(dest.size) {
            return Err(Error::invalid_region(dst_rect, dest.size).into());
        }
        dest.copy_rect(&snapshot, src, dst_x, dst_y);
        trace!(%src, dst_x, dst_y, "copy_tex_sub_image_2d");
        Ok(())
    }

    fn copy_tex_image_2d(
        &self,
        _target: TextureTarget,
        format: PixelFormat,
        src: Rect,
    ) -> GpuResult<()> {
        self.check_size(src.size())?;
        let source = {
            let state = self.state();
            if state.context_lost {
                return Err(GpuError::ContextLost);
            }
            state.attachment_surface(0)?
        };
        let snapshot = lock_surface(&source).clone();
        if !src.is_within(snapshot.size) {
            return Err(Error::invalid_region(src, snapshot.size).into());
        }
        let mut surface = Surface::new(src.size(), format);
        surface.copy_rect(&snapshot, src, 0, 0);

        let mut state = self.state();
        state.bound_texture_mut()?.surface = Some(Arc::new(Mutex::new(surface)));
        Ok(())
    }

    fn framebuffer_texture_2d(
        &self,
        _target: FramebufferTarget,
        attachment: u32,
        texture: TextureId,
    ) {
        let mut state = self.state();
        let bound = state.bound_framebuffer;
        if attachment >= MAX_COLOR_ATTACHMENTS {
            return;
        }
        if let Some(fb) = state.framebuffers.get_mut(&bound) {
            fb.attachments[attachment as usize] = texture;
        }
    }

    fn draw_buffers(&self, count: u32) -> GpuResult<()> {
        if count == 0 || count > self.caps.max_draw_buffers {
            return Err(GpuError::invalid_operation(format!(
                "{count} draw buffers requested, device supports {}",
                self.caps.max_draw_buffers
            )));
        }
        let mut state = self.state();
        let bound = state.bound_framebuffer;
        let fb = state
            .framebuffers
            .get_mut(&bound)
            .ok_or_else(|| GpuError::invalid_operation("no framebuffer bound"))?;
        fb.draw_buffers = count;
        Ok(())
    }

    fn compile_shader(&self, stage: ShaderStage, source: &str) -> GpuResult<ShaderId> {
        if !source.contains("void main") {
            return Err(GpuError::ShaderCompilation("missing entry point".into()));
        }
        if let Some(keyword) = self
            .caps
            .rejected_keyword
            .as_deref()
            .filter(|k| source.contains(k))
        {
            return Err(GpuError::ShaderCompilation(format!(
                "unsupported construct `{keyword}`"
            )));
        }
        if source.contains(EXT_DRAW_BUFFERS) && self.caps.max_draw_buffers < 2 {
            return Err(GpuError::ShaderCompilation(format!(
                "extension {EXT_DRAW_BUFFERS} not supported"
            )));
        }
        let mut state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        let id = ShaderId(state.next_name());
        state.shaders.insert(id, stage);
        Ok(id)
    }

    fn delete_shader(&self, id: ShaderId) {
        self.state().shaders.remove(&id);
    }

    fn link_program(&self, vertex: ShaderId, fragment: ShaderId) -> GpuResult<ProgramId> {
        let mut state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        let stages = (state.shaders.get(&vertex), state.shaders.get(&fragment));
        if stages != (Some(&ShaderStage::Vertex), Some(&ShaderStage::Fragment)) {
            return Err(GpuError::ProgramLink(format!(
                "{vertex} and {fragment} are not a vertex/fragment pair"
            )));
        }
        let id = ProgramId(state.next_name());
        state.programs.insert(id);
        Ok(id)
    }

    fn delete_program(&self, id: ProgramId) {
        self.state().programs.remove(&id);
    }

    fn draw(&self, call: &DrawCall) -> GpuResult<()> {
        let (source, mode, targets) = {
            let state = self.state();
            if state.context_lost {
                return Err(GpuError::ContextLost);
            }
            if !state.programs.contains(&call.program) {
                return Err(GpuError::invalid_operation(format!(
                    "{} is not a linked program",
                    call.program
                )));
            }
            let texture = state
                .textures
                .get(&call.source)
                .ok_or_else(|| GpuError::invalid_operation(format!("{} unknown", call.source)))?;
            let source = texture
                .surface
                .clone()
                .ok_or_else(|| GpuError::invalid_operation(format!("{} has no storage", call.source)))?;
            let mode = match call.shader {
                ShaderType::Bicubic => SampleMode::Bicubic,
                _ if texture.sampler.is_linear() => SampleMode::Bilinear,
                _ => SampleMode::Nearest,
            };

            let outputs = if call.shader == ShaderType::YuvMrt {
                if state.framebuffer()?.draw_buffers < 3 {
                    return Err(GpuError::invalid_operation(
                        "YUV MRT draw needs three draw buffers",
                    ));
                }
                3
            } else {
                1
            };
            let targets = (0..outputs)
                .map(|i| state.attachment_surface(i))
                .collect::<GpuResult<Vec<_>>>()?;
            (source, mode, targets)
        };

        let source = SourceImage::snapshot(&lock_surface(&source));
        match call.shader {
            ShaderType::Bilinear | ShaderType::Bicubic => {
                let mut target = lock_surface(&targets[0]);
                sampler::resample(
                    &source,
                    mode,
                    call.src_rect,
                    call.dst_size,
                    call.flip_vertically,
                    call.swizzle,
                    &mut target,
                );
            }
            ShaderType::Planar(plane) => {
                let mut target = lock_surface(&targets[0]);
                sampler::convert_plane(
                    &source,
                    mode,
                    call.src_rect,
                    plane,
                    call.dst_size,
                    &mut target,
                );
            }
            ShaderType::YuvMrt => {
                for (plane, target) in snap_core::Plane::ALL.into_iter().zip(&targets) {
                    let div = plane.subsampling();
                    let logical = Size::new(call.dst_size.width / div, call.dst_size.height / div);
                    let mut target = lock_surface(target);
                    sampler::convert_plane(&source, mode, call.src_rect, plane, logical, &mut target);
                }
            }
        }
        trace!(
            shader = call.shader.name(),
            dst = %call.dst_size,
            flip = call.flip_vertically,
            swizzle = call.swizzle,
            "draw"
        );
        Ok(())
    }

    fn read_pixels(&self, rect: Rect, format: PixelFormat, out: &mut [u8]) -> GpuResult<()> {
        let required = format.image_bytes(rect.width, rect.height);
        if out.len() < required {
            return Err(Error::buffer_too_small(required, out.len()).into());
        }
        let pixels = self.read_framebuffer(rect, format)?;
        out[..required].copy_from_slice(&pixels);
        Ok(())
    }

    fn read_pixels_to_buffer(&self, rect: Rect, format: PixelFormat) -> GpuResult<()> {
        let pixels = self.read_framebuffer(rect, format)?;
        let mut state = self.state();
        let bound = state.bound_buffer;
        let buffer = state
            .buffers
            .get_mut(&bound)
            .ok_or_else(|| GpuError::invalid_operation("no pixel-pack buffer bound"))?;
        *buffer = pixels;
        Ok(())
    }

    fn map_buffer(&self, _target: BufferTarget) -> GpuResult<Vec<u8>> {
        let state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        state
            .buffers
            .get(&state.bound_buffer)
            .cloned()
            .ok_or_else(|| GpuError::invalid_operation("no pixel-pack buffer bound"))
    }

    fn begin_query(&self, _target: QueryTarget, id: QueryId) {
        let mut state = self.state();
        if let Some(query) = state.queries.get_mut(&id) {
            *query = QueryState::Active;
            state.active_query = Some(id);
        }
    }

    fn end_query(&self, _target: QueryTarget) {
        let mut state = self.state();
        if let Some(query) = state
            .active_query
            .take()
            .and_then(|id| state.queries.get_mut(&id))
        {
            *query = QueryState::Pending;
        }
    }

    fn query_result_available(&self, id: QueryId) -> bool {
        let state = self.state();
        !state.context_lost && state.queries.get(&id) == Some(&QueryState::Available)
    }

    fn gen_mailbox(&self) -> Mailbox {
        if self.is_context_lost() {
            return Mailbox::EMPTY;
        }
        self.share.gen_mailbox()
    }

    fn produce_texture(&self, _target: TextureTarget, mailbox: &Mailbox) -> GpuResult<()> {
        if mailbox.is_empty() {
            return Err(GpuError::invalid_operation("cannot produce into an empty mailbox"));
        }
        let surface = {
            let mut state = self.state();
            if state.context_lost {
                return Err(GpuError::ContextLost);
            }
            state
                .bound_texture_mut()?
                .surface
                .clone()
                .ok_or_else(|| GpuError::invalid_operation("bound texture has no storage"))?
        };
        self.share.produce(*mailbox, surface, self.stream);
        Ok(())
    }

    fn consume_texture(&self, _target: TextureTarget, mailbox: &Mailbox) -> GpuResult<()> {
        let mut state = self.state();
        if state.context_lost {
            return Err(GpuError::ContextLost);
        }
        let surface = self.share.consume(mailbox, self.stream, state.waited)?;
        state.bound_texture_mut()?.surface = Some(surface);
        Ok(())
    }

    fn insert_sync_point(&self) -> SyncPoint {
        if self.is_context_lost() {
            return SyncPoint::NONE;
        }
        self.share.insert_sync_point(self.stream)
    }

    fn wait_sync_point(&self, sync_point: SyncPoint) {
        if sync_point.is_none() || !self.share.has_passed(sync_point) {
            return;
        }
        let mut state = self.state();
        state.waited = state.waited.max(sync_point);
    }

    fn flush(&self) {
        self.complete_queries();
    }

    fn finish(&self) {
        self.complete_queries();
    }

    fn get_integer(&self, param: GlParam) -> u32 {
        match param {
            GlParam::MaxDrawBuffers => self.caps.max_draw_buffers,
            GlParam::MaxTextureSize => self.caps.max_texture_size,
        }
    }

    fn has_extension(&self, name: &str) -> bool {
        match name {
            EXT_DRAW_BUFFERS => self.caps.max_draw_buffers > 1,
            EXT_READ_FORMAT_BGRA => self.caps.bgra_readback,
            CHROMIUM_TEXTURE_MAILBOX => true,
            _ => false,
        }
    }

    fn implementation_color_read_format(&self) -> PixelFormat {
        let surface = self.state().attachment_surface(0).ok();
        let attached = surface.map(|s| lock_surface(&s).format);
        match attached {
            Some(PixelFormat::Rgb565) if self.caps.rgb565_readback => PixelFormat::Rgb565,
            _ if self.caps.bgra_readback => PixelFormat::Bgra8,
            _ => PixelFormat::Rgba8,
        }
    }

    fn is_context_lost(&self) -> bool {
        self.state().context_lost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(device: &SoftDevice, size: Size, rgba: [u8; 4]) -> TextureId {
        let data: Vec<u8> = rgba.repeat(size.area() as usize);
        device
            .create_texture_with_data(size, PixelFormat::Rgba8, &data)
            .unwrap()
    }

    fn attach(device: &SoftDevice, texture: TextureId) -> FramebufferId {
        let fb = device.gen_framebuffer();
        device.bind_framebuffer(FramebufferTarget::Framebuffer, fb);
        device.framebuffer_texture_2d(FramebufferTarget::Framebuffer, 0, texture);
        fb
    }

    #[test]
    fn test_read_pixels_formats() {
        let device = SoftDevice::new();
        let tex = solid(&device, Size::new(2, 2), [10, 20, 30, 40]);
        attach(&device, tex);

        let mut out = vec![0u8; 16];
        device
            .read_pixels(Rect::new(0, 0, 2, 2), PixelFormat::Bgra8, &mut out)
            .unwrap();
        assert_eq!(&out[..4], &[30, 20, 10, 40]);

        let err = device
            .read_pixels(Rect::new(0, 0, 2, 2), PixelFormat::Rgb565, &mut out)
            .unwrap_err();
        assert!(matches!(err, GpuError::UnsupportedReadbackFormat(PixelFormat::Rgb565)));
    }

    #[test]
    fn test_texture_size_limit() {
        let device = SoftDevice::builder().max_texture_size(64).build();
        let tex = device.gen_texture();
        device.bind_texture(TextureTarget::Texture2D, tex);
        let err = device
            .tex_image_2d(TextureTarget::Texture2D, Size::new(65, 1), PixelFormat::Rgba8, None)
            .unwrap_err();
        assert!(matches!(err, GpuError::TextureTooLarge { limit: 64, .. }));
    }

    #[test]
    fn test_memory_limit() {
        let device = SoftDevice::builder().texture_memory_limit(1024).build();
        let tex = device.gen_texture();
        device.bind_texture(TextureTarget::Texture2D, tex);
        device
            .tex_image_2d(TextureTarget::Texture2D, Size::new(16, 16), PixelFormat::Rgba8, None)
            .unwrap();
        // Reallocating the bound texture reuses its budget.
        device
            .tex_image_2d(TextureTarget::Texture2D, Size::new(16, 16), PixelFormat::Rgba8, None)
            .unwrap();

        let other = device.gen_texture();
        device.bind_texture(TextureTarget::Texture2D, other);
        let err = device
            .tex_image_2d(TextureTarget::Texture2D, Size::new(1, 1), PixelFormat::Rgba8, None)
            .unwrap_err();
        assert!(err.is_capability_shortfall());
    }

    #[test]
    fn test_queries_complete_on_flush() {
        let device = SoftDevice::new();
        let query = device.gen_query();
        device.begin_query(QueryTarget::CommandsCompleted, query);
        device.end_query(QueryTarget::CommandsCompleted);
        assert!(!device.query_result_available(query));

        device.set_queries_held(true);
        device.flush();
        assert!(!device.query_result_available(query));

        device.set_queries_held(false);
        device.flush();
        assert!(device.query_result_available(query));
    }

    #[test]
    fn test_copy_sub_image() {
        let device = SoftDevice::new();
        let src = solid(&device, Size::new(4, 4), [255, 0, 0, 255]);
        let dst = solid(&device, Size::new(4, 4), [0, 0, 255, 255]);
        attach(&device, src);
        device.bind_texture(TextureTarget::Texture2D, dst);
        device
            .copy_tex_sub_image_2d(TextureTarget::Texture2D, 2, 2, Rect::new(0, 0, 2, 2))
            .unwrap();

        let data = device.read_texture(dst).unwrap();
        let texel = |x: usize, y: usize| &data[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(texel(3, 3), &[255, 0, 0, 255]);
        assert_eq!(texel(1, 1), &[0, 0, 255, 255]);
    }

    #[test]
    fn test_lost_context() {
        let device = SoftDevice::new();
        device.lose_context();
        assert!(device.gen_texture().is_null());
        assert!(device.gen_mailbox().is_empty());
        assert!(device.insert_sync_point().is_none());
        assert!(device.is_context_lost());
    }

    #[test]
    fn test_mrt_shader_needs_draw_buffers() {
        let device = SoftDevice::builder().max_draw_buffers(1).build();
        let source = ShaderType::YuvMrt.fragment_source();
        assert!(device.compile_shader(ShaderStage::Fragment, &source).is_err());
        assert!(!device.has_extension(EXT_DRAW_BUFFERS));
    }
}
