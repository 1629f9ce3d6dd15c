//! GLSL sources for the scale and planar conversion passes.

use snap_core::pixel::Plane;
use tracing::{debug, warn};

use crate::GpuResult;
use crate::device::{GraphicsDevice, ProgramId, ShaderStage};
use crate::handles::{ScopedProgram, ScopedShader};

/// Fragment program kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderType {
    /// One bilinear tap per output pixel.
    Bilinear,
    /// 4x4 Mitchell-Netravali taps per output pixel.
    Bicubic,
    /// One plane of BT.601 YUV, four samples packed per RGBA texel.
    Planar(Plane),
    /// Y, U and V into three color attachments in one draw.
    YuvMrt,
}

impl ShaderType {
    /// Fragment source for this kind.
    pub fn fragment_source(&self) -> String {
        match self {
            Self::Bilinear => BILINEAR_FRAGMENT.to_string(),
            Self::Bicubic => BICUBIC_FRAGMENT.to_string(),
            Self::Planar(plane) => {
                let [r, g, b, offset] = plane.weights();
                PLANAR_FRAGMENT
                    .replace("$WEIGHTS", &format!("vec4({r:.4}, {g:.4}, {b:.4}, {offset:.4})"))
                    .replace("$SUBSAMPLE", &format!("{:.1}", plane.subsampling() as f32))
            }
            Self::YuvMrt => YUV_MRT_FRAGMENT.to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bilinear => "bilinear",
            Self::Bicubic => "bicubic",
            Self::Planar(Plane::Y) => "planar_y",
            Self::Planar(Plane::U) => "planar_u",
            Self::Planar(Plane::V) => "planar_v",
            Self::YuvMrt => "yuv_mrt",
        }
    }
}

/// Shared vertex stage: a full-target quad with source texture coordinates.
pub const VERTEX: &str = r#"
attribute vec2 a_position;
uniform vec4 src_rect;     // x, y, w, h in normalized source coordinates
uniform float flip;        // 1.0 flips the output vertically
varying vec2 v_texcoord;

void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    vec2 uv = a_position * 0.5 + 0.5;
    uv.y = mix(uv.y, 1.0 - uv.y, flip);
    v_texcoord = src_rect.xy + uv * src_rect.zw;
}
"#;

/// Bilinear resample; filtering comes from the sampler state.
pub const BILINEAR_FRAGMENT: &str = r#"
precision mediump float;
uniform sampler2D s_texture;
uniform float swizzle;
varying vec2 v_texcoord;

void main() {
    vec4 c = texture2D(s_texture, v_texcoord);
    gl_FragColor = mix(c, c.bgra, swizzle);
}
"#;

/// Bicubic resample with Mitchell-Netravali weights (B = C = 1/3).
pub const BICUBIC_FRAGMENT: &str = r#"
precision highp float;
uniform sampler2D s_texture;
uniform vec2 src_pixelsize;
uniform float swizzle;
varying vec2 v_texcoord;

float bicubic_weight(float x) {
    const float B = 1.0 / 3.0;
    const float C = 1.0 / 3.0;
    x = abs(x);
    if (x < 1.0) {
        return ((12.0 - 9.0 * B - 6.0 * C) * x * x * x
              + (-18.0 + 12.0 * B + 6.0 * C) * x * x
              + (6.0 - 2.0 * B)) / 6.0;
    }
    if (x < 2.0) {
        return ((-B - 6.0 * C) * x * x * x + (6.0 * B + 30.0 * C) * x * x
              + (-12.0 * B - 48.0 * C) * x + (8.0 * B + 24.0 * C)) / 6.0;
    }
    return 0.0;
}

void main() {
    vec2 pos = v_texcoord / src_pixelsize - 0.5;
    vec2 base = floor(pos);
    vec2 frac = pos - base;
    vec4 sum = vec4(0.0);
    float total = 0.0;
    for (int j = -1; j <= 2; j++) {
        for (int i = -1; i <= 2; i++) {
            float w = bicubic_weight(float(i) - frac.x) * bicubic_weight(float(j) - frac.y);
            sum += w * texture2D(s_texture, (base + vec2(i, j) + 0.5) * src_pixelsize);
            total += w;
        }
    }
    vec4 c = sum / total;
    gl_FragColor = mix(c, c.bgra, swizzle);
}
"#;

/// One YUV plane, four horizontally adjacent samples per output texel.
///
/// `$WEIGHTS` and `$SUBSAMPLE` are substituted per plane.
pub const PLANAR_FRAGMENT: &str = r#"
precision mediump float;
uniform sampler2D s_texture;
uniform vec2 src_pixelsize;
varying vec2 v_texcoord;

const vec4 weights = $WEIGHTS;
const float subsample = $SUBSAMPLE;

float convert(vec2 uv) {
    vec3 rgb = texture2D(s_texture, uv).rgb;
    return dot(weights.rgb, rgb) + weights.a;
}

void main() {
    vec2 step = vec2(src_pixelsize.x * subsample, 0.0);
    vec2 first = v_texcoord - 1.5 * step;
    gl_FragColor = vec4(
        convert(first),
        convert(first + step),
        convert(first + 2.0 * step),
        convert(first + 3.0 * step));
}
"#;

/// Y, U and V in one draw. Requires `GL_EXT_draw_buffers` with at least
/// three attachments.
pub const YUV_MRT_FRAGMENT: &str = r#"
#extension GL_EXT_draw_buffers : enable
precision mediump float;
uniform sampler2D s_texture;
uniform vec2 src_pixelsize;
varying vec2 v_texcoord;

const vec4 y_weights = vec4(0.257, 0.504, 0.098, 0.0625);
const vec4 u_weights = vec4(-0.148, -0.291, 0.439, 0.5);
const vec4 v_weights = vec4(0.439, -0.368, -0.071, 0.5);

vec4 packed(vec4 weights, vec2 uv, float subsample) {
    vec2 step = vec2(src_pixelsize.x * subsample, 0.0);
    vec2 first = uv - 1.5 * step;
    vec4 out_texel;
    for (int i = 0; i < 4; i++) {
        vec3 rgb = texture2D(s_texture, first + float(i) * step).rgb;
        out_texel[i] = dot(weights.rgb, rgb) + weights.a;
    }
    return out_texel;
}

void main() {
    gl_FragData[0] = packed(y_weights, v_texcoord, 1.0);
    gl_FragData[1] = packed(u_weights, v_texcoord, 2.0);
    gl_FragData[2] = packed(v_weights, v_texcoord, 2.0);
}
"#;

/// A linked program for one [`ShaderType`].
///
/// The intermediate shader objects are deleted once the program links.
pub struct ShaderProgram<'d, D: GraphicsDevice> {
    program: ScopedProgram<'d, D>,
    shader: ShaderType,
}

impl<'d, D: GraphicsDevice> ShaderProgram<'d, D> {
    /// Compiles and links the program for `shader`.
    pub fn build(device: &'d D, shader: ShaderType) -> GpuResult<Self> {
        let vertex = ScopedShader::adopt(device, device.compile_shader(ShaderStage::Vertex, VERTEX)?);
        let fragment_source = shader.fragment_source();
        let fragment = match device.compile_shader(ShaderStage::Fragment, &fragment_source) {
            Ok(id) => ScopedShader::adopt(device, id),
            Err(err) => {
                warn!(shader = shader.name(), error = %err, "Fragment shader failed to compile");
                return Err(err);
            }
        };
        let program = device.link_program(vertex.id(), fragment.id())?;
        debug!(shader = shader.name(), program = program.0, "Linked program");
        Ok(Self {
            program: ScopedProgram::adopt(device, program),
            shader,
        })
    }

    pub fn id(&self) -> ProgramId {
        self.program.id()
    }

    pub fn shader_type(&self) -> ShaderType {
        self.shader
    }
}
