//! GPU backend interface.
//!
//! The rendering core never talks to a graphics API directly. Everything it
//! needs from the host GPU goes through [`GpuBackend`]: resource creation and
//! destruction by opaque handle, pass boundaries, and self-contained
//! [`DrawPacket`]s that carry the program, fixed-function state, uniform block
//! bytes, texture units and vertex streams of one draw.
//!
//! # Invariants
//! - Handles are never reused by a backend within its lifetime.
//! - Passes and draws are issued in frame order from one thread.
//! - A draw references only resources that were live when it was issued;
//!   backends skip (and report) draws that break this rather than panic.

mod recording;

pub use recording::{DrawRecord, PassRecord, RecordingGpu, StateToggles};

use crate::shader::reflect::ProgramReflection;
use crate::shader::ShaderSource;
use lumen_common::Color;
use std::any::Any;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

gpu_handle!(
    /// A texture (sampled image or attachment).
    TextureId
);
gpu_handle!(
    /// A vertex/instance data buffer.
    BufferId
);
gpu_handle!(
    /// A set of attachments a pass can render into.
    FramebufferId
);
gpu_handle!(
    /// A linked vertex + fragment program.
    ProgramId
);

/// Errors reported by a GPU backend.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureId),
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),
    #[error("unknown framebuffer {0:?}")]
    UnknownFramebuffer(FramebufferId),
    #[error("unknown program {0:?}")]
    UnknownProgram(ProgramId),
    #[error("shader `{label}` failed to compile: {message}")]
    Compile { label: String, message: String },
    #[error("vertex input `{name}` (location {location}) has no stream bound")]
    MissingAttribute { name: String, location: u32 },
    #[error("expected {expected} bytes of data, got {actual}")]
    DataSize { expected: usize, actual: usize },
    #[error("draw issued outside of a pass")]
    NoActivePass,
    #[error("capability probe failed: {0}")]
    Probe(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("surface error: {0}")]
    Surface(String),
}

/// Storage format of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit color.
    Rgba8Unorm,
    /// Half-float color, used for normal/position attachments.
    Rgba16Float,
    /// Full-float color, used for small lookup tables. Not filterable.
    Rgba32Float,
    /// Depth only, sampleable.
    Depth32Float,
    /// Combined depth/stencil attachment.
    Depth24PlusStencil8,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24PlusStencil8)
    }

    /// Whether linear filtering is allowed when sampling.
    pub fn is_filterable(self) -> bool {
        matches!(self, Self::Rgba8Unorm | Self::Rgba16Float)
    }

    /// Bytes per texel for CPU uploads; `None` for formats that cannot be
    /// written from the CPU.
    pub fn bytes_per_texel(self) -> Option<usize> {
        match self {
            Self::Rgba8Unorm => Some(4),
            Self::Rgba16Float => Some(8),
            Self::Rgba32Float => Some(16),
            Self::Depth32Float => Some(4),
            Self::Depth24PlusStencil8 => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Wrap {
    Repeat,
    Clamp,
}

/// Everything a backend needs to allocate a texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub filter: Filter,
    pub wrap: Wrap,
    pub mip_levels: u32,
}

impl<'a> TextureDesc<'a> {
    /// Single-level, clamped, linearly filtered texture.
    pub fn new(label: &'a str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            filter: if format.is_filterable() {
                Filter::Linear
            } else {
                Filter::Nearest
            },
            wrap: Wrap::Clamp,
            mip_levels: 1,
        }
    }

    /// Size of mip `level` in texels.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }
}

/// Attachments of an offscreen target. The depth/stencil texture may be
/// owned by another framebuffer; backends do not track ownership.
#[derive(Debug, Clone, Copy)]
pub struct FramebufferDesc<'a> {
    pub label: &'a str,
    pub color: &'a [TextureId],
    pub depth_stencil: Option<TextureId>,
}

/// Where a pass renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRef {
    /// The presentable surface (with its backend-owned depth/stencil).
    Display,
    Framebuffer(FramebufferId),
}

/// Clear operations at pass start; `None` loads the existing contents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearOps {
    pub color: Option<Color>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearOps {
    pub fn all(color: Color) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }
}

/// Start of a pass.
#[derive(Debug, Clone, Copy)]
pub struct PassDesc<'a> {
    pub label: &'a str,
    pub target: TargetRef,
    pub clear: ClearOps,
}

/// Polygon depth offset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthBias {
    pub constant: i32,
    pub slope_scale: f32,
}

/// Stencil behaviour of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StencilMode {
    #[default]
    Disabled,
    /// Every fragment written replaces the stencil value with `reference`.
    Write { reference: u32 },
    /// Fragments pass only where stencil equals `reference`; stencil is kept.
    Equal { reference: u32 },
}

/// Fixed-function state of a draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_back: bool,
    pub depth_bias: DepthBias,
    /// Source-alpha blending.
    pub blend: bool,
    pub stencil: StencilMode,
    /// One bit per color attachment; cleared bits are write-masked.
    pub color_mask: u8,
}

impl RenderState {
    pub const ALL_ATTACHMENTS: u8 = 0xff;

    /// The state a render target establishes when it starts.
    pub fn target_default(depth_bias: DepthBias) -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            cull_back: true,
            depth_bias,
            blend: false,
            stencil: StencilMode::Disabled,
            color_mask: Self::ALL_ATTACHMENTS,
        }
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::target_default(DepthBias::default())
    }
}

/// Element format of one vertex attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn from_components(components: u32) -> Option<Self> {
        match components {
            1 => Some(Self::Float32),
            2 => Some(Self::Float32x2),
            3 => Some(Self::Float32x3),
            4 => Some(Self::Float32x4),
            _ => None,
        }
    }

    pub fn size(self) -> u64 {
        match self {
            Self::Float32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

/// Rate at which a stream advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepMode {
    Vertex,
    /// Advances once per instance (divisor 1).
    Instance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset inside one stream element.
    pub offset: u64,
}

/// One bound vertex buffer and the attributes it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexStream {
    pub buffer: BufferId,
    /// Byte offset of the first element in the buffer.
    pub offset: u64,
    pub stride: u64,
    pub step: StepMode,
    pub attributes: Vec<VertexAttribute>,
}

/// A texture bound to a sampler unit for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub unit: u32,
    pub texture: TextureId,
}

/// One self-contained draw submission.
#[derive(Debug, Clone, Copy)]
pub struct DrawPacket<'a> {
    pub program: ProgramId,
    pub state: RenderState,
    /// Uniform block contents laid out per the program's reflection.
    pub uniforms: &'a [u8],
    pub textures: &'a [TextureBinding],
    pub streams: &'a [VertexStream],
    /// Vertices per instance.
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// Support level for a GPU feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Support {
    None,
    /// Available through an extension with the usual restrictions.
    Extension,
    Native,
}

/// What the host GPU can do, as reported by a backend probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub backend: String,
    pub instancing: Support,
    pub multiple_render_targets: Support,
    pub max_color_attachments: u32,
    /// Half-float color attachments are renderable.
    pub float_render_targets: bool,
    /// Simultaneously bound textures per program.
    pub max_texture_units: u32,
}

impl Capabilities {
    /// The lowest common denominator every backend can provide.
    pub fn baseline(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            instancing: Support::None,
            multiple_render_targets: Support::None,
            max_color_attachments: 1,
            float_render_targets: false,
            max_texture_units: 8,
        }
    }

    /// Everything the deferred pipeline can use natively.
    pub fn full(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            instancing: Support::Native,
            multiple_render_targets: Support::Native,
            max_color_attachments: 8,
            float_render_targets: true,
            max_texture_units: 16,
        }
    }
}

/// The host graphics API as seen by the rendering core.
pub trait GpuBackend {
    fn name(&self) -> &str;

    /// Query what the host supports. May fail on broken drivers; callers
    /// degrade to the baseline tier.
    fn probe(&self) -> Result<Capabilities, GpuError>;

    /// Current size of the presentable surface.
    fn surface_size(&self) -> (u32, u32);
    fn resize_surface(&mut self, width: u32, height: u32);

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, GpuError>;
    /// Replace the contents of one mip level; `data` must cover it exactly.
    fn write_texture(&mut self, id: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError>;
    fn destroy_texture(&mut self, id: TextureId);

    fn create_buffer(&mut self, label: &str, data: &[u8]) -> Result<BufferId, GpuError>;
    /// Replace the contents of a buffer, growing it if needed.
    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), GpuError>;
    fn destroy_buffer(&mut self, id: BufferId);

    fn create_framebuffer(&mut self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId, GpuError>;
    fn destroy_framebuffer(&mut self, id: FramebufferId);

    /// Compile and link a program.
    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, GpuError>;
    /// Introspected interface of a linked program.
    fn program_reflection(&self, id: ProgramId) -> Option<ProgramReflection>;
    fn destroy_program(&mut self, id: ProgramId);

    fn begin_pass(&mut self, pass: &PassDesc<'_>) -> Result<(), GpuError>;
    fn draw(&mut self, packet: &DrawPacket<'_>) -> Result<(), GpuError>;
    /// Flush recorded work and present.
    fn end_frame(&mut self) -> Result<(), GpuError>;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_sizes_bottom_out_at_one() {
        let desc = TextureDesc::new("t", 8, 2, TextureFormat::Rgba8Unorm);
        assert_eq!(desc.level_size(0), (8, 2));
        assert_eq!(desc.level_size(1), (4, 1));
        assert_eq!(desc.level_size(3), (1, 1));
    }

    #[test]
    fn float_tables_are_nearest_filtered() {
        let desc = TextureDesc::new("table", 4, 1, TextureFormat::Rgba32Float);
        assert_eq!(desc.filter, Filter::Nearest);
        assert!(!TextureFormat::Rgba32Float.is_filterable());
    }

    #[test]
    fn support_orders_by_capability() {
        assert!(Support::Native > Support::Extension);
        assert!(Support::Extension > Support::None);
    }
}
