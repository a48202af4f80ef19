//! Mapping from core GPU types to wgpu, and capability derivation.

use lumen_common::Color;
use lumen_render::gpu::{Capabilities, Filter, StepMode, Support, TextureFormat, VertexFormat, Wrap};

pub fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// Usages a texture of `format` is created with.
pub fn texture_usage(format: TextureFormat) -> wgpu::TextureUsages {
    let base = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT;
    match format {
        // Lookup tables are written from the CPU and never rendered into.
        TextureFormat::Rgba32Float => wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        TextureFormat::Depth32Float | TextureFormat::Depth24PlusStencil8 => base,
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba16Float => base | wgpu::TextureUsages::COPY_DST,
    }
}

pub fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
    }
}

pub fn step_mode(step: StepMode) -> wgpu::VertexStepMode {
    match step {
        StepMode::Vertex => wgpu::VertexStepMode::Vertex,
        StepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

pub fn filter_mode(filter: Filter) -> wgpu::FilterMode {
    match filter {
        Filter::Nearest => wgpu::FilterMode::Nearest,
        Filter::Linear => wgpu::FilterMode::Linear,
    }
}

pub fn address_mode(wrap: Wrap) -> wgpu::AddressMode {
    match wrap {
        Wrap::Repeat => wgpu::AddressMode::Repeat,
        Wrap::Clamp => wgpu::AddressMode::ClampToEdge,
    }
}

pub fn color_load(clear: Option<Color>) -> wgpu::LoadOp<wgpu::Color> {
    match clear {
        Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        }),
        None => wgpu::LoadOp::Load,
    }
}

pub fn load<T>(clear: Option<T>) -> wgpu::LoadOp<T> {
    clear.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear)
}

/// Capabilities of an adapter as the tier selection sees them.
///
/// wgpu instances every backend it runs on, so instancing is always native.
/// Multiple render targets count as native only on fully WebGPU-compliant
/// adapters; downlevel (GLES/WebGL2) adapters report them as an extension.
pub fn capabilities(
    backend: &str,
    limits: &wgpu::Limits,
    downlevel: &wgpu::DownlevelCapabilities,
    float_renderable: bool,
) -> Capabilities {
    let multiple_render_targets = if limits.max_color_attachments < 2 {
        Support::None
    } else if downlevel.is_webgpu_compliant() {
        Support::Native
    } else {
        Support::Extension
    };
    Capabilities {
        backend: backend.to_owned(),
        instancing: Support::Native,
        multiple_render_targets,
        max_color_attachments: limits.max_color_attachments,
        float_render_targets: float_renderable,
        max_texture_units: limits.max_sampled_textures_per_shader_stage,
    }
}
