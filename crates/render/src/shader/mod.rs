//! Shader programs and their reflected binding tables.
//!
//! A [`Shader`] owns one linked program plus the per-draw inputs bound to
//! it: the uniform block bytes, sampler units and vertex streams. Binding
//! helpers (`Transform::apply`, `Camera::apply`, `Lights::apply`, ...) write
//! into the shader by name; names the program does not use are ignored, so
//! the same helpers serve every program variant.
//!
//! # Invariants
//! - Tables are built once from reflection and never change.
//! - A shader whose program failed to build stays usable as a value; draws
//!   with it are skipped by [`RenderContext::draw`].

pub mod library;
pub mod reflect;
pub mod uniform;
pub mod variant;

pub use reflect::{AttributeInfo, AttributeKind, ProgramReflection, SampleKind, UniformKind};
pub use uniform::{UniformSlot, UniformTable, UniformValue, UniformWrite};
pub use variant::{ExtendedVariant, ForwardVariant, NativeVariant, ProgramKind, ShaderVariant};

use crate::context::RenderContext;
use crate::gpu::{
    BufferId, DepthBias, ProgramId, RenderState, StepMode, TextureBinding, TextureId,
    VertexAttribute, VertexFormat, VertexStream,
};
use lumen_common::DepthBiasConfig;
use std::collections::HashMap;

/// Source of one program: a WGSL module with `vs_main` and `fs_main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub label: String,
    pub code: String,
}

impl ShaderSource {
    pub fn new(label: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
        }
    }
}

/// Fixed-function behaviour requested by a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderOptions {
    /// Alpha blending; also disables depth writes and flips the depth bias
    /// negative so the geometry lands over, not into, opaque depth.
    pub blend: bool,
    /// Full-screen pass: no depth test or writes, no culling, no bias.
    pub post_process: bool,
}

impl ShaderOptions {
    pub const OPAQUE: Self = Self {
        blend: false,
        post_process: false,
    };
    pub const BLEND: Self = Self {
        blend: true,
        post_process: false,
    };
    pub const POST_PROCESS: Self = Self {
        blend: false,
        post_process: true,
    };

    /// Render state for a draw with these options inside a started target.
    pub fn state(self, bias: &DepthBiasConfig) -> RenderState {
        let mut state = RenderState::target_default(DepthBias {
            constant: bias.constant,
            slope_scale: bias.slope_scale,
        });
        if self.blend {
            state.blend = true;
            state.depth_write = false;
            state.depth_bias = DepthBias {
                constant: bias.translucent_constant,
                slope_scale: bias.translucent_slope_scale,
            };
        }
        if self.post_process {
            state.depth_test = false;
            state.depth_write = false;
            state.cull_back = false;
            state.depth_bias = DepthBias::default();
        }
        state
    }
}

/// A linked program, its reflected tables, and its current inputs.
#[derive(Debug)]
pub struct Shader {
    label: String,
    program: Option<ProgramId>,
    options: ShaderOptions,
    uniforms: UniformTable,
    attributes: HashMap<String, AttributeInfo>,
    texture_units: Vec<u32>,
    block: Vec<u8>,
    textures: Vec<TextureBinding>,
    streams: Vec<VertexStream>,
}

impl Shader {
    /// Compile `source` through the context's backend. A failure is logged
    /// and yields a shader with no program.
    pub fn new(ctx: &mut RenderContext, source: &ShaderSource, options: ShaderOptions) -> Self {
        let program = match ctx.gpu_mut().create_program(source) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(shader = %source.label, "shader build failed: {e}");
                return Self::null(&source.label, options);
            }
        };
        let Some(reflection) = ctx.gpu().program_reflection(program) else {
            tracing::error!(shader = %source.label, "backend returned no reflection");
            ctx.gpu_mut().destroy_program(program);
            return Self::null(&source.label, options);
        };
        tracing::debug!(
            shader = %source.label,
            uniforms = reflection.uniforms.len(),
            attributes = reflection.attributes.len(),
            textures = reflection.textures.len(),
            "shader ready"
        );
        Self::from_reflection(&source.label, Some(program), options, &reflection)
    }

    /// A shader with no program; every draw with it is skipped.
    pub fn null(label: &str, options: ShaderOptions) -> Self {
        Self::from_reflection(label, None, options, &ProgramReflection::default())
    }

    fn from_reflection(
        label: &str,
        program: Option<ProgramId>,
        options: ShaderOptions,
        reflection: &ProgramReflection,
    ) -> Self {
        let uniforms = UniformTable::from_reflection(reflection);
        let block = vec![0; uniforms.block_size()];
        Self {
            label: label.to_owned(),
            program,
            options,
            uniforms,
            attributes: reflection
                .attributes
                .iter()
                .map(|a| (a.name.clone(), a.clone()))
                .collect(),
            texture_units: reflection.textures.iter().map(|t| t.unit).collect(),
            block,
            textures: Vec::new(),
            streams: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_ready(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn options(&self) -> ShaderOptions {
        self.options
    }

    pub fn uniforms(&self) -> &UniformTable {
        &self.uniforms
    }

    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.contains(name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.get(name)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &AttributeInfo> {
        self.attributes.values()
    }

    /// Sampler units the program reads.
    pub fn texture_units(&self) -> &[u32] {
        &self.texture_units
    }

    /// Set a uniform by name. Unknown names and mismatched types are
    /// no-ops; returns whether the value was written.
    pub fn set_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        match self.uniforms.write(&mut self.block, name, value.into()) {
            UniformWrite::Written => true,
            UniformWrite::Missing => {
                tracing::trace!(shader = %self.label, uniform = name, "uniform not used");
                false
            }
            UniformWrite::TypeMismatch => {
                tracing::debug!(shader = %self.label, uniform = name, "uniform type mismatch");
                false
            }
        }
    }

    /// Feed a per-vertex attribute from a tightly packed float buffer.
    pub fn set_attribute(&mut self, name: &str, buffer: BufferId) -> bool {
        let Some(info) = self.attributes.get(name) else {
            tracing::trace!(shader = %self.label, attribute = name, "attribute not used");
            return false;
        };
        if info.kind.is_matrix() {
            let stride = info.components() as u64 * 4;
            return self.set_matrix_attribute(name, buffer, stride, 0, StepMode::Vertex);
        }
        let Some(format) = VertexFormat::from_components(info.components()) else {
            return false;
        };
        let stream = VertexStream {
            buffer,
            offset: 0,
            stride: format.size(),
            step: StepMode::Vertex,
            attributes: vec![VertexAttribute {
                location: info.location,
                format,
                offset: 0,
            }],
        };
        self.bind_stream(stream);
        true
    }

    /// Feed a matrix attribute. Each column occupies one consecutive slot;
    /// `offset` is the byte offset of the first column inside an element of
    /// `stride` bytes. With [`StepMode::Instance`] one matrix is consumed
    /// per instance.
    pub fn set_matrix_attribute(
        &mut self,
        name: &str,
        buffer: BufferId,
        stride: u64,
        offset: u64,
        step: StepMode,
    ) -> bool {
        let Some(info) = self.attributes.get(name) else {
            tracing::trace!(shader = %self.label, attribute = name, "attribute not used");
            return false;
        };
        let Some(format) = VertexFormat::from_components(info.kind.slot_components()) else {
            return false;
        };
        let attributes = (0..info.kind.slots())
            .map(|i| VertexAttribute {
                location: info.location + i,
                format,
                offset: offset + i as u64 * format.size(),
            })
            .collect();
        self.bind_stream(VertexStream {
            buffer,
            offset: 0,
            stride,
            step,
            attributes,
        });
        true
    }

    /// Bind a texture to a sampler unit, replacing any previous binding.
    pub fn bind_texture(&mut self, unit: u32, texture: TextureId) {
        match self.textures.iter_mut().find(|b| b.unit == unit) {
            Some(binding) => binding.texture = texture,
            None => self.textures.push(TextureBinding { unit, texture }),
        }
    }

    /// Drop all bound streams and textures. Uniform values are kept.
    pub fn clear_bindings(&mut self) {
        self.textures.clear();
        self.streams.clear();
    }

    pub fn uniform_block(&self) -> &[u8] {
        &self.block
    }

    pub fn texture_bindings(&self) -> &[TextureBinding] {
        &self.textures
    }

    pub fn streams(&self) -> &[VertexStream] {
        &self.streams
    }

    /// Release the program. The shader becomes a null shader.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        if let Some(program) = self.program.take() {
            ctx.gpu_mut().destroy_program(program);
        }
        self.clear_bindings();
    }

    // A stream replaces every existing stream that feeds any of its
    // locations.
    fn bind_stream(&mut self, stream: VertexStream) {
        let locations: Vec<u32> = stream.attributes.iter().map(|a| a.location).collect();
        self.streams
            .retain(|s| !s.attributes.iter().any(|a| locations.contains(&a.location)));
        self.streams.push(stream);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{RecordingGpu, StencilMode};

    const INSTANCED: &str = r#"
struct Uniforms { view_projection: mat4x4<f32>, tint: vec4<f32> };
@group(0) @binding(0) var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) model_0: vec4<f32>,
    @location(2) model_1: vec4<f32>,
    @location(3) model_2: vec4<f32>,
    @location(4) model_3: vec4<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(in.model_0, in.model_1, in.model_2, in.model_3);
    return u.view_projection * model * vec4<f32>(in.position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return u.tint;
}
"#;

    fn context() -> RenderContext {
        RenderContext::new(RecordingGpu::new(64, 64), DepthBiasConfig::default())
    }

    #[test]
    fn builds_tables_from_reflection() {
        let mut ctx = context();
        let shader = Shader::new(&mut ctx, &ShaderSource::new("inst", INSTANCED), ShaderOptions::OPAQUE);
        assert!(shader.is_ready());
        assert!(shader.has_uniform("tint"));
        assert!(shader.has_attribute("model"));
        assert_eq!(shader.attribute("model").unwrap().kind, AttributeKind::Mat4);
        assert_eq!(shader.uniform_block().len(), 80);
    }

    #[test]
    fn broken_source_yields_null_shader() {
        let mut ctx = context();
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("bad", "fn ("), ShaderOptions::OPAQUE);
        assert!(!shader.is_ready());
        assert!(!shader.set_uniform("tint", glam::Vec4::ONE));
    }

    #[test]
    fn matrix_attribute_spans_four_locations() {
        let mut ctx = context();
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("inst", INSTANCED), ShaderOptions::OPAQUE);
        assert!(shader.set_matrix_attribute("model", BufferId(9), 100, 0, StepMode::Instance));
        let stream = &shader.streams()[0];
        assert_eq!(stream.step, StepMode::Instance);
        let locations: Vec<_> = stream.attributes.iter().map(|a| (a.location, a.offset)).collect();
        assert_eq!(locations, [(1, 0), (2, 16), (3, 32), (4, 48)]);

        // Rebinding replaces rather than accumulates.
        shader.set_matrix_attribute("model", BufferId(10), 64, 0, StepMode::Instance);
        assert_eq!(shader.streams().len(), 1);
        assert_eq!(shader.streams()[0].buffer, BufferId(10));
    }

    #[test]
    fn blend_options_flip_depth_state() {
        let bias = DepthBiasConfig::default();
        let opaque = ShaderOptions::OPAQUE.state(&bias);
        assert!(opaque.depth_write && !opaque.blend);
        assert_eq!(opaque.depth_bias.constant, 1);

        let blend = ShaderOptions::BLEND.state(&bias);
        assert!(blend.blend && !blend.depth_write && blend.depth_test);
        assert!(blend.depth_bias.constant < 0 && blend.depth_bias.slope_scale < 0.0);

        let post = ShaderOptions::POST_PROCESS.state(&bias);
        assert!(!post.depth_test && !post.cull_back);
        assert_eq!(post.stencil, StencilMode::Disabled);
    }
}
