//! The explicit render context threaded through every bind and draw.
//!
//! Owns the backend, the per-pass state overrides (stencil mode, color
//! mask, material depth bias), lazily created helper resources, and the
//! statistics of the frame being recorded.

use crate::gpu::{
    BufferId, DrawPacket, GpuBackend, GpuError, PassDesc, RenderState, StencilMode, TextureBinding,
    TextureDesc, TextureFormat, TextureId,
};
use crate::shader::Shader;
use lumen_common::{Color, DepthBiasConfig};

/// Counters for one recorded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: u32,
    /// Draw packets accepted by the backend.
    pub draws: u32,
    /// Draws dropped: null program or refused by the backend.
    pub skipped: u32,
}

/// Two triangles covering clip space, counter-clockwise.
const FULLSCREEN_QUAD: [f32; 12] = [
    -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, //
    -1.0, -1.0, 1.0, 1.0, -1.0, 1.0,
];

pub struct RenderContext {
    gpu: Box<dyn GpuBackend>,
    depth_bias: DepthBiasConfig,
    stencil: StencilMode,
    color_mask: u8,
    material_bias: i32,
    quad: Option<BufferId>,
    white: Option<TextureId>,
    transparent: Option<TextureId>,
    stats: FrameStats,
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("backend", &self.gpu.name())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl RenderContext {
    pub fn new(gpu: impl GpuBackend + 'static, depth_bias: DepthBiasConfig) -> Self {
        Self::from_boxed(Box::new(gpu), depth_bias)
    }

    pub fn from_boxed(gpu: Box<dyn GpuBackend>, depth_bias: DepthBiasConfig) -> Self {
        Self {
            gpu,
            depth_bias,
            stencil: StencilMode::Disabled,
            color_mask: RenderState::ALL_ATTACHMENTS,
            material_bias: 0,
            quad: None,
            white: None,
            transparent: None,
            stats: FrameStats::default(),
        }
    }

    pub fn gpu(&self) -> &dyn GpuBackend {
        self.gpu.as_ref()
    }

    pub fn gpu_mut(&mut self) -> &mut dyn GpuBackend {
        self.gpu.as_mut()
    }

    /// The concrete backend, if it is a `B`.
    pub fn backend<B: GpuBackend + 'static>(&self) -> Option<&B> {
        self.gpu.as_any().downcast_ref()
    }

    pub fn backend_mut<B: GpuBackend + 'static>(&mut self) -> Option<&mut B> {
        self.gpu.as_any_mut().downcast_mut()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.gpu.surface_size()
    }

    pub fn depth_bias(&self) -> &DepthBiasConfig {
        &self.depth_bias
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Start a pass and reset the per-pass overrides to target defaults.
    pub fn begin_pass(&mut self, pass: &PassDesc<'_>) -> Result<(), GpuError> {
        self.gpu.begin_pass(pass)?;
        self.stencil = StencilMode::Disabled;
        self.color_mask = RenderState::ALL_ATTACHMENTS;
        self.material_bias = 0;
        self.stats.passes += 1;
        tracing::trace!(pass = pass.label, "pass started");
        Ok(())
    }

    pub fn set_stencil(&mut self, mode: StencilMode) {
        self.stencil = mode;
    }

    /// Restrict writes to the attachments whose bit is set.
    pub fn set_color_mask(&mut self, mask: u8) {
        self.color_mask = mask;
    }

    /// Extra constant depth bias for the following draws.
    pub fn set_material_bias(&mut self, bias: i32) {
        self.material_bias = bias;
    }

    /// Issue a draw with `shader`'s current inputs. A shader without a
    /// program is skipped; a draw the backend refuses is skipped and its
    /// error returned.
    pub fn draw(&mut self, shader: &Shader, vertex_count: u32, instance_count: u32) -> Result<(), GpuError> {
        let Some(program) = shader.program() else {
            tracing::trace!(shader = shader.label(), "skipping draw with null program");
            self.stats.skipped += 1;
            return Ok(());
        };

        let options = shader.options();
        let mut state = options.state(&self.depth_bias);
        if !options.post_process {
            state.depth_bias.constant += self.material_bias;
        }
        state.stencil = self.stencil;
        state.color_mask = self.color_mask;

        let mut textures = shader.texture_bindings().to_vec();
        for &unit in shader.texture_units() {
            if !textures.iter().any(|b| b.unit == unit) {
                let texture = self.white_texture()?;
                textures.push(TextureBinding { unit, texture });
            }
        }

        let packet = DrawPacket {
            program,
            state,
            uniforms: shader.uniform_block(),
            textures: &textures,
            streams: shader.streams(),
            vertex_count,
            instance_count,
        };
        match self.gpu.draw(&packet) {
            Ok(()) => {
                self.stats.draws += 1;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(shader = shader.label(), "draw skipped: {e}");
                self.stats.skipped += 1;
                Err(e)
            }
        }
    }

    /// Draw a viewport-filling quad, feeding the shader's `position` input.
    pub fn draw_fullscreen(&mut self, shader: &mut Shader) -> Result<(), GpuError> {
        let quad = match self.quad {
            Some(quad) => quad,
            None => {
                let quad = self
                    .gpu
                    .create_buffer("fullscreen_quad", bytemuck::cast_slice(&FULLSCREEN_QUAD))?;
                self.quad = Some(quad);
                quad
            }
        };
        shader.set_attribute("position", quad);
        self.draw(shader, 6, 1)
    }

    /// Present the frame and return its statistics.
    pub fn end_frame(&mut self) -> Result<FrameStats, GpuError> {
        self.gpu.end_frame()?;
        Ok(std::mem::take(&mut self.stats))
    }

    /// 1×1 opaque white, bound to sampler units nothing else fed.
    pub fn white_texture(&mut self) -> Result<TextureId, GpuError> {
        if let Some(id) = self.white {
            return Ok(id);
        }
        let id = self.solid_texture("white", Color::WHITE)?;
        self.white = Some(id);
        Ok(id)
    }

    /// 1×1 transparent black, the neutral decal.
    pub fn transparent_texture(&mut self) -> Result<TextureId, GpuError> {
        if let Some(id) = self.transparent {
            return Ok(id);
        }
        let id = self.solid_texture("transparent", Color::TRANSPARENT)?;
        self.transparent = Some(id);
        Ok(id)
    }

    /// Create a 1×1 RGBA8 texture filled with `color`.
    pub fn solid_texture(&mut self, label: &str, color: Color) -> Result<TextureId, GpuError> {
        let id = self
            .gpu
            .create_texture(&TextureDesc::new(label, 1, 1, TextureFormat::Rgba8Unorm))?;
        self.gpu.write_texture(id, 0, &color.to_rgba8())?;
        Ok(id)
    }

    /// Release the helper resources the context created.
    pub fn destroy(&mut self) {
        if let Some(quad) = self.quad.take() {
            self.gpu.destroy_buffer(quad);
        }
        for id in [self.white.take(), self.transparent.take()].into_iter().flatten() {
            self.gpu.destroy_texture(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ClearOps, RecordingGpu, TargetRef};
    use crate::shader::{ShaderOptions, ShaderSource};

    const POST: &str = r#"
struct Uniforms { tint: vec4<f32> };
@group(0) @binding(0) var<uniform> u: Uniforms;
@group(1) @binding(0) var source_tex: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main(@builtin(position) frag: vec4<f32>) -> @location(0) vec4<f32> {
    return textureSample(source_tex, source_sampler, frag.xy) * u.tint;
}
"#;

    fn start(ctx: &mut RenderContext) {
        ctx.begin_pass(&PassDesc {
            label: "display",
            target: TargetRef::Display,
            clear: ClearOps::all(Color::BLACK),
        })
        .unwrap();
    }

    #[test]
    fn fullscreen_quad_is_created_once() {
        let mut ctx = RenderContext::new(RecordingGpu::new(16, 16), DepthBiasConfig::default());
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("post", POST), ShaderOptions::POST_PROCESS);
        start(&mut ctx);
        ctx.draw_fullscreen(&mut shader).unwrap();
        ctx.draw_fullscreen(&mut shader).unwrap();
        let stats = ctx.end_frame().unwrap();
        assert_eq!(stats, FrameStats { passes: 1, draws: 2, skipped: 0 });

        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        // quad + the white fallback for the unbound sampler unit
        assert_eq!(gpu.live_buffers(), 1);
        assert_eq!(gpu.live_textures(), 1);
        let draw = &gpu.passes()[0].draws[0];
        assert_eq!(draw.vertex_count, 6);
        assert!(!draw.state.depth_test);
        assert_eq!(draw.textures.len(), 1);
    }

    #[test]
    fn null_shader_draws_are_counted_as_skipped() {
        let mut ctx = RenderContext::new(RecordingGpu::new(16, 16), DepthBiasConfig::default());
        let shader = Shader::null("broken", ShaderOptions::OPAQUE);
        start(&mut ctx);
        ctx.draw(&shader, 3, 1).unwrap();
        assert_eq!(ctx.stats().skipped, 1);
        assert_eq!(ctx.stats().draws, 0);
    }

    #[test]
    fn overrides_reset_at_pass_start() {
        let mut ctx = RenderContext::new(RecordingGpu::new(16, 16), DepthBiasConfig::default());
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("post", POST), ShaderOptions::OPAQUE);
        start(&mut ctx);
        ctx.set_stencil(StencilMode::Write { reference: 1 });
        ctx.set_color_mask(0b001);
        ctx.set_material_bias(3);
        ctx.draw_fullscreen(&mut shader).unwrap();
        start(&mut ctx);
        ctx.draw_fullscreen(&mut shader).unwrap();

        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        let first = gpu.passes()[0].draws[0].state;
        assert_eq!(first.stencil, StencilMode::Write { reference: 1 });
        assert_eq!(first.color_mask, 0b001);
        assert_eq!(first.depth_bias.constant, 4);
        let second = gpu.passes()[1].draws[0].state;
        assert_eq!(second.stencil, StencilMode::Disabled);
        assert_eq!(second.color_mask, RenderState::ALL_ATTACHMENTS);
        assert_eq!(second.depth_bias.constant, 1);
    }

    #[test]
    fn downcasts_to_concrete_backend() {
        let ctx = RenderContext::new(RecordingGpu::new(4, 4), DepthBiasConfig::default());
        assert!(ctx.backend::<RecordingGpu>().is_some());
        assert_eq!(ctx.surface_size(), (4, 4));
    }
}
