//! Render pipeline cache keys and construction.

use crate::convert;
use lumen_render::gpu::{ProgramId, RenderState, StencilMode, StepMode, VertexAttribute, VertexStream};
use lumen_render::shader::reflect::{FRAGMENT_ENTRY, VERTEX_ENTRY};

/// Stencil behaviour baked into a pipeline. The reference value is dynamic
/// pass state and is not part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilFunc {
    Disabled,
    Replace,
    Equal,
}

impl StencilFunc {
    pub fn of(mode: StencilMode) -> (Self, u32) {
        match mode {
            StencilMode::Disabled => (Self::Disabled, 0),
            StencilMode::Write { reference } => (Self::Replace, reference),
            StencilMode::Equal { reference } => (Self::Equal, reference),
        }
    }
}

/// Hashable image of [`RenderState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_back: bool,
    pub bias_constant: i32,
    pub bias_slope_bits: u32,
    pub blend: bool,
    pub stencil: StencilFunc,
    pub color_mask: u8,
}

impl StateKey {
    pub fn new(state: &RenderState) -> Self {
        Self {
            depth_test: state.depth_test,
            depth_write: state.depth_write,
            cull_back: state.cull_back,
            bias_constant: state.depth_bias.constant,
            bias_slope_bits: state.depth_bias.slope_scale.to_bits(),
            blend: state.blend,
            stencil: StencilFunc::of(state.stencil).0,
            color_mask: state.color_mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamLayout {
    pub stride: u64,
    pub step: StepMode,
    pub attributes: Vec<VertexAttribute>,
}

impl From<&VertexStream> for StreamLayout {
    fn from(stream: &VertexStream) -> Self {
        Self {
            stride: stream.stride,
            step: stream.step,
            attributes: stream.attributes.clone(),
        }
    }
}

/// Everything that selects a distinct `wgpu::RenderPipeline`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramId,
    pub state: StateKey,
    pub streams: Vec<StreamLayout>,
    pub colors: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
}

fn stencil_state(func: StencilFunc) -> wgpu::StencilState {
    let face = match func {
        StencilFunc::Disabled => return wgpu::StencilState::default(),
        StencilFunc::Replace => wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Always,
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: wgpu::StencilOperation::Replace,
        },
        StencilFunc::Equal => wgpu::StencilFaceState {
            compare: wgpu::CompareFunction::Equal,
            ..wgpu::StencilFaceState::IGNORE
        },
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: 0xff,
        write_mask: if func == StencilFunc::Replace { 0xff } else { 0 },
    }
}

pub fn depth_stencil_state(state: &StateKey, format: wgpu::TextureFormat) -> wgpu::DepthStencilState {
    let stencil = if format.has_stencil_aspect() {
        stencil_state(state.stencil)
    } else {
        wgpu::StencilState::default()
    };
    wgpu::DepthStencilState {
        format,
        depth_write_enabled: state.depth_test && state.depth_write,
        depth_compare: if state.depth_test {
            wgpu::CompareFunction::Less
        } else {
            wgpu::CompareFunction::Always
        },
        stencil,
        bias: wgpu::DepthBiasState {
            constant: state.bias_constant,
            slope_scale: f32::from_bits(state.bias_slope_bits),
            clamp: 0.0,
        },
    }
}

pub fn color_targets(state: &StateKey, formats: &[wgpu::TextureFormat]) -> Vec<Option<wgpu::ColorTargetState>> {
    formats
        .iter()
        .enumerate()
        .map(|(i, &format)| {
            let enabled = i < 8 && state.color_mask & (1 << i) != 0;
            Some(wgpu::ColorTargetState {
                format,
                blend: Some(if state.blend {
                    wgpu::BlendState::ALPHA_BLENDING
                } else {
                    wgpu::BlendState::REPLACE
                }),
                write_mask: if enabled {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                },
            })
        })
        .collect()
}

pub fn build(
    device: &wgpu::Device,
    label: &str,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    key: &PipelineKey,
) -> wgpu::RenderPipeline {
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = key
        .streams
        .iter()
        .map(|stream| {
            stream
                .attributes
                .iter()
                .map(|a| wgpu::VertexAttribute {
                    format: convert::vertex_format(a.format),
                    offset: a.offset,
                    shader_location: a.location,
                })
                .collect()
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = key
        .streams
        .iter()
        .zip(&attributes)
        .map(|(stream, attributes)| wgpu::VertexBufferLayout {
            array_stride: stream.stride,
            step_mode: convert::step_mode(stream.step),
            attributes,
        })
        .collect();
    let targets = color_targets(&key.state, &key.colors);

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some(VERTEX_ENTRY),
            compilation_options: Default::default(),
            buffers: &buffers,
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(FRAGMENT_ENTRY),
            compilation_options: Default::default(),
            targets: &targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: key.state.cull_back.then_some(wgpu::Face::Back),
            ..Default::default()
        },
        depth_stencil: key.depth.map(|format| depth_stencil_state(&key.state, format)),
        multisample: Default::default(),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_render::gpu::DepthBias;

    #[test]
    fn stencil_reference_is_not_part_of_the_key() {
        let mut a = RenderState::default();
        a.stencil = StencilMode::Write { reference: 1 };
        let mut b = a;
        b.stencil = StencilMode::Write { reference: 7 };
        assert_eq!(StateKey::new(&a), StateKey::new(&b));
        assert_eq!(StencilFunc::of(b.stencil), (StencilFunc::Replace, 7));
    }

    #[test]
    fn disabled_depth_test_always_passes_without_writing() {
        let mut state = RenderState::target_default(DepthBias {
            constant: 2,
            slope_scale: 1.5,
        });
        state.depth_test = false;
        let ds = depth_stencil_state(&StateKey::new(&state), wgpu::TextureFormat::Depth24PlusStencil8);
        assert_eq!(ds.depth_compare, wgpu::CompareFunction::Always);
        assert!(!ds.depth_write_enabled);
        assert_eq!(ds.bias.constant, 2);
        assert_eq!(ds.bias.slope_scale, 1.5);
    }

    #[test]
    fn equal_stencil_keeps_values() {
        let mut state = RenderState::default();
        state.stencil = StencilMode::Equal { reference: 0 };
        let ds = depth_stencil_state(&StateKey::new(&state), wgpu::TextureFormat::Depth24PlusStencil8);
        assert_eq!(ds.stencil.front.compare, wgpu::CompareFunction::Equal);
        assert_eq!(ds.stencil.front.pass_op, wgpu::StencilOperation::Keep);
        assert_eq!(ds.stencil.write_mask, 0);

        // Depth-only targets never carry stencil state.
        let depth_only = depth_stencil_state(&StateKey::new(&state), wgpu::TextureFormat::Depth32Float);
        assert_eq!(depth_only.stencil, wgpu::StencilState::default());
    }

    #[test]
    fn color_mask_selects_attachments() {
        let mut state = RenderState::default();
        state.color_mask = 0b001;
        state.blend = true;
        let formats = [wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Rgba16Float];
        let targets = color_targets(&StateKey::new(&state), &formats);
        let masks: Vec<_> = targets.iter().flatten().map(|t| t.write_mask).collect();
        assert_eq!(masks, [wgpu::ColorWrites::ALL, wgpu::ColorWrites::empty()]);
        assert_eq!(
            targets[0].as_ref().and_then(|t| t.blend),
            Some(wgpu::BlendState::ALPHA_BLENDING)
        );
    }
}
