//! Per-frame command recording.
//!
//! Passes and draws are collected as the core issues them and encoded into
//! a single command buffer when the frame ends. Everything a draw needs is
//! resolved and reference-counted up front, so resources destroyed later in
//! the frame stay alive until submission.

use crate::convert;
use lumen_render::gpu::{ClearOps, ProgramId, TextureFormat};
use std::collections::BTreeMap;
use std::rc::Rc;

/// A live texture with its views and sampler.
#[derive(Debug)]
pub struct GpuTexture {
    pub label: String,
    pub texture: wgpu::Texture,
    /// Attachment view covering every aspect.
    pub view: wgpu::TextureView,
    /// Sampling view; depth only for depth/stencil formats.
    pub sampled: wgpu::TextureView,
    pub format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub sampler: Rc<wgpu::Sampler>,
}

#[derive(Debug)]
pub enum PassTarget {
    Display,
    Framebuffer {
        colors: Vec<Rc<GpuTexture>>,
        depth: Option<Rc<GpuTexture>>,
    },
}

#[derive(Debug)]
pub struct FrameDraw {
    pub pipeline: Rc<wgpu::RenderPipeline>,
    pub program: ProgramId,
    /// Dynamic offset into the uniform ring; `None` without a uniform block.
    pub uniform_offset: Option<u32>,
    pub textures: Option<wgpu::BindGroup>,
    pub streams: Vec<(Rc<wgpu::Buffer>, u64)>,
    pub stencil_reference: u32,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Debug)]
pub struct FramePass {
    pub label: String,
    pub target: PassTarget,
    pub clear: ClearOps,
    pub colors: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
    pub draws: Vec<FrameDraw>,
}

/// Views a display pass renders into.
pub struct DisplayViews<'a> {
    pub color: &'a wgpu::TextureView,
    pub depth: &'a wgpu::TextureView,
}

/// Append `data` to the uniform staging area at an offset aligned to
/// `align`. Returns the offset.
pub fn push_uniforms(staging: &mut Vec<u8>, data: &[u8], align: usize) -> u32 {
    let offset = staging.len();
    staging.extend_from_slice(data);
    staging.resize(staging.len().next_multiple_of(align), 0);
    offset as u32
}

/// Record one pass into `encoder`. Draws whose program has no uniform group
/// (destroyed mid-frame) are dropped.
pub fn encode_pass(
    encoder: &mut wgpu::CommandEncoder,
    pass: &FramePass,
    display: Option<&DisplayViews<'_>>,
    uniform_groups: &BTreeMap<ProgramId, wgpu::BindGroup>,
) {
    let (colors, depth): (Vec<&wgpu::TextureView>, Option<&wgpu::TextureView>) = match &pass.target {
        PassTarget::Display => {
            let Some(display) = display else {
                return;
            };
            (vec![display.color], Some(display.depth))
        }
        PassTarget::Framebuffer { colors, depth } => {
            (colors.iter().map(|t| &t.view).collect(), depth.as_ref().map(|t| &t.view))
        }
    };

    let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = colors
        .into_iter()
        .map(|view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: convert::color_load(pass.clear.color),
                    store: wgpu::StoreOp::Store,
                },
            })
        })
        .collect();
    let has_stencil = pass.depth.is_some_and(|format| format.has_stencil_aspect());
    let depth_stencil_attachment = depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: convert::load(pass.clear.depth),
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: has_stencil.then(|| wgpu::Operations {
            load: convert::load(pass.clear.stencil),
            store: wgpu::StoreOp::Store,
        }),
    });

    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(&pass.label),
        color_attachments: &color_attachments,
        depth_stencil_attachment,
        ..Default::default()
    });

    for draw in &pass.draws {
        let Some(uniforms) = uniform_groups.get(&draw.program) else {
            continue;
        };
        let offsets: &[u32] = match &draw.uniform_offset {
            Some(offset) => std::slice::from_ref(offset),
            None => &[],
        };
        rpass.set_pipeline(&draw.pipeline);
        rpass.set_bind_group(0, uniforms, offsets);
        if let Some(textures) = &draw.textures {
            rpass.set_bind_group(1, textures, &[]);
        }
        for (slot, (buffer, offset)) in draw.streams.iter().enumerate() {
            rpass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
        }
        if has_stencil {
            rpass.set_stencil_reference(draw.stencil_reference);
        }
        rpass.draw(0..draw.vertex_count, 0..draw.instance_count);
    }
}
