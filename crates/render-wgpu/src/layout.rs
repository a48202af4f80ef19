//! Bind group layouts derived from program reflection.
//!
//! Group 0 holds the uniform block at binding 0, addressed with a dynamic
//! offset into the frame's uniform ring. Group 1 holds texture unit `u` at
//! binding `2u` and, when the shader declares one, its sampler at `2u + 1`.

use lumen_render::shader::reflect::{ProgramReflection, SampleKind, TextureSlot, UNIFORM_BINDING};
use std::num::NonZeroU64;

pub fn texture_binding(unit: u32) -> u32 {
    unit * 2
}

pub fn sampler_binding(unit: u32) -> u32 {
    unit * 2 + 1
}

/// Sampled slots filter linearly; slots read with `textureLoad` only accept
/// any float texture, including the non-filterable lookup tables.
fn sample_type(slot: &TextureSlot) -> wgpu::TextureSampleType {
    match slot.kind {
        SampleKind::Depth => wgpu::TextureSampleType::Depth,
        SampleKind::Float => wgpu::TextureSampleType::Float {
            filterable: slot.has_sampler,
        },
    }
}

fn sampler_type(slot: &TextureSlot) -> wgpu::SamplerBindingType {
    match slot.kind {
        SampleKind::Depth => wgpu::SamplerBindingType::NonFiltering,
        SampleKind::Float => wgpu::SamplerBindingType::Filtering,
    }
}

pub fn uniform_entries(reflection: &ProgramReflection) -> Vec<wgpu::BindGroupLayoutEntry> {
    let Some(size) = NonZeroU64::new(u64::from(reflection.uniform_block_size)) else {
        return Vec::new();
    };
    vec![wgpu::BindGroupLayoutEntry {
        binding: UNIFORM_BINDING,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: Some(size),
        },
        count: None,
    }]
}

pub fn texture_entries(slots: &[TextureSlot]) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(slots.len() * 2);
    for slot in slots {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: texture_binding(slot.unit),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: sample_type(slot),
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        if slot.has_sampler {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: sampler_binding(slot.unit),
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(sampler_type(slot)),
                count: None,
            });
        }
    }
    entries
}

/// Layouts and pipeline layout of one program.
#[derive(Debug)]
pub struct ProgramLayout {
    pub uniforms: wgpu::BindGroupLayout,
    pub textures: Option<wgpu::BindGroupLayout>,
    pub pipeline: wgpu::PipelineLayout,
}

impl ProgramLayout {
    pub fn new(device: &wgpu::Device, label: &str, reflection: &ProgramReflection) -> Self {
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&format!("{label}.uniforms")),
            entries: &uniform_entries(reflection),
        });
        let textures = (!reflection.textures.is_empty()).then(|| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label}.textures")),
                entries: &texture_entries(&reflection.textures),
            })
        });
        let mut groups = vec![&uniforms];
        groups.extend(textures.as_ref());
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &groups,
            push_constant_ranges: &[],
        });
        Self {
            uniforms,
            textures,
            pipeline,
        }
    }
}
