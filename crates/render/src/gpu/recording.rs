//! In-memory backend that records what the core asks of the GPU.
//!
//! Used by the headless CLI and by tests. Programs are compiled and
//! reflected for real (WGSL through naga), resources are tracked by handle,
//! and every draw is validated against them before it is recorded.

use super::*;
use crate::shader::reflect;
use std::collections::BTreeMap;

/// One recorded draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub program: ProgramId,
    /// Label of the program's source.
    pub shader: String,
    pub state: RenderState,
    pub uniforms: Vec<u8>,
    pub textures: Vec<TextureBinding>,
    pub streams: Vec<VertexStream>,
    pub vertex_count: u32,
    pub instance_count: u32,
}

/// One recorded pass with its draws in issue order.
#[derive(Debug, Clone, PartialEq)]
pub struct PassRecord {
    pub label: String,
    pub target: TargetRef,
    pub clear: ClearOps,
    pub draws: Vec<DrawRecord>,
}

#[derive(Debug, Clone)]
struct TextureEntry {
    label: String,
    width: u32,
    height: u32,
    format: TextureFormat,
    wrap: Wrap,
    mip_levels: u32,
    uploads: u32,
}

#[derive(Debug, Clone)]
struct ProgramEntry {
    label: String,
    reflection: ProgramReflection,
}

// Fixed-function state as a GL-style driver would hold it between draws.
#[derive(Debug, Clone, Copy)]
struct LatchedState {
    blend: bool,
    depth_write: bool,
    stencil: bool,
}

impl Default for LatchedState {
    fn default() -> Self {
        Self {
            blend: false,
            depth_write: true,
            stencil: false,
        }
    }
}

/// Counts of fixed-function changes between consecutive draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateToggles {
    pub blend: u32,
    pub depth_write: u32,
    pub stencil: u32,
}

/// Mock GPU backend.
#[derive(Debug)]
pub struct RecordingGpu {
    capabilities: Option<Capabilities>,
    surface: (u32, u32),
    next_id: u32,
    textures: BTreeMap<TextureId, TextureEntry>,
    buffers: BTreeMap<BufferId, Vec<u8>>,
    framebuffers: BTreeMap<FramebufferId, (Vec<TextureId>, Option<TextureId>)>,
    programs: BTreeMap<ProgramId, ProgramEntry>,
    passes: Vec<PassRecord>,
    in_pass: bool,
    latched: LatchedState,
    toggles: StateToggles,
    rejected: u32,
    frames: u32,
}

impl RecordingGpu {
    /// A backend with full capabilities and a `width`×`height` surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_capabilities(width, height, Capabilities::full("recording"))
    }

    pub fn with_capabilities(width: u32, height: u32, capabilities: Capabilities) -> Self {
        Self {
            capabilities: Some(capabilities),
            surface: (width, height),
            next_id: 1,
            textures: BTreeMap::new(),
            buffers: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            programs: BTreeMap::new(),
            passes: Vec::new(),
            in_pass: false,
            latched: LatchedState::default(),
            toggles: StateToggles::default(),
            rejected: 0,
            frames: 0,
        }
    }

    /// A backend whose capability probe fails.
    pub fn with_failing_probe(width: u32, height: u32) -> Self {
        let mut gpu = Self::new(width, height);
        gpu.capabilities = None;
        gpu
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Passes recorded since the last [`take_passes`](Self::take_passes).
    pub fn passes(&self) -> &[PassRecord] {
        &self.passes
    }

    pub fn take_passes(&mut self) -> Vec<PassRecord> {
        std::mem::take(&mut self.passes)
    }

    pub fn pass(&self, label: &str) -> Option<&PassRecord> {
        self.passes.iter().find(|p| p.label == label)
    }

    pub fn toggles(&self) -> StateToggles {
        self.toggles
    }

    pub fn reset_toggles(&mut self) {
        self.toggles = StateToggles::default();
    }

    /// Draws refused by validation.
    pub fn rejected_draws(&self) -> u32 {
        self.rejected
    }

    pub fn frames_presented(&self) -> u32 {
        self.frames
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    /// Labels of live programs, sorted.
    pub fn program_labels(&self) -> Vec<String> {
        let mut labels: Vec<_> = self.programs.values().map(|p| p.label.clone()).collect();
        labels.sort();
        labels
    }

    pub fn texture_size(&self, id: TextureId) -> Option<(u32, u32)> {
        self.textures.get(&id).map(|t| (t.width, t.height))
    }

    pub fn texture_wrap(&self, id: TextureId) -> Option<Wrap> {
        self.textures.get(&id).map(|t| t.wrap)
    }

    pub fn texture_label(&self, id: TextureId) -> Option<&str> {
        self.textures.get(&id).map(|t| t.label.as_str())
    }

    /// Number of `write_texture` calls a texture received.
    pub fn texture_uploads(&self, id: TextureId) -> Option<u32> {
        self.textures.get(&id).map(|t| t.uploads)
    }

    pub fn buffer_contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(&id).map(Vec::as_slice)
    }

    pub fn framebuffer_attachments(&self, id: FramebufferId) -> Option<(&[TextureId], Option<TextureId>)> {
        self.framebuffers.get(&id).map(|(c, d)| (c.as_slice(), *d))
    }

    fn validate(&self, packet: &DrawPacket<'_>) -> Result<&ProgramEntry, GpuError> {
        if !self.in_pass {
            return Err(GpuError::NoActivePass);
        }
        let program = self
            .programs
            .get(&packet.program)
            .ok_or(GpuError::UnknownProgram(packet.program))?;
        let expected = program.reflection.uniform_block_size as usize;
        if packet.uniforms.len() < expected {
            return Err(GpuError::DataSize {
                expected,
                actual: packet.uniforms.len(),
            });
        }
        for binding in packet.textures {
            if !self.textures.contains_key(&binding.texture) {
                return Err(GpuError::UnknownTexture(binding.texture));
            }
        }
        for stream in packet.streams {
            if !self.buffers.contains_key(&stream.buffer) {
                return Err(GpuError::UnknownBuffer(stream.buffer));
            }
        }
        for attribute in &program.reflection.attributes {
            for location in attribute.location..attribute.location + attribute.kind.slots() {
                let fed = packet
                    .streams
                    .iter()
                    .any(|s| s.attributes.iter().any(|a| a.location == location));
                if !fed {
                    return Err(GpuError::MissingAttribute {
                        name: attribute.name.clone(),
                        location,
                    });
                }
            }
        }
        Ok(program)
    }

    fn latch(&mut self, state: &RenderState) {
        let next = LatchedState {
            blend: state.blend,
            depth_write: state.depth_write,
            stencil: state.stencil != StencilMode::Disabled,
        };
        self.toggles.blend += u32::from(next.blend != self.latched.blend);
        self.toggles.depth_write += u32::from(next.depth_write != self.latched.depth_write);
        self.toggles.stencil += u32::from(next.stencil != self.latched.stencil);
        self.latched = next;
    }
}

impl GpuBackend for RecordingGpu {
    fn name(&self) -> &str {
        "recording"
    }

    fn probe(&self) -> Result<Capabilities, GpuError> {
        self.capabilities
            .clone()
            .ok_or_else(|| GpuError::Probe("capability query failed".into()))
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.surface = (width.max(1), height.max(1));
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, GpuError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::Unsupported(format!(
                "zero-sized texture `{}`",
                desc.label
            )));
        }
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            TextureEntry {
                label: desc.label.to_owned(),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                wrap: desc.wrap,
                mip_levels: desc.mip_levels,
                uploads: 0,
            },
        );
        Ok(id)
    }

    fn write_texture(&mut self, id: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError> {
        let entry = self.textures.get_mut(&id).ok_or(GpuError::UnknownTexture(id))?;
        let bpp = entry.format.bytes_per_texel().ok_or_else(|| {
            GpuError::Unsupported(format!("{:?} cannot be written from the CPU", entry.format))
        })?;
        if level >= entry.mip_levels {
            return Err(GpuError::Unsupported(format!(
                "mip level {level} of a {}-level texture",
                entry.mip_levels
            )));
        }
        let w = (entry.width >> level).max(1) as usize;
        let h = (entry.height >> level).max(1) as usize;
        let expected = w * h * bpp;
        if data.len() != expected {
            return Err(GpuError::DataSize {
                expected,
                actual: data.len(),
            });
        }
        entry.uploads += 1;
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn create_buffer(&mut self, _label: &str, data: &[u8]) -> Result<BufferId, GpuError> {
        let id = BufferId(self.next());
        self.buffers.insert(id, data.to_vec());
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), GpuError> {
        let buffer = self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))?;
        buffer.clear();
        buffer.extend_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId, GpuError> {
        for texture in desc.color.iter().chain(desc.depth_stencil.iter()) {
            if !self.textures.contains_key(texture) {
                return Err(GpuError::UnknownTexture(*texture));
            }
        }
        let id = FramebufferId(self.next());
        self.framebuffers
            .insert(id, (desc.color.to_vec(), desc.depth_stencil));
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FramebufferId) {
        self.framebuffers.remove(&id);
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, GpuError> {
        let (module, _) = reflect::compile(source)?;
        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            ProgramEntry {
                label: source.label.clone(),
                reflection: reflect::reflect(&module),
            },
        );
        Ok(id)
    }

    fn program_reflection(&self, id: ProgramId) -> Option<ProgramReflection> {
        self.programs.get(&id).map(|p| p.reflection.clone())
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.programs.remove(&id);
    }

    fn begin_pass(&mut self, pass: &PassDesc<'_>) -> Result<(), GpuError> {
        if let TargetRef::Framebuffer(id) = pass.target {
            if !self.framebuffers.contains_key(&id) {
                return Err(GpuError::UnknownFramebuffer(id));
            }
        }
        self.passes.push(PassRecord {
            label: pass.label.to_owned(),
            target: pass.target,
            clear: pass.clear,
            draws: Vec::new(),
        });
        self.in_pass = true;
        Ok(())
    }

    fn draw(&mut self, packet: &DrawPacket<'_>) -> Result<(), GpuError> {
        let validated = self.validate(packet).map(|program| program.label.clone());
        let shader = match validated {
            Ok(label) => label,
            Err(e) => {
                self.rejected += 1;
                return Err(e);
            }
        };
        self.latch(&packet.state);
        let record = DrawRecord {
            program: packet.program,
            shader,
            state: packet.state,
            uniforms: packet.uniforms.to_vec(),
            textures: packet.textures.to_vec(),
            streams: packet.streams.to_vec(),
            vertex_count: packet.vertex_count,
            instance_count: packet.instance_count,
        };
        if let Some(pass) = self.passes.last_mut() {
            pass.draws.push(record);
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        self.in_pass = false;
        self.frames += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
