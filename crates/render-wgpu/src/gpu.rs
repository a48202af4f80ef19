use crate::convert;
use crate::frame::{self, DisplayViews, FrameDraw, FramePass, GpuTexture, PassTarget};
use crate::layout::{self, ProgramLayout};
use crate::pipeline::{self, PipelineKey, StateKey, StencilFunc, StreamLayout};
use lumen_render::gpu::{
    BufferId, Capabilities, DrawPacket, Filter, FramebufferDesc, FramebufferId, GpuBackend, GpuError, PassDesc,
    ProgramId, TargetRef, TextureBinding, TextureDesc, TextureId, Wrap,
};
use lumen_render::shader::reflect::{self, ProgramReflection, SampleKind, UNIFORM_BINDING};
use lumen_render::shader::ShaderSource;
use std::any::Any;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::rc::Rc;

/// Depth/stencil format of the display.
pub const DISPLAY_DEPTH: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;
const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const INITIAL_UNIFORM_RING: u64 = 64 * 1024;

#[derive(Debug)]
struct Program {
    label: String,
    module: wgpu::ShaderModule,
    reflection: ProgramReflection,
    layout: ProgramLayout,
}

#[derive(Debug)]
struct Buffer {
    label: String,
    buffer: Rc<wgpu::Buffer>,
}

#[derive(Debug)]
struct Framebuffer {
    color: Vec<TextureId>,
    depth_stencil: Option<TextureId>,
}

#[derive(Debug)]
enum Display {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    /// Headless rendering into a texture of the same size.
    Offscreen { texture: wgpu::Texture },
}

/// wgpu implementation of [`GpuBackend`].
pub struct WgpuGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    display: Display,
    display_depth: wgpu::TextureView,
    next_id: u32,
    textures: BTreeMap<TextureId, Rc<GpuTexture>>,
    buffers: BTreeMap<BufferId, Buffer>,
    framebuffers: BTreeMap<FramebufferId, Framebuffer>,
    programs: BTreeMap<ProgramId, Program>,
    pipelines: HashMap<PipelineKey, Rc<wgpu::RenderPipeline>>,
    samplers: HashMap<(Filter, Wrap, bool), Rc<wgpu::Sampler>>,
    /// Depth slots take a non-filtering sampler whatever the texture's own.
    depth_sampler: wgpu::Sampler,
    uniform_align: usize,
    uniform_ring: wgpu::Buffer,
    passes: Vec<FramePass>,
    uniforms: Vec<u8>,
}

/// Request a device that exposes the adapter's own limits.
pub fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue), GpuError> {
    pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("lumen_device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            memory_hints: Default::default(),
        },
        None,
    ))
    .map_err(|e| GpuError::Probe(e.to_string()))
}

impl WgpuGpu {
    /// Present to `surface`, configured here for `width`×`height`.
    pub fn with_surface(
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let caps = surface.get_capabilities(adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first())
            .copied()
            .ok_or_else(|| GpuError::Surface("surface is not supported by the adapter".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        Ok(Self::from_parts(adapter, device, queue, Display::Surface { surface, config }))
    }

    /// Render into an offscreen texture instead of a window.
    pub fn headless(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let texture = offscreen_texture(&device, width, height);
        Self::from_parts(adapter, device, queue, Display::Offscreen { texture })
    }

    fn from_parts(adapter: &wgpu::Adapter, device: wgpu::Device, queue: wgpu::Queue, display: Display) -> Self {
        let info = adapter.get_info();
        let float_renderable = adapter
            .get_texture_format_features(wgpu::TextureFormat::Rgba16Float)
            .allowed_usages
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT);
        let capabilities = convert::capabilities(
            info.backend.to_str(),
            &device.limits(),
            &adapter.get_downlevel_capabilities(),
            float_renderable,
        );
        tracing::info!(
            backend = %capabilities.backend,
            adapter = %info.name,
            mrt = ?capabilities.multiple_render_targets,
            "wgpu backend ready"
        );

        let (width, height) = display_size(&display);
        let display_depth = depth_view(&device, width, height);
        let uniform_align = device.limits().min_uniform_buffer_offset_alignment as usize;
        let uniform_ring = uniform_ring(&device, INITIAL_UNIFORM_RING);
        let depth_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("depth_sampler"),
            ..Default::default()
        });
        Self {
            device,
            queue,
            capabilities,
            display,
            display_depth,
            next_id: 1,
            textures: BTreeMap::new(),
            buffers: BTreeMap::new(),
            framebuffers: BTreeMap::new(),
            programs: BTreeMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            depth_sampler,
            uniform_align,
            uniform_ring,
            passes: Vec::new(),
            uniforms: Vec::new(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Color format of the display.
    pub fn display_format(&self) -> wgpu::TextureFormat {
        match &self.display {
            Display::Surface { config, .. } => config.format,
            Display::Offscreen { .. } => OFFSCREEN_FORMAT,
        }
    }

    /// Number of distinct pipelines built so far.
    pub fn cached_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    fn next(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn sampler(&mut self, filter: Filter, wrap: Wrap, mipmapped: bool) -> Rc<wgpu::Sampler> {
        let device = &self.device;
        let sampler = self.samplers.entry((filter, wrap, mipmapped)).or_insert_with(|| {
            Rc::new(device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("lumen_sampler"),
                address_mode_u: convert::address_mode(wrap),
                address_mode_v: convert::address_mode(wrap),
                mag_filter: convert::filter_mode(filter),
                min_filter: convert::filter_mode(filter),
                mipmap_filter: if mipmapped {
                    convert::filter_mode(filter)
                } else {
                    wgpu::FilterMode::Nearest
                },
                ..Default::default()
            }))
        });
        Rc::clone(sampler)
    }

    /// Check a draw against the live resources before anything is built
    /// from it. Returns the program.
    fn validate(&self, packet: &DrawPacket<'_>) -> Result<&Program, GpuError> {
        if self.passes.is_empty() {
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

    /// Group 1 for `program` with `bindings`, or `None` if it samples no
    /// textures.
    fn texture_group(&self, program: &Program, bindings: &[TextureBinding]) -> Result<Option<wgpu::BindGroup>, GpuError> {
        let Some(group_layout) = &program.layout.textures else {
            return Ok(None);
        };
        let mut bound = Vec::with_capacity(program.reflection.textures.len());
        for slot in &program.reflection.textures {
            let id = bindings
                .iter()
                .find(|b| b.unit == slot.unit)
                .map(|b| b.texture)
                .ok_or_else(|| {
                    GpuError::Unsupported(format!("texture unit {} of `{}` is unbound", slot.unit, program.label))
                })?;
            let texture = self.textures.get(&id).ok_or(GpuError::UnknownTexture(id))?;
            let compatible = match slot.kind {
                SampleKind::Depth => texture.format.is_depth(),
                SampleKind::Float => {
                    !texture.format.is_depth() && (!slot.has_sampler || texture.format.is_filterable())
                }
            };
            if !compatible {
                return Err(GpuError::Unsupported(format!(
                    "{:?} texture `{}` cannot be bound to unit {} of `{}`",
                    texture.format, texture.label, slot.unit, program.label
                )));
            }
            bound.push((slot, texture));
        }

        let mut entries = Vec::with_capacity(bound.len() * 2);
        for (slot, texture) in &bound {
            entries.push(wgpu::BindGroupEntry {
                binding: layout::texture_binding(slot.unit),
                resource: wgpu::BindingResource::TextureView(&texture.sampled),
            });
            if slot.has_sampler {
                let sampler = match slot.kind {
                    SampleKind::Depth => &self.depth_sampler,
                    SampleKind::Float => texture.sampler.as_ref(),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: layout::sampler_binding(slot.unit),
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }
        Ok(Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.label),
            layout: group_layout,
            entries: &entries,
        })))
    }

    fn pipeline(&mut self, key: PipelineKey) -> Result<Rc<wgpu::RenderPipeline>, GpuError> {
        if let Some(cached) = self.pipelines.get(&key) {
            return Ok(Rc::clone(cached));
        }
        let program = self
            .programs
            .get(&key.program)
            .ok_or(GpuError::UnknownProgram(key.program))?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = pipeline::build(&self.device, &program.label, &program.module, &program.layout.pipeline, &key);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            tracing::error!(program = %program.label, "pipeline creation failed: {e}");
            return Err(GpuError::Unsupported(format!("pipeline for `{}`: {e}", program.label)));
        }
        tracing::debug!(program = %program.label, cached = self.pipelines.len() + 1, "pipeline created");
        let built = Rc::new(built);
        self.pipelines.insert(key, Rc::clone(&built));
        Ok(built)
    }

    fn texture(&self, id: TextureId) -> Result<Rc<GpuTexture>, GpuError> {
        self.textures.get(&id).cloned().ok_or(GpuError::UnknownTexture(id))
    }

    /// Upload the frame's uniform blocks, growing the ring if needed.
    fn upload_uniforms(&mut self, staging: &[u8]) {
        if staging.is_empty() {
            return;
        }
        let needed = staging.len() as u64;
        if needed > self.uniform_ring.size() {
            let size = needed.next_power_of_two();
            self.uniform_ring = uniform_ring(&self.device, size);
            tracing::debug!(size, "uniform ring grown");
        }
        self.queue.write_buffer(&self.uniform_ring, 0, staging);
    }

    /// Group 0 of every program drawn this frame, bound to the uniform ring.
    fn uniform_groups(&self, passes: &[FramePass]) -> BTreeMap<ProgramId, wgpu::BindGroup> {
        let mut groups = BTreeMap::new();
        for draw in passes.iter().flat_map(|p| &p.draws) {
            if groups.contains_key(&draw.program) {
                continue;
            }
            let Some(program) = self.programs.get(&draw.program) else {
                continue;
            };
            let entries: Vec<wgpu::BindGroupEntry<'_>> =
                NonZeroU64::new(u64::from(program.reflection.uniform_block_size))
                    .map(|size| wgpu::BindGroupEntry {
                        binding: UNIFORM_BINDING,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &self.uniform_ring,
                            offset: 0,
                            size: Some(size),
                        }),
                    })
                    .into_iter()
                    .collect();
            let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&program.label),
                layout: &program.layout.uniforms,
                entries: &entries,
            });
            groups.insert(draw.program, group);
        }
        groups
    }

    /// Acquire the display's color target. `None` for the surface texture
    /// when rendering offscreen.
    fn acquire_display(&mut self) -> Result<(Option<wgpu::SurfaceTexture>, wgpu::TextureView), GpuError> {
        match &self.display {
            Display::Offscreen { texture } => Ok((None, texture.create_view(&Default::default()))),
            Display::Surface { surface, config } => match surface.get_current_texture() {
                Ok(frame) => {
                    let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
                    Ok((Some(frame), view))
                }
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    surface.configure(&self.device, config);
                    Err(GpuError::Surface("surface lost; reconfigured, frame dropped".into()))
                }
                Err(e) => Err(GpuError::Surface(e.to_string())),
            },
        }
    }
}

impl GpuBackend for WgpuGpu {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn probe(&self) -> Result<Capabilities, GpuError> {
        Ok(self.capabilities.clone())
    }

    fn surface_size(&self) -> (u32, u32) {
        display_size(&self.display)
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        let (width, height) = (width.max(1), height.max(1));
        match &mut self.display {
            Display::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            Display::Offscreen { texture } => {
                *texture = offscreen_texture(&self.device, width, height);
            }
        }
        self.display_depth = depth_view(&self.device, width, height);
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, GpuError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(GpuError::Unsupported(format!(
                "texture `{}` of {}x{} (limit {max})",
                desc.label, desc.width, desc.height
            )));
        }
        let mip_levels = desc.mip_levels.max(1);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert::texture_format(desc.format),
            usage: convert::texture_usage(desc.format),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampled = texture.create_view(&wgpu::TextureViewDescriptor {
            aspect: if desc.format.has_stencil() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            ..Default::default()
        });
        let sampler = self.sampler(desc.filter, desc.wrap, mip_levels > 1);
        let id = TextureId(self.next());
        self.textures.insert(
            id,
            Rc::new(GpuTexture {
                label: desc.label.to_owned(),
                texture,
                view,
                sampled,
                format: desc.format,
                width: desc.width,
                height: desc.height,
                mip_levels,
                sampler,
            }),
        );
        Ok(id)
    }

    fn write_texture(&mut self, id: TextureId, level: u32, data: &[u8]) -> Result<(), GpuError> {
        let entry = self.textures.get(&id).ok_or(GpuError::UnknownTexture(id))?;
        let bpp = entry
            .format
            .bytes_per_texel()
            .filter(|_| !entry.format.is_depth())
            .ok_or_else(|| GpuError::Unsupported(format!("{:?} cannot be written from the CPU", entry.format)))?;
        if level >= entry.mip_levels {
            return Err(GpuError::Unsupported(format!(
                "mip level {level} of a {}-level texture",
                entry.mip_levels
            )));
        }
        let w = (entry.width >> level).max(1);
        let h = (entry.height >> level).max(1);
        let expected = w as usize * h as usize * bpp;
        if data.len() != expected {
            return Err(GpuError::DataSize {
                expected,
                actual: data.len(),
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(w * bpp as u32),
                rows_per_image: Some(h),
            },
            wgpu::Extent3d {
                width: w,
                height: h,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
    }

    fn create_buffer(&mut self, label: &str, data: &[u8]) -> Result<BufferId, GpuError> {
        let buffer = vertex_buffer(&self.device, label, data.len() as u64);
        self.queue.write_buffer(&buffer, 0, &padded(data));
        let id = BufferId(self.next());
        self.buffers.insert(
            id,
            Buffer {
                label: label.to_owned(),
                buffer: Rc::new(buffer),
            },
        );
        Ok(id)
    }

    fn write_buffer(&mut self, id: BufferId, data: &[u8]) -> Result<(), GpuError> {
        let entry = self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))?;
        let data = padded(data);
        if data.len() as u64 > entry.buffer.size() {
            entry.buffer = Rc::new(vertex_buffer(&self.device, &entry.label, data.len() as u64));
        }
        self.queue.write_buffer(&entry.buffer, 0, &data);
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc<'_>) -> Result<FramebufferId, GpuError> {
        if desc.color.len() > self.capabilities.max_color_attachments as usize {
            return Err(GpuError::Unsupported(format!(
                "framebuffer `{}` with {} color attachments",
                desc.label,
                desc.color.len()
            )));
        }
        let mut size = None;
        for &id in desc.color.iter().chain(desc.depth_stencil.iter()) {
            let texture = self.textures.get(&id).ok_or(GpuError::UnknownTexture(id))?;
            let this = (texture.width, texture.height);
            if *size.get_or_insert(this) != this {
                return Err(GpuError::Unsupported(format!(
                    "attachments of framebuffer `{}` differ in size",
                    desc.label
                )));
            }
        }
        let id = FramebufferId(self.next());
        self.framebuffers.insert(
            id,
            Framebuffer {
                color: desc.color.to_vec(),
                depth_stencil: desc.depth_stencil,
            },
        );
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FramebufferId) {
        self.framebuffers.remove(&id);
    }

    fn create_program(&mut self, source: &ShaderSource) -> Result<ProgramId, GpuError> {
        let (module, _) = reflect::compile(source)?;
        let reflection = reflect::reflect(&module);

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&source.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&source.code)),
        });
        let layout = ProgramLayout::new(&self.device, &source.label, &reflection);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(GpuError::Compile {
                label: source.label.clone(),
                message: e.to_string(),
            });
        }

        let id = ProgramId(self.next());
        self.programs.insert(
            id,
            Program {
                label: source.label.clone(),
                module: shader,
                reflection,
                layout,
            },
        );
        Ok(id)
    }

    fn program_reflection(&self, id: ProgramId) -> Option<ProgramReflection> {
        self.programs.get(&id).map(|p| p.reflection.clone())
    }

    fn destroy_program(&mut self, id: ProgramId) {
        if self.programs.remove(&id).is_some() {
            self.pipelines.retain(|key, _| key.program != id);
        }
    }

    fn begin_pass(&mut self, pass: &PassDesc<'_>) -> Result<(), GpuError> {
        let (target, colors, depth) = match pass.target {
            TargetRef::Display => (PassTarget::Display, vec![self.display_format()], Some(DISPLAY_DEPTH)),
            TargetRef::Framebuffer(id) => {
                let fb = self.framebuffers.get(&id).ok_or(GpuError::UnknownFramebuffer(id))?;
                let colors = fb
                    .color
                    .iter()
                    .map(|&t| self.texture(t))
                    .collect::<Result<Vec<_>, _>>()?;
                let depth = fb.depth_stencil.map(|t| self.texture(t)).transpose()?;
                let formats = colors.iter().map(|t| convert::texture_format(t.format)).collect();
                let depth_format = depth.as_ref().map(|t| convert::texture_format(t.format));
                (PassTarget::Framebuffer { colors, depth }, formats, depth_format)
            }
        };
        self.passes.push(FramePass {
            label: pass.label.to_owned(),
            target,
            clear: pass.clear,
            colors,
            depth,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn draw(&mut self, packet: &DrawPacket<'_>) -> Result<(), GpuError> {
        let program = self.validate(packet)?;
        let block_size = program.reflection.uniform_block_size as usize;
        let textures = self.texture_group(program, packet.textures)?;
        let streams = packet
            .streams
            .iter()
            .map(|s| {
                self.buffers
                    .get(&s.buffer)
                    .map(|b| (Rc::clone(&b.buffer), s.offset))
                    .ok_or(GpuError::UnknownBuffer(s.buffer))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (colors, depth) = match self.passes.last() {
            Some(pass) => (pass.colors.clone(), pass.depth),
            None => return Err(GpuError::NoActivePass),
        };
        let pipeline = self.pipeline(PipelineKey {
            program: packet.program,
            state: StateKey::new(&packet.state),
            streams: packet.streams.iter().map(StreamLayout::from).collect(),
            colors,
            depth,
        })?;

        let uniform_offset = (block_size > 0)
            .then(|| frame::push_uniforms(&mut self.uniforms, &packet.uniforms[..block_size], self.uniform_align));
        let (_, stencil_reference) = StencilFunc::of(packet.state.stencil);
        if let Some(pass) = self.passes.last_mut() {
            pass.draws.push(FrameDraw {
                pipeline,
                program: packet.program,
                uniform_offset,
                textures,
                streams,
                stencil_reference,
                vertex_count: packet.vertex_count,
                instance_count: packet.instance_count,
            });
        }
        Ok(())
    }

    fn end_frame(&mut self) -> Result<(), GpuError> {
        let passes = std::mem::take(&mut self.passes);
        let staging = std::mem::take(&mut self.uniforms);
        if passes.is_empty() {
            return Ok(());
        }
        self.upload_uniforms(&staging);
        let groups = self.uniform_groups(&passes);

        let needs_display = passes.iter().any(|p| matches!(p.target, PassTarget::Display));
        let display = if needs_display {
            Some(self.acquire_display()?)
        } else {
            None
        };
        let views = display.as_ref().map(|(_, color)| DisplayViews {
            color,
            depth: &self.display_depth,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lumen_frame"),
        });
        for pass in &passes {
            frame::encode_pass(&mut encoder, pass, views.as_ref(), &groups);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some((Some(frame), _)) = display {
            frame.present();
        }
        tracing::trace!(passes = passes.len(), "frame submitted");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn display_size(display: &Display) -> (u32, u32) {
    match display {
        Display::Surface { config, .. } => (config.width, config.height),
        Display::Offscreen { texture } => (texture.width(), texture.height()),
    }
}

fn depth_view(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("display_depth"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DISPLAY_DEPTH,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&Default::default())
}

fn offscreen_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("display_offscreen"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}

fn uniform_ring(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("uniform_ring"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

fn vertex_buffer(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(wgpu::COPY_BUFFER_ALIGNMENT).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Queue writes must be a multiple of four bytes.
fn padded(data: &[u8]) -> Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if !data.is_empty() && data.len() % align == 0 {
        return Cow::Borrowed(data);
    }
    let mut owned = data.to_vec();
    owned.resize(data.len().max(1).next_multiple_of(align), 0);
    Cow::Owned(owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_padded_to_four_bytes() {
        assert!(matches!(padded(&[1, 2, 3, 4]), Cow::Borrowed(_)));
        assert_eq!(padded(&[1, 2, 3]).as_ref(), &[1, 2, 3, 0]);
        assert_eq!(padded(&[]).len(), 4);
    }
}
