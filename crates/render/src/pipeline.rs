//! Frame orchestration over a capability tier.
//!
//! The tier is fixed when the pipeline is built: the host is probed, the
//! highest tier it supports (capped by configuration) is chosen, and only
//! that tier's programs and targets are created.
//!
//! Tier 0 draws forward onto the display. Tiers 1 and 2 run the deferred
//! sequence:
//!
//! 1. geometry pass into the G-buffer, writing stencil 1 under opaque and
//!    instanced geometry; translucent geometry lands in diffuse only;
//! 2. occlusion pass into a reduced-size buffer;
//! 3. compose into a full-size buffer sharing the G-buffer stencil: copy the
//!    occlusion, then whiten every pixel no geometry wrote;
//! 4. multiply the diffuse attachment by the composed occlusion onto the
//!    display.

use crate::camera::{Camera, DEFAULT_FOV};
use crate::context::{FrameStats, RenderContext};
use crate::error::RenderError;
use crate::gpu::{Capabilities, RenderState, StencilMode, Support};
use crate::lights::Lights;
use crate::material::Pass;
use crate::scene::Scene;
use crate::shader::variant::for_tier;
use crate::shader::{ProgramKind, Shader, ShaderVariant};
use crate::ssao::{NORMAL_UNIT, Occlusion, POSITION_UNIT};
use crate::target::{
    AutoResize, DisplayTarget, Framebuffer, GeometryBuffer, RenderTarget, SharedStencilFramebuffer,
    TargetConfig,
};
use crate::texture::Sampled;
use lumen_common::{Color, RenderConfig, TierPreference};
use std::collections::BTreeMap;

/// Highest capability tier.
pub const MAX_TIER: u8 = 2;
/// G-buffer color attachments: diffuse, normal, position.
const GBUFFER_ATTACHMENTS: u32 = 3;
/// Units bound by the occlusion program.
const OCCLUSION_UNITS: u32 = 4;
/// Stencil value written under geometry.
const GEOMETRY_STENCIL: u32 = 1;
/// Color mask selecting the diffuse attachment only.
const DIFFUSE_ONLY: u8 = 0b001;

/// Whether the host can run `tier`.
pub fn supports_tier(capabilities: &Capabilities, tier: u8) -> bool {
    let deferred = capabilities.max_color_attachments >= GBUFFER_ATTACHMENTS
        && capabilities.float_render_targets
        && capabilities.max_texture_units >= OCCLUSION_UNITS;
    match tier {
        0 => true,
        1 => deferred && capabilities.multiple_render_targets >= Support::Extension,
        2 => deferred && capabilities.multiple_render_targets == Support::Native,
        _ => false,
    }
}

/// Pick the tier for a probe result and configuration, degrading one tier
/// at a time from the highest allowed.
pub fn select_tier(probed: Option<&Capabilities>, config: &RenderConfig) -> u8 {
    let Some(capabilities) = probed else {
        tracing::warn!("capability probe failed; using tier 0");
        return 0;
    };
    let mut tier = match config.tier {
        TierPreference::Forward => 0,
        TierPreference::Auto | TierPreference::Deferred => MAX_TIER,
    };
    if let Some(cap) = config.max_tier {
        tier = tier.min(cap);
    }
    while tier > 0 && !supports_tier(capabilities, tier) {
        tracing::warn!(backend = %capabilities.backend, "giving up tier {tier}: not supported by host");
        tier -= 1;
    }
    if config.tier == TierPreference::Deferred && tier == 0 {
        tracing::warn!("deferred rendering requested but unavailable; rendering forward");
    }
    tier
}

/// Targets and tables of the deferred tiers.
#[derive(Debug)]
struct DeferredTargets {
    gbuffer: GeometryBuffer,
    occlusion_buffer: Framebuffer,
    compose: SharedStencilFramebuffer,
    occlusion: Occlusion,
}

impl DeferredTargets {
    fn new(ctx: &mut RenderContext, config: &RenderConfig, max_samples: u32) -> Result<Self, RenderError> {
        let gbuffer = GeometryBuffer::new(ctx, "gbuffer", TargetConfig::new(config.background))?;
        let occlusion_buffer = Framebuffer::new(
            ctx,
            "occlusion",
            TargetConfig::new(Color::WHITE).with_scale(config.ssao.resolution_scale),
        )?;
        let compose = SharedStencilFramebuffer::new(ctx, "compose", Color::WHITE, &gbuffer)?;
        let occlusion = Occlusion::new(ctx, config.ssao, max_samples, DEFAULT_FOV)?;
        Ok(Self {
            gbuffer,
            occlusion_buffer,
            compose,
            occlusion,
        })
    }

    fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), RenderError> {
        self.gbuffer.resize(ctx, width, height)?;
        self.occlusion_buffer.resize(ctx, width, height)?;
        self.compose.rebind(ctx, &self.gbuffer)?;
        Ok(())
    }

    fn destroy(&mut self, ctx: &mut RenderContext) {
        self.compose.destroy(ctx);
        self.occlusion_buffer.destroy(ctx);
        self.gbuffer.destroy(ctx);
        self.occlusion.destroy(ctx);
    }
}

/// Drives the per-frame pass sequence of one capability tier.
#[derive(Debug)]
pub struct Pipeline {
    tier: u8,
    capabilities: Capabilities,
    variant: Box<dyn ShaderVariant>,
    shaders: BTreeMap<ProgramKind, Shader>,
    display: DisplayTarget,
    deferred: Option<DeferredTargets>,
}

impl Pipeline {
    pub fn new(ctx: &mut RenderContext, config: &RenderConfig) -> Result<Self, RenderError> {
        let probed = match ctx.gpu().probe() {
            Ok(capabilities) => Some(capabilities),
            Err(e) => {
                tracing::warn!(backend = ctx.gpu().name(), "capability probe failed: {e}");
                None
            }
        };
        let tier = select_tier(probed.as_ref(), config);
        let capabilities = probed.unwrap_or_else(|| Capabilities::baseline(ctx.gpu().name()));
        let variant = for_tier(tier);

        let mut shaders = BTreeMap::new();
        for kind in variant.programs() {
            if let Some(source) = variant.source(kind) {
                shaders.insert(kind, Shader::new(ctx, &source, kind.options()));
            }
        }
        let deferred = if tier > 0 {
            Some(DeferredTargets::new(ctx, config, variant.max_ao_samples())?)
        } else {
            None
        };
        tracing::info!(
            tier,
            backend = %capabilities.backend,
            programs = shaders.len(),
            "render pipeline ready"
        );
        Ok(Self {
            tier,
            capabilities,
            variant,
            shaders,
            display: DisplayTarget::new(ctx, config.background),
            deferred,
        })
    }

    /// The active capability tier.
    pub fn tier(&self) -> u8 {
        self.tier
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    pub fn variant(&self) -> &dyn ShaderVariant {
        self.variant.as_ref()
    }

    /// Whether instanced draw calls use one hardware-instanced draw.
    pub fn hardware_instancing(&self) -> bool {
        self.capabilities.instancing != Support::None
    }

    pub fn shader(&self, kind: ProgramKind) -> Option<&Shader> {
        self.shaders.get(&kind)
    }

    /// Programs built for this tier.
    pub fn programs(&self) -> impl Iterator<Item = ProgramKind> + '_ {
        self.shaders.keys().copied()
    }

    /// Size of the occlusion kernel, zero on the forward tier.
    pub fn occlusion_samples(&self) -> u32 {
        self.deferred.as_ref().map_or(0, |d| d.occlusion.samples())
    }

    /// Follow a display resize: rebuild every auto-resizing target and
    /// update the camera viewport.
    pub fn resize(
        &mut self,
        ctx: &mut RenderContext,
        camera: &mut Camera,
        width: u32,
        height: u32,
    ) -> Result<(), RenderError> {
        self.display.resize(ctx, width, height)?;
        let (w, h) = self.display.size();
        if let Some(deferred) = &mut self.deferred {
            deferred.resize(ctx, w, h)?;
        }
        camera.set_viewport(w, h);
        tracing::debug!(w, h, "pipeline resized");
        Ok(())
    }

    /// Draw the opaque, instanced and translucent buckets of `scene` and
    /// present.
    pub fn render_frame(
        &mut self,
        ctx: &mut RenderContext,
        scene: &mut Scene,
        camera: &Camera,
        lights: &Lights,
    ) -> Result<FrameStats, RenderError> {
        if self.deferred.is_some() {
            self.deferred_frame(ctx, scene, camera, lights)?;
        } else {
            self.forward_frame(ctx, scene, camera, lights)?;
        }
        let stats = ctx.end_frame()?;
        tracing::trace!(passes = stats.passes, draws = stats.draws, skipped = stats.skipped, "frame presented");
        Ok(stats)
    }

    fn forward_frame(
        &mut self,
        ctx: &mut RenderContext,
        scene: &mut Scene,
        camera: &Camera,
        lights: &Lights,
    ) -> Result<(), RenderError> {
        let hardware = self.hardware_instancing();
        self.display.start(ctx)?;
        self.draw_bucket(ctx, scene, ProgramKind::Forward, &Pass::Opaque, camera, lights, false);
        let instanced = if hardware {
            ProgramKind::ForwardInstanced
        } else {
            ProgramKind::Forward
        };
        self.draw_bucket(ctx, scene, instanced, &Pass::Instanced, camera, lights, hardware);
        self.draw_sorted(ctx, scene, ProgramKind::Translucent, &Pass::Translucent, camera, lights);
        Ok(())
    }

    fn deferred_frame(
        &mut self,
        ctx: &mut RenderContext,
        scene: &mut Scene,
        camera: &Camera,
        lights: &Lights,
    ) -> Result<(), RenderError> {
        let hardware = self.hardware_instancing();
        let Some(deferred) = self.deferred.as_mut() else {
            return Ok(());
        };
        deferred.occlusion.update_fov(ctx, camera.fov())?;

        // Geometry.
        deferred.gbuffer.start(ctx)?;
        ctx.set_stencil(StencilMode::Write {
            reference: GEOMETRY_STENCIL,
        });
        self.draw_bucket(ctx, scene, ProgramKind::Geometry, &Pass::Opaque, camera, lights, false);
        let instanced = if hardware {
            ProgramKind::GeometryInstanced
        } else {
            ProgramKind::Geometry
        };
        self.draw_bucket(ctx, scene, instanced, &Pass::Instanced, camera, lights, hardware);
        ctx.set_stencil(StencilMode::Disabled);
        ctx.set_color_mask(DIFFUSE_ONLY);
        self.draw_sorted(ctx, scene, ProgramKind::GeometryTranslucent, &Pass::Translucent, camera, lights);
        ctx.set_color_mask(RenderState::ALL_ATTACHMENTS);

        let Self { shaders, deferred, display, .. } = self;
        let Some(deferred) = deferred.as_mut() else {
            return Ok(());
        };

        // Occlusion.
        deferred.occlusion_buffer.start(ctx)?;
        if let Some(shader) = shaders.get_mut(&ProgramKind::Occlusion) {
            deferred.gbuffer.normal().apply(ctx, shader, NORMAL_UNIT);
            deferred.gbuffer.position().apply(ctx, shader, POSITION_UNIT);
            deferred.occlusion.apply(ctx, shader);
            fullscreen(ctx, shader);
        }

        // Compose: copy, then whiten pixels the geometry pass never wrote.
        deferred.compose.start(ctx)?;
        if let Some(shader) = shaders.get_mut(&ProgramKind::ComposeCopy) {
            deferred.occlusion_buffer.color().apply(ctx, shader, 0);
            fullscreen(ctx, shader);
        }
        ctx.set_stencil(StencilMode::Equal { reference: 0 });
        if let Some(shader) = shaders.get_mut(&ProgramKind::ComposeMask) {
            fullscreen(ctx, shader);
        }
        ctx.set_stencil(StencilMode::Disabled);

        // Final blend.
        display.start(ctx)?;
        if let Some(shader) = shaders.get_mut(&ProgramKind::FinalBlend) {
            deferred.gbuffer.diffuse().apply(ctx, shader, 0);
            deferred.compose.color().apply(ctx, shader, 1);
            fullscreen(ctx, shader);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_bucket(
        &mut self,
        ctx: &mut RenderContext,
        scene: &mut Scene,
        kind: ProgramKind,
        pass: &Pass,
        camera: &Camera,
        lights: &Lights,
        hardware: bool,
    ) {
        if scene.pass_len(pass) == 0 {
            return;
        }
        let Some(shader) = self.shaders.get_mut(&kind) else {
            return;
        };
        camera.apply(shader);
        lights.apply(shader);
        let stats = scene.draw_pass(ctx, pass, shader, camera, hardware);
        tracing::trace!(%pass, program = %kind, drawn = stats.drawn, failed = stats.failed, "pass drawn");
    }

    fn draw_sorted(
        &mut self,
        ctx: &mut RenderContext,
        scene: &mut Scene,
        kind: ProgramKind,
        pass: &Pass,
        camera: &Camera,
        lights: &Lights,
    ) {
        if scene.pass_len(pass) == 0 {
            return;
        }
        let hardware = self.hardware_instancing();
        let Some(shader) = self.shaders.get_mut(&kind) else {
            return;
        };
        camera.apply(shader);
        lights.apply(shader);
        let order = scene.sort_back_to_front(pass, camera);
        let stats = scene.draw_ordered(ctx, &order, shader, camera, hardware);
        tracing::trace!(%pass, program = %kind, drawn = stats.drawn, failed = stats.failed, "pass drawn");
    }

    /// Release every program and target the pipeline created.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        for shader in self.shaders.values_mut() {
            shader.destroy(ctx);
        }
        self.shaders.clear();
        if let Some(mut deferred) = self.deferred.take() {
            deferred.destroy(ctx);
        }
        self.display.destroy(ctx);
    }
}

// The context already logs and counts refused draws.
fn fullscreen(ctx: &mut RenderContext, shader: &mut Shader) {
    if let Err(e) = ctx.draw_fullscreen(shader) {
        tracing::debug!(shader = shader.label(), "full-screen draw failed: {e}");
    }
}
