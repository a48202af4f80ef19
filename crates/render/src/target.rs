//! Render targets: where a pass draws.
//!
//! Starting a target begins a pass on it, clearing per its configuration.
//! Draws inside the pass get the target defaults: depth test and back-face
//! culling on, and the configured polygon depth offset so coplanar decal
//! geometry does not z-fight.
//!
//! # Invariants
//! - Owned targets track the display size times their scale and must be
//!   resized on every surface resize before the next frame.
//! - A [`SharedStencilFramebuffer`] never releases the depth/stencil
//!   attachment it borrows.

use crate::context::RenderContext;
use crate::gpu::{
    ClearOps, FramebufferDesc, FramebufferId, GpuError, PassDesc, TargetRef, TextureFormat, TextureId,
};
use crate::texture::{FloatTexture, RawTexture, Sampled, Texture};
use lumen_common::Color;

/// Construction parameters of a target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetConfig {
    /// Clear color.
    pub background: Color,
    /// Size relative to the display surface.
    pub scale: f32,
}

impl TargetConfig {
    pub fn new(background: Color) -> Self {
        Self {
            background,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Target size for a surface of `width`×`height`; never zero.
    pub fn scaled_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.scale).round() as u32).max(1);
        (scale(width), scale(height))
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self::new(Color::BLACK)
    }
}

/// A destination for a pass.
pub trait RenderTarget {
    fn label(&self) -> &str;
    fn size(&self) -> (u32, u32);
    /// Begin a pass on this target.
    fn start(&self, ctx: &mut RenderContext) -> Result<(), GpuError>;
    fn destroy(&mut self, ctx: &mut RenderContext);
}

/// Targets whose size follows the display surface.
pub trait AutoResize: RenderTarget {
    /// Rebuild for a surface of `width`×`height`.
    fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError>;
}

/// The presentable surface.
#[derive(Debug)]
pub struct DisplayTarget {
    background: Color,
    size: (u32, u32),
}

impl DisplayTarget {
    pub fn new(ctx: &RenderContext, background: Color) -> Self {
        Self {
            background,
            size: ctx.surface_size(),
        }
    }
}

impl RenderTarget for DisplayTarget {
    fn label(&self) -> &str {
        "display"
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn start(&self, ctx: &mut RenderContext) -> Result<(), GpuError> {
        ctx.begin_pass(&PassDesc {
            label: self.label(),
            target: TargetRef::Display,
            clear: ClearOps::all(self.background),
        })
    }

    fn destroy(&mut self, _ctx: &mut RenderContext) {}
}

impl AutoResize for DisplayTarget {
    fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
        ctx.gpu_mut().resize_surface(width, height);
        self.size = ctx.surface_size();
        Ok(())
    }
}

/// Diffuse, view-space normal and view-space position attachments plus a
/// combined depth/stencil.
#[derive(Debug)]
pub struct GeometryBuffer {
    label: String,
    config: TargetConfig,
    size: (u32, u32),
    diffuse: Texture,
    normal: FloatTexture,
    position: FloatTexture,
    depth_stencil: RawTexture,
    framebuffer: FramebufferId,
}

impl GeometryBuffer {
    pub fn new(ctx: &mut RenderContext, label: &str, config: TargetConfig) -> Result<Self, GpuError> {
        let (surface_w, surface_h) = ctx.surface_size();
        let (w, h) = config.scaled_size(surface_w, surface_h);
        let diffuse = Texture::attachment(ctx, &format!("{label}.diffuse"), w, h)?;
        let normal = FloatTexture::new(ctx, &format!("{label}.normal"), w, h)?;
        let position = FloatTexture::new(ctx, &format!("{label}.position"), w, h)?;
        let depth_stencil = RawTexture::new(
            ctx,
            &format!("{label}.depth_stencil"),
            w,
            h,
            TextureFormat::Depth24PlusStencil8,
        )?;
        let mut gbuffer = Self {
            label: label.to_owned(),
            config,
            size: (w, h),
            diffuse,
            normal,
            position,
            depth_stencil,
            framebuffer: FramebufferId(0),
        };
        gbuffer.framebuffer = gbuffer.create_framebuffer(ctx)?;
        Ok(gbuffer)
    }

    fn create_framebuffer(&self, ctx: &mut RenderContext) -> Result<FramebufferId, GpuError> {
        ctx.gpu_mut().create_framebuffer(&FramebufferDesc {
            label: &self.label,
            color: &[
                self.diffuse.texture_id(),
                self.normal.texture_id(),
                self.position.texture_id(),
            ],
            depth_stencil: Some(self.depth_stencil.texture_id()),
        })
    }

    pub fn diffuse(&self) -> &Texture {
        &self.diffuse
    }

    pub fn normal(&self) -> &FloatTexture {
        &self.normal
    }

    pub fn position(&self) -> &FloatTexture {
        &self.position
    }

    pub fn depth_stencil(&self) -> TextureId {
        self.depth_stencil.texture_id()
    }

    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }
}

impl RenderTarget for GeometryBuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn start(&self, ctx: &mut RenderContext) -> Result<(), GpuError> {
        ctx.begin_pass(&PassDesc {
            label: &self.label,
            target: TargetRef::Framebuffer(self.framebuffer),
            clear: ClearOps::all(self.config.background),
        })
    }

    fn destroy(&mut self, ctx: &mut RenderContext) {
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.diffuse.destroy(ctx);
        self.normal.destroy(ctx);
        self.position.destroy(ctx);
        self.depth_stencil.destroy(ctx);
    }
}

impl AutoResize for GeometryBuffer {
    fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
        let (w, h) = self.config.scaled_size(width, height);
        if (w, h) == self.size {
            return Ok(());
        }
        self.diffuse.resize(ctx, w, h)?;
        self.normal.resize(ctx, w, h)?;
        self.position.resize(ctx, w, h)?;
        self.depth_stencil.resize(ctx, w, h)?;
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.framebuffer = self.create_framebuffer(ctx)?;
        self.size = (w, h);
        tracing::debug!(gbuffer = %self.label, w, h, "geometry buffer resized");
        Ok(())
    }
}

/// One color attachment, no depth/stencil.
#[derive(Debug)]
pub struct Framebuffer {
    label: String,
    config: TargetConfig,
    size: (u32, u32),
    color: Texture,
    framebuffer: FramebufferId,
}

impl Framebuffer {
    pub fn new(ctx: &mut RenderContext, label: &str, config: TargetConfig) -> Result<Self, GpuError> {
        let (surface_w, surface_h) = ctx.surface_size();
        let (w, h) = config.scaled_size(surface_w, surface_h);
        let color = Texture::attachment(ctx, &format!("{label}.color"), w, h)?;
        let framebuffer = ctx.gpu_mut().create_framebuffer(&FramebufferDesc {
            label,
            color: &[color.texture_id()],
            depth_stencil: None,
        })?;
        Ok(Self {
            label: label.to_owned(),
            config,
            size: (w, h),
            color,
            framebuffer,
        })
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }
}

impl RenderTarget for Framebuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn start(&self, ctx: &mut RenderContext) -> Result<(), GpuError> {
        ctx.begin_pass(&PassDesc {
            label: &self.label,
            target: TargetRef::Framebuffer(self.framebuffer),
            clear: ClearOps {
                color: Some(self.config.background),
                ..ClearOps::default()
            },
        })
    }

    fn destroy(&mut self, ctx: &mut RenderContext) {
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.color.destroy(ctx);
    }
}

impl AutoResize for Framebuffer {
    fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
        let (w, h) = self.config.scaled_size(width, height);
        if (w, h) == self.size {
            return Ok(());
        }
        self.color.resize(ctx, w, h)?;
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.framebuffer = ctx.gpu_mut().create_framebuffer(&FramebufferDesc {
            label: &self.label,
            color: &[self.color.texture_id()],
            depth_stencil: None,
        })?;
        self.size = (w, h);
        Ok(())
    }
}

/// One color attachment plus the depth/stencil of a [`GeometryBuffer`],
/// so a later pass can test the stencil the geometry pass wrote. Its size
/// is always the source's.
#[derive(Debug)]
pub struct SharedStencilFramebuffer {
    label: String,
    config: TargetConfig,
    size: (u32, u32),
    color: Texture,
    depth_stencil: TextureId,
    framebuffer: FramebufferId,
}

impl SharedStencilFramebuffer {
    pub fn new(
        ctx: &mut RenderContext,
        label: &str,
        background: Color,
        source: &GeometryBuffer,
    ) -> Result<Self, GpuError> {
        let (w, h) = source.size();
        let color = Texture::attachment(ctx, &format!("{label}.color"), w, h)?;
        let depth_stencil = source.depth_stencil();
        let framebuffer = ctx.gpu_mut().create_framebuffer(&FramebufferDesc {
            label,
            color: &[color.texture_id()],
            depth_stencil: Some(depth_stencil),
        })?;
        Ok(Self {
            label: label.to_owned(),
            config: TargetConfig::new(background),
            size: (w, h),
            color,
            depth_stencil,
            framebuffer,
        })
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }

    /// The borrowed depth/stencil attachment.
    pub fn depth_stencil(&self) -> TextureId {
        self.depth_stencil
    }

    /// Follow `source` after it was resized or rebuilt.
    pub fn rebind(&mut self, ctx: &mut RenderContext, source: &GeometryBuffer) -> Result<(), GpuError> {
        let (w, h) = source.size();
        if (w, h) != self.size {
            self.color.resize(ctx, w, h)?;
            self.size = (w, h);
        }
        self.depth_stencil = source.depth_stencil();
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.framebuffer = ctx.gpu_mut().create_framebuffer(&FramebufferDesc {
            label: &self.label,
            color: &[self.color.texture_id()],
            depth_stencil: Some(self.depth_stencil),
        })?;
        Ok(())
    }
}

impl RenderTarget for SharedStencilFramebuffer {
    fn label(&self) -> &str {
        &self.label
    }

    fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Clears color only; the borrowed depth/stencil keeps what the
    /// geometry pass wrote.
    fn start(&self, ctx: &mut RenderContext) -> Result<(), GpuError> {
        ctx.begin_pass(&PassDesc {
            label: &self.label,
            target: TargetRef::Framebuffer(self.framebuffer),
            clear: ClearOps {
                color: Some(self.config.background),
                ..ClearOps::default()
            },
        })
    }

    fn destroy(&mut self, ctx: &mut RenderContext) {
        ctx.gpu_mut().destroy_framebuffer(self.framebuffer);
        self.color.destroy(ctx);
    }
}
