//! Sampled texture resources.
//!
//! Every variant can be bound to a sampler unit through [`Sampled::apply`],
//! which also publishes the size as `tex{unit}_width` / `tex{unit}_height`
//! so shaders can convert between texel and screen coordinates.
//!
//! # Invariants
//! - A [`Texture`] is valid for sampling from construction on: until its
//!   image arrives it holds a 1×1 placeholder (opaque magenta for color,
//!   transparent black for decals).
//! - An image that arrives after the texture was destroyed is dropped.

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::gpu::{GpuError, TextureDesc, TextureFormat, TextureId, Wrap};
use crate::shader::Shader;
use glam::Vec4;
use lumen_common::Color;
use std::cell::{Cell, RefCell};

/// Anything that can be bound to a sampler unit.
pub trait Sampled {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn texture_id(&self) -> TextureId;

    /// Bind to `unit` and publish the companion size uniforms.
    fn apply(&self, _ctx: &mut RenderContext, shader: &mut Shader, unit: u32) {
        bind_sampled(shader, unit, self.texture_id(), self.width(), self.height());
    }
}

fn bind_sampled(shader: &mut Shader, unit: u32, id: TextureId, width: u32, height: u32) {
    shader.bind_texture(unit, id);
    shader.set_uniform(&format!("tex{unit}_width"), width as f32);
    shader.set_uniform(&format!("tex{unit}_height"), height as f32);
}

/// What a color texture shows before its image arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// Opaque magenta, easy to spot.
    Color,
    /// Transparent black, invisible when layered as a decal.
    Decal,
}

impl Placeholder {
    pub fn color(self) -> Color {
        match self {
            Self::Color => Color::MAGENTA,
            Self::Decal => Color::TRANSPARENT,
        }
    }
}

/// A decoded RGBA8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

#[derive(Debug)]
enum ImageEvent {
    Ready(DecodedImage),
    Failed(String),
}

/// Delivers the image of a pending [`Texture`], typically from a decoder
/// thread.
#[derive(Debug, Clone)]
pub struct ImageSender {
    tx: flume::Sender<ImageEvent>,
}

impl ImageSender {
    /// Hand over the decoded image. Returns false if the texture is gone.
    pub fn send(&self, image: DecodedImage) -> bool {
        self.tx.send(ImageEvent::Ready(image)).is_ok()
    }

    /// Report a load failure; the texture keeps its placeholder.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(ImageEvent::Failed(reason.into())).is_ok()
    }
}

/// An RGBA8 color texture.
#[derive(Debug)]
pub struct Texture {
    label: String,
    id: Cell<TextureId>,
    size: Cell<(u32, u32)>,
    pending: RefCell<Option<flume::Receiver<ImageEvent>>>,
    destroyed: Cell<bool>,
}

impl Texture {
    fn with_id(label: &str, id: TextureId, size: (u32, u32)) -> Self {
        Self {
            label: label.to_owned(),
            id: Cell::new(id),
            size: Cell::new(size),
            pending: RefCell::new(None),
            destroyed: Cell::new(false),
        }
    }

    /// A 1×1 texture showing `placeholder`.
    pub fn placeholder(ctx: &mut RenderContext, label: &str, placeholder: Placeholder) -> Result<Self, RenderError> {
        let id = ctx.solid_texture(label, placeholder.color())?;
        Ok(Self::with_id(label, id, (1, 1)))
    }

    /// Upload an image now. Power-of-two images repeat and get a mip chain;
    /// other sizes are clamped and single-level.
    pub fn from_rgba(
        ctx: &mut RenderContext,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<Self, RenderError> {
        let id = upload_rgba(ctx, label, width, height, rgba)?;
        Ok(Self::with_id(label, id, (width, height)))
    }

    /// A placeholder texture whose image arrives later through the returned
    /// sender. The image is uploaded on the first [`poll`](Self::poll) (or
    /// bind) after it arrives.
    pub fn pending(
        ctx: &mut RenderContext,
        label: &str,
        placeholder: Placeholder,
    ) -> Result<(Self, ImageSender), RenderError> {
        let texture = Self::placeholder(ctx, label, placeholder)?;
        let (tx, rx) = flume::unbounded();
        *texture.pending.borrow_mut() = Some(rx);
        Ok((texture, ImageSender { tx }))
    }

    /// An uninitialised texture to render into.
    pub fn attachment(ctx: &mut RenderContext, label: &str, width: u32, height: u32) -> Result<Self, GpuError> {
        let id = ctx
            .gpu_mut()
            .create_texture(&TextureDesc::new(label, width, height, TextureFormat::Rgba8Unorm))?;
        Ok(Self::with_id(label, id, (width, height)))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_pending(&self) -> bool {
        self.pending.borrow().is_some()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Upload the pending image if it has arrived. Never blocks. Returns
    /// true when new contents were uploaded.
    pub fn poll(&self, ctx: &mut RenderContext) -> bool {
        let event = {
            let pending = self.pending.borrow();
            let Some(rx) = pending.as_ref() else {
                return false;
            };
            match rx.try_recv() {
                Ok(event) => Some(event),
                Err(flume::TryRecvError::Empty) => return false,
                Err(flume::TryRecvError::Disconnected) => None,
            }
        };
        self.pending.borrow_mut().take();

        match event {
            Some(ImageEvent::Ready(image)) => {
                match upload_rgba(ctx, &self.label, image.width, image.height, &image.rgba) {
                    Ok(id) => {
                        ctx.gpu_mut().destroy_texture(self.id.replace(id));
                        self.size.set((image.width, image.height));
                        tracing::debug!(texture = %self.label, image.width, image.height, "texture loaded");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(texture = %self.label, "texture upload failed, keeping placeholder: {e}");
                        false
                    }
                }
            }
            Some(ImageEvent::Failed(reason)) => {
                tracing::warn!(texture = %self.label, "texture load failed, keeping placeholder: {reason}");
                false
            }
            None => {
                tracing::debug!(texture = %self.label, "image source dropped, keeping placeholder");
                false
            }
        }
    }

    /// Reallocate at a new size. Contents are undefined afterwards.
    pub fn resize(&self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
        let id = ctx
            .gpu_mut()
            .create_texture(&TextureDesc::new(&self.label, width, height, TextureFormat::Rgba8Unorm))?;
        ctx.gpu_mut().destroy_texture(self.id.replace(id));
        self.size.set((width, height));
        Ok(())
    }

    /// Release the GPU texture. A late image is dropped with its channel.
    pub fn destroy(&self, ctx: &mut RenderContext) {
        if self.destroyed.replace(true) {
            return;
        }
        self.pending.borrow_mut().take();
        ctx.gpu_mut().destroy_texture(self.id.get());
    }
}

impl Sampled for Texture {
    fn width(&self) -> u32 {
        self.size.get().0
    }

    fn height(&self) -> u32 {
        self.size.get().1
    }

    fn texture_id(&self) -> TextureId {
        self.id.get()
    }

    fn apply(&self, ctx: &mut RenderContext, shader: &mut Shader, unit: u32) {
        self.poll(ctx);
        bind_sampled(shader, unit, self.texture_id(), self.width(), self.height());
    }
}

fn upload_rgba(
    ctx: &mut RenderContext,
    label: &str,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> Result<TextureId, RenderError> {
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || rgba.len() != expected {
        return Err(RenderError::ImageSize {
            width,
            height,
            expected,
            actual: rgba.len(),
        });
    }
    let pot = width.is_power_of_two() && height.is_power_of_two();
    let mut desc = TextureDesc::new(label, width, height, TextureFormat::Rgba8Unorm);
    if pot {
        desc.wrap = Wrap::Repeat;
        desc.mip_levels = mip_level_count(width, height);
    }

    let gpu = ctx.gpu_mut();
    let id = gpu.create_texture(&desc)?;
    gpu.write_texture(id, 0, rgba)?;
    let (mut w, mut h) = (width, height);
    let mut level = std::borrow::Cow::Borrowed(rgba);
    for index in 1..desc.mip_levels {
        let next = downsample(w, h, &level);
        (w, h) = desc.level_size(index);
        gpu.write_texture(id, index, &next)?;
        level = std::borrow::Cow::Owned(next);
    }
    Ok(id)
}

/// Levels down to 1×1.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// 2×2 box filter of an RGBA8 image; odd edges repeat the last texel.
pub fn downsample(width: u32, height: u32, rgba: &[u8]) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
    let mut out = Vec::with_capacity(nw * nh * 4);
    for y in 0..nh {
        for x in 0..nw {
            for c in 0..4 {
                let mut sum = 0u32;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let sx = (2 * x + dx).min(w - 1);
                    let sy = (2 * y + dy).min(h - 1);
                    sum += rgba[(sy * w + sx) * 4 + c] as u32;
                }
                out.push(((sum + 2) / 4) as u8);
            }
        }
    }
    out
}

/// A render attachment of fixed format that can be resized.
#[derive(Debug)]
pub struct RawTexture {
    label: String,
    id: TextureId,
    format: TextureFormat,
    width: u32,
    height: u32,
}

impl RawTexture {
    pub fn new(
        ctx: &mut RenderContext,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, GpuError> {
        let id = ctx
            .gpu_mut()
            .create_texture(&TextureDesc::new(label, width, height, format))?;
        Ok(Self {
            label: label.to_owned(),
            id,
            format,
            width,
            height,
        })
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
        let id = ctx
            .gpu_mut()
            .create_texture(&TextureDesc::new(&self.label, width, height, self.format))?;
        ctx.gpu_mut().destroy_texture(std::mem::replace(&mut self.id, id));
        self.width = width;
        self.height = height;
        Ok(())
    }

    pub fn destroy(&self, ctx: &mut RenderContext) {
        ctx.gpu_mut().destroy_texture(self.id);
    }
}

impl Sampled for RawTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn texture_id(&self) -> TextureId {
        self.id
    }
}

macro_rules! attachment_texture {
    ($(#[$meta:meta])* $name:ident, $format:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name(RawTexture);

        impl $name {
            pub fn new(ctx: &mut RenderContext, label: &str, width: u32, height: u32) -> Result<Self, GpuError> {
                RawTexture::new(ctx, label, width, height, $format).map(Self)
            }

            pub fn resize(&mut self, ctx: &mut RenderContext, width: u32, height: u32) -> Result<(), GpuError> {
                self.0.resize(ctx, width, height)
            }

            pub fn destroy(&self, ctx: &mut RenderContext) {
                self.0.destroy(ctx)
            }
        }

        impl Sampled for $name {
            fn width(&self) -> u32 {
                self.0.width
            }

            fn height(&self) -> u32 {
                self.0.height
            }

            fn texture_id(&self) -> TextureId {
                self.0.id
            }
        }
    };
}

attachment_texture!(
    /// Depth-only texture; shaders read the depth from the red channel.
    DepthTexture,
    TextureFormat::Depth32Float
);
attachment_texture!(
    /// Half-float RGBA storage for data that needs more than 8 bits.
    FloatTexture,
    TextureFormat::Rgba16Float
);

/// A one-row, unfiltered float texture holding a fixed array of 4-vectors.
/// Shaders read entry `i` with `textureLoad(table, vec2(i, 0), 0)`.
#[derive(Debug)]
pub struct TextureTable {
    label: String,
    id: TextureId,
    len: u32,
}

impl TextureTable {
    pub fn new(ctx: &mut RenderContext, label: &str, values: &[Vec4]) -> Result<Self, RenderError> {
        let len = u32::try_from(values.len()).map_err(|_| RenderError::EmptyTable)?;
        if len == 0 {
            return Err(RenderError::EmptyTable);
        }
        let id = ctx
            .gpu_mut()
            .create_texture(&TextureDesc::new(label, len, 1, TextureFormat::Rgba32Float))?;
        ctx.gpu_mut().write_texture(id, 0, bytemuck::cast_slice(values))?;
        Ok(Self {
            label: label.to_owned(),
            id,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replace the contents, reallocating if the length changed.
    pub fn update(&mut self, ctx: &mut RenderContext, values: &[Vec4]) -> Result<(), RenderError> {
        if values.len() != self.len() {
            let replacement = Self::new(ctx, &self.label, values)?;
            self.destroy(ctx);
            *self = replacement;
            return Ok(());
        }
        ctx.gpu_mut().write_texture(self.id, 0, bytemuck::cast_slice(values))?;
        Ok(())
    }

    pub fn destroy(&self, ctx: &mut RenderContext) {
        ctx.gpu_mut().destroy_texture(self.id);
    }
}

impl Sampled for TextureTable {
    fn width(&self) -> u32 {
        self.len
    }

    fn height(&self) -> u32 {
        1
    }

    fn texture_id(&self) -> TextureId {
        self.id
    }
}
