use crate::context::RenderContext;
use crate::gpu::GpuError;
use crate::shader::Shader;
use crate::texture::{Sampled, Texture};
use std::fmt;
use std::rc::Rc;

/// Sampler unit of the diffuse texture.
pub const DIFFUSE_UNIT: u32 = 0;
/// Sampler unit of the decal texture.
pub const DECAL_UNIT: u32 = 1;

/// The pass bucket a draw call is drawn in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {
    Opaque,
    Translucent,
    Instanced,
    Custom(String),
}

impl Pass {
    pub fn name(&self) -> &str {
        match self {
            Self::Opaque => "opaque",
            Self::Translucent => "translucent",
            Self::Instanced => "instanced",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pass assignment, textures and depth bias shared by draw calls.
///
/// Immutable once built so the bucket of every draw call using it is fixed.
#[derive(Debug, Clone)]
pub struct Material {
    pass: Pass,
    diffuse: Option<Rc<Texture>>,
    decal: Option<Rc<Texture>>,
    depth_bias: i32,
}

impl Material {
    pub fn new(pass: Pass) -> Self {
        Self {
            pass,
            diffuse: None,
            decal: None,
            depth_bias: 0,
        }
    }

    pub fn with_diffuse(mut self, texture: Rc<Texture>) -> Self {
        self.diffuse = Some(texture);
        self
    }

    pub fn with_decal(mut self, texture: Rc<Texture>) -> Self {
        self.decal = Some(texture);
        self
    }

    /// Added to the target's constant depth bias.
    pub fn with_depth_bias(mut self, bias: i32) -> Self {
        self.depth_bias = bias;
        self
    }

    pub fn pass(&self) -> &Pass {
        &self.pass
    }

    pub fn diffuse(&self) -> Option<&Rc<Texture>> {
        self.diffuse.as_ref()
    }

    pub fn decal(&self) -> Option<&Rc<Texture>> {
        self.decal.as_ref()
    }

    pub fn depth_bias(&self) -> i32 {
        self.depth_bias
    }

    /// Bind textures (white diffuse and transparent decal when absent) and
    /// the depth bias.
    pub fn apply(&self, ctx: &mut RenderContext, shader: &mut Shader) -> Result<(), GpuError> {
        ctx.set_material_bias(self.depth_bias);
        match &self.diffuse {
            Some(texture) => texture.apply(ctx, shader, DIFFUSE_UNIT),
            None => {
                let white = ctx.white_texture()?;
                bind_default(shader, DIFFUSE_UNIT, white);
            }
        }
        match &self.decal {
            Some(texture) => texture.apply(ctx, shader, DECAL_UNIT),
            None => {
                let transparent = ctx.transparent_texture()?;
                bind_default(shader, DECAL_UNIT, transparent);
            }
        }
        Ok(())
    }
}

fn bind_default(shader: &mut Shader, unit: u32, texture: crate::gpu::TextureId) {
    shader.bind_texture(unit, texture);
    shader.set_uniform(&format!("tex{unit}_width"), 1.0f32);
    shader.set_uniform(&format!("tex{unit}_height"), 1.0f32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingGpu;
    use crate::shader::{ShaderOptions, ShaderSource};
    use crate::texture::Placeholder;
    use lumen_common::DepthBiasConfig;

    const TEXTURED: &str = r#"
@group(1) @binding(0) var diffuse_tex: texture_2d<f32>;
@group(1) @binding(1) var diffuse_sampler: sampler;
@group(1) @binding(2) var decal_tex: texture_2d<f32>;
@group(1) @binding(3) var decal_sampler: sampler;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    let uv = vec2<f32>(0.5, 0.5);
    let base = textureSample(diffuse_tex, diffuse_sampler, uv);
    let decal = textureSample(decal_tex, decal_sampler, uv);
    return vec4<f32>(mix(base.rgb, decal.rgb, decal.a), base.a);
}
"#;

    #[test]
    fn missing_textures_bind_neutral_defaults() {
        let mut ctx = RenderContext::new(RecordingGpu::new(8, 8), DepthBiasConfig::default());
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("textured", TEXTURED), ShaderOptions::OPAQUE);
        Material::new(Pass::Opaque).apply(&mut ctx, &mut shader).unwrap();
        let bound = shader.texture_bindings();
        assert_eq!(bound.len(), 2);
        assert_eq!(bound[0].texture, ctx.white_texture().unwrap());
        assert_eq!(bound[1].texture, ctx.transparent_texture().unwrap());
    }

    #[test]
    fn textures_bind_to_their_units() {
        let mut ctx = RenderContext::new(RecordingGpu::new(8, 8), DepthBiasConfig::default());
        let mut shader = Shader::new(&mut ctx, &ShaderSource::new("textured", TEXTURED), ShaderOptions::OPAQUE);
        let decal = Rc::new(Texture::placeholder(&mut ctx, "decal", Placeholder::Decal).unwrap());
        let material = Material::new(Pass::Translucent)
            .with_decal(Rc::clone(&decal))
            .with_depth_bias(2);
        material.apply(&mut ctx, &mut shader).unwrap();
        let decal_binding = shader.texture_bindings().iter().find(|b| b.unit == DECAL_UNIT).unwrap();
        assert_eq!(decal_binding.texture, decal.texture_id());
        assert_eq!(material.pass().name(), "translucent");
    }

    #[test]
    fn custom_pass_names() {
        assert_eq!(Pass::Custom("water".into()).to_string(), "water");
        assert_ne!(Pass::Opaque, Pass::Custom("opaque".into()));
    }
}
