//! A mesh drawn with a material, either once with its own transform or once
//! per instance.
//!
//! Mesh buffers and materials are shared; destroying a draw call only frees
//! what it created itself (the instance buffer).
//!
//! Every draw through a shader that declares the `model` instance attribute
//! rebinds the instance streams, so a call never inherits another call's
//! instance buffer left on the shader.

use crate::camera::Camera;
use crate::context::RenderContext;
use crate::error::RenderError;
use crate::gpu::{BufferId, StepMode};
use crate::instances::{INSTANCE_FLOATS, INSTANCE_STRIDE, Instances, NORMAL_OFFSET};
use crate::material::Material;
use crate::mesh::GpuMesh;
use crate::shader::Shader;
use crate::transform::{Transform, apply_model};
use glam::{Mat4, Vec3};
use lumen_common::InstanceKey;
use std::rc::Rc;

/// Instance attribute carrying the per-instance model matrix.
pub const INSTANCE_MODEL: &str = "model";
/// Instance attribute carrying the per-instance normal matrix.
pub const INSTANCE_NORMAL: &str = "instance_normal";

/// One mesh drawn once with its own transform.
///
/// Drawn with an instanced program the call feeds it a one-instance buffer
/// holding its own model and normal matrices.
#[derive(Debug)]
pub struct DrawCall {
    mesh: GpuMesh,
    material: Rc<Material>,
    transform: Transform,
    buffer: Option<BufferId>,
    stale: bool,
}

impl DrawCall {
    pub fn new(mesh: GpuMesh, material: Rc<Material>) -> Self {
        Self {
            mesh,
            material,
            transform: Transform::default(),
            buffer: None,
            stale: true,
        }
    }

    pub fn mesh(&self) -> &GpuMesh {
        &self.mesh
    }

    pub fn material(&self) -> &Rc<Material> {
        &self.material
    }

    pub fn transform(&self) -> Mat4 {
        self.transform.matrix()
    }

    pub fn set_transform(&mut self, matrix: Mat4) {
        self.transform.set(matrix);
        self.stale = true;
    }

    /// The one-instance buffer, once drawn with an instanced program.
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// World-space origin of the model.
    pub fn origin(&self) -> Vec3 {
        self.transform.matrix().w_axis.truncate()
    }

    pub fn draw(&mut self, ctx: &mut RenderContext, shader: &mut Shader, camera: &Camera) -> Result<(), RenderError> {
        self.material.apply(ctx, shader)?;
        self.mesh.bind(shader);
        if shader.has_attribute(INSTANCE_MODEL) {
            let buffer = self.upload(ctx)?;
            bind_instances(shader, buffer);
        }
        self.transform.apply(shader, camera);
        ctx.draw(shader, self.mesh.draw_count, 1)?;
        Ok(())
    }

    fn upload(&mut self, ctx: &mut RenderContext) -> Result<BufferId, RenderError> {
        let model = self.transform.matrix();
        let normal = self.transform.normal_matrix();
        let mut packed = [0.0f32; INSTANCE_FLOATS];
        packed[..16].copy_from_slice(&model.to_cols_array());
        packed[16..].copy_from_slice(&normal.to_cols_array());
        let bytes: &[u8] = bytemuck::cast_slice(&packed);
        let gpu = ctx.gpu_mut();
        let buffer = match self.buffer {
            Some(buffer) => {
                if self.stale {
                    gpu.write_buffer(buffer, bytes)?;
                }
                buffer
            }
            None => {
                let buffer = gpu.create_buffer("instance", bytes)?;
                self.buffer = Some(buffer);
                buffer
            }
        };
        self.stale = false;
        Ok(buffer)
    }

    /// Release the one-instance buffer. The shared mesh is left alone.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        if let Some(buffer) = self.buffer.take() {
            ctx.gpu_mut().destroy_buffer(buffer);
        }
        self.stale = true;
    }
}

fn bind_instances(shader: &mut Shader, buffer: BufferId) {
    shader.set_matrix_attribute(INSTANCE_MODEL, buffer, INSTANCE_STRIDE, 0, StepMode::Instance);
    shader.set_matrix_attribute(INSTANCE_NORMAL, buffer, INSTANCE_STRIDE, NORMAL_OFFSET, StepMode::Instance);
}

/// One mesh drawn once per live instance.
///
/// With a shader that declares the `model` instance attribute the packed
/// instance buffer is uploaded and a single instanced draw is issued.
/// Otherwise each instance is drawn separately with its model uniforms.
#[derive(Debug)]
pub struct InstancedDrawCall {
    mesh: GpuMesh,
    material: Rc<Material>,
    instances: Instances<InstanceKey>,
    buffer: Option<BufferId>,
    uploaded: usize,
}

impl InstancedDrawCall {
    pub fn new(mesh: GpuMesh, material: Rc<Material>) -> Self {
        Self {
            mesh,
            material,
            instances: Instances::new(),
            buffer: None,
            uploaded: 0,
        }
    }

    pub fn mesh(&self) -> &GpuMesh {
        &self.mesh
    }

    pub fn material(&self) -> &Rc<Material> {
        &self.material
    }

    pub fn instances(&self) -> &Instances<InstanceKey> {
        &self.instances
    }

    pub fn count(&self) -> usize {
        self.instances.count()
    }

    pub fn set_instance(&mut self, key: InstanceKey, model: Mat4) {
        self.instances.set(key, model);
    }

    pub fn delete_instance(&mut self, key: &InstanceKey) -> bool {
        self.instances.delete(key)
    }

    /// Mean origin of the live instances.
    pub fn origin(&self) -> Vec3 {
        let count = self.instances.count();
        if count == 0 {
            return Vec3::ZERO;
        }
        let sum: Vec3 = (0..count)
            .filter_map(|slot| self.instances.model_at(slot))
            .map(|m| m.w_axis.truncate())
            .sum();
        sum / count as f32
    }

    /// The instance buffer, once uploaded.
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn draw(
        &mut self,
        ctx: &mut RenderContext,
        shader: &mut Shader,
        camera: &Camera,
        hardware: bool,
    ) -> Result<(), RenderError> {
        if self.instances.is_empty() {
            return Ok(());
        }
        self.material.apply(ctx, shader)?;
        self.mesh.bind(shader);

        if hardware && shader.has_attribute(INSTANCE_MODEL) {
            let buffer = self.upload(ctx)?;
            bind_instances(shader, buffer);
            ctx.draw(shader, self.mesh.draw_count, self.instances.count() as u32)?;
            return Ok(());
        }

        self.instances.rebuild();
        for slot in 0..self.instances.count() {
            let (Some(model), Some(normal)) = (self.instances.model_at(slot), self.instances.normal_at(slot)) else {
                continue;
            };
            apply_model(shader, camera, model, normal);
            ctx.draw(shader, self.mesh.draw_count, 1)?;
        }
        Ok(())
    }

    // Repack if needed and make the buffer match the packed data, recreating
    // it only when the instance count changed.
    fn upload(&mut self, ctx: &mut RenderContext) -> Result<BufferId, RenderError> {
        let dirty = self.instances.is_dirty();
        self.instances.rebuild();
        let bytes: &[u8] = bytemuck::cast_slice(self.instances.data());
        let count = self.instances.count();
        let gpu = ctx.gpu_mut();
        if let Some(buffer) = self.buffer.filter(|_| self.uploaded == count) {
            if dirty {
                gpu.write_buffer(buffer, bytes)?;
            }
            return Ok(buffer);
        }
        if let Some(stale) = self.buffer.take() {
            gpu.destroy_buffer(stale);
        }
        let buffer = gpu.create_buffer("instances", bytes)?;
        tracing::debug!(instances = count, "instance buffer allocated");
        self.buffer = Some(buffer);
        self.uploaded = count;
        Ok(buffer)
    }

    /// Release the instance buffer. The shared mesh is left alone.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        if let Some(buffer) = self.buffer.take() {
            ctx.gpu_mut().destroy_buffer(buffer);
        }
        self.uploaded = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingGpu;
    use crate::material::Pass;
    use crate::mesh::Mesh;
    use lumen_common::DepthBiasConfig;

    const SINGLE: &str = r#"
struct Uniforms {
    model_view_projection: mat4x4<f32>,
}
@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return u.model_view_projection * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    const INSTANCED: &str = r#"
struct Uniforms {
    view_projection: mat4x4<f32>,
}
@group(0) @binding(0) var<uniform> u: Uniforms;

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) model_0: vec4<f32>,
    @location(2) model_1: vec4<f32>,
    @location(3) model_2: vec4<f32>,
    @location(4) model_3: vec4<f32>,
) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(model_0, model_1, model_2, model_3);
    return u.view_projection * model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

    fn setup() -> (RenderContext, GpuMesh, Rc<Material>) {
        let mut ctx = RenderContext::new(RecordingGpu::new(16, 16), DepthBiasConfig::default());
        let mut mesh = Mesh::new();
        mesh.add_box(Vec3::ZERO, Vec3::ONE, None).unwrap();
        let mesh = mesh.upload(&mut ctx, "box").unwrap();
        (ctx, mesh, Rc::new(Material::new(Pass::Instanced)))
    }

    fn begin(ctx: &mut RenderContext) {
        ctx.begin_pass(&crate::gpu::PassDesc {
            label: "test",
            target: crate::gpu::TargetRef::Display,
            clear: crate::gpu::ClearOps::default(),
        })
        .unwrap();
    }

    #[test]
    fn hardware_path_issues_one_instanced_draw() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("inst", INSTANCED), Default::default());
        let camera = Camera::default();
        let mut call = InstancedDrawCall::new(mesh, material);
        for i in 0..5 {
            call.set_instance(InstanceKey::from_u64(i), Mat4::from_translation(Vec3::X * i as f32));
        }
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &camera, true).unwrap();

        let stats = ctx.end_frame().unwrap();
        assert_eq!(stats.draws, 1);
        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        let draw = &gpu.passes()[0].draws[0];
        assert_eq!(draw.instance_count, 5);
        assert_eq!(draw.vertex_count, 36);
        let buffer = call.buffer().unwrap();
        assert_eq!(gpu.buffer_contents(buffer).unwrap().len(), 5 * INSTANCE_STRIDE as usize);
    }

    #[test]
    fn software_path_draws_each_instance() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("single", SINGLE), Default::default());
        let camera = Camera::default();
        let mut call = InstancedDrawCall::new(mesh, material);
        for i in 0..3 {
            call.set_instance(InstanceKey::from_u64(i), Mat4::IDENTITY);
        }
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &camera, true).unwrap();
        assert_eq!(ctx.end_frame().unwrap().draws, 3);
        assert!(call.buffer().is_none());
    }

    #[test]
    fn buffer_is_reallocated_only_when_count_changes() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("inst", INSTANCED), Default::default());
        let camera = Camera::default();
        let mut call = InstancedDrawCall::new(mesh, material);
        call.set_instance(InstanceKey::from_u64(1), Mat4::IDENTITY);
        call.set_instance(InstanceKey::from_u64(2), Mat4::IDENTITY);
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &camera, true).unwrap();
        let first = call.buffer().unwrap();

        call.set_instance(InstanceKey::from_u64(2), Mat4::from_translation(Vec3::Y));
        call.draw(&mut ctx, &mut shader, &camera, true).unwrap();
        assert_eq!(call.buffer(), Some(first));

        call.delete_instance(&InstanceKey::from_u64(1));
        call.draw(&mut ctx, &mut shader, &camera, true).unwrap();
        assert_ne!(call.buffer(), Some(first));
        assert_eq!(ctx.backend::<RecordingGpu>().unwrap().live_buffers(), 5);
    }

    #[test]
    fn destroy_keeps_shared_mesh() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("inst", INSTANCED), Default::default());
        let mut call = InstancedDrawCall::new(mesh, material);
        call.set_instance(InstanceKey::from_u64(1), Mat4::IDENTITY);
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &Camera::default(), true).unwrap();
        call.destroy(&mut ctx);
        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        assert!(gpu.buffer_contents(mesh.position).is_some());
        assert_eq!(gpu.live_buffers(), 4);
    }

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn single_call_feeds_instanced_program_its_own_matrix() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("inst", INSTANCED), Default::default());
        let camera = Camera::default();
        let mut instanced = InstancedDrawCall::new(mesh, material.clone());
        instanced.set_instance(InstanceKey::from_u64(1), Mat4::from_translation(Vec3::X * 100.0));
        let mut single = DrawCall::new(mesh, material);
        single.set_transform(Mat4::from_translation(Vec3::Y * 5.0));

        begin(&mut ctx);
        instanced.draw(&mut ctx, &mut shader, &camera, true).unwrap();
        single.draw(&mut ctx, &mut shader, &camera).unwrap();
        ctx.end_frame().unwrap();

        let own = single.buffer().unwrap();
        let shared = instanced.buffer().unwrap();
        assert_ne!(own, shared);
        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        let draw = &gpu.passes()[0].draws[1];
        assert_eq!(draw.instance_count, 1);
        assert!(draw.streams.iter().any(|s| s.buffer == own && s.step == StepMode::Instance));
        assert!(draw.streams.iter().all(|s| s.buffer != shared));
        let packed = floats(gpu.buffer_contents(own).unwrap());
        assert_eq!(packed.len(), INSTANCE_FLOATS);
        assert_eq!(&packed[12..15], &[0.0, 5.0, 0.0]);
    }

    #[test]
    fn single_call_instance_buffer_follows_transform() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("inst", INSTANCED), Default::default());
        let camera = Camera::default();
        let mut call = DrawCall::new(mesh, material);
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &camera).unwrap();
        let buffer = call.buffer().unwrap();

        call.set_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)));
        call.draw(&mut ctx, &mut shader, &camera).unwrap();
        assert_eq!(call.buffer(), Some(buffer));
        let packed = floats(ctx.backend::<RecordingGpu>().unwrap().buffer_contents(buffer).unwrap());
        assert_eq!(packed[14], -3.0);

        call.destroy(&mut ctx);
        assert!(call.buffer().is_none());
        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        assert!(gpu.buffer_contents(buffer).is_none());
        assert!(gpu.buffer_contents(mesh.position).is_some());
    }

    #[test]
    fn single_draw_call_publishes_model_uniforms() {
        let (mut ctx, mesh, material) = setup();
        let mut shader = Shader::new(&mut ctx, &crate::shader::ShaderSource::new("single", SINGLE), Default::default());
        let mut call = DrawCall::new(mesh, material);
        call.set_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0)));
        assert_eq!(call.origin(), Vec3::new(0.0, 0.0, -5.0));
        begin(&mut ctx);
        call.draw(&mut ctx, &mut shader, &Camera::default()).unwrap();
        assert_eq!(ctx.end_frame().unwrap().draws, 1);
        // No instance attributes, no instance buffer.
        assert!(call.buffer().is_none());
    }
}
