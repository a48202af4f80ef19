//! Whole frames against the recording backend.

use glam::{Mat4, Vec3};
use lumen_common::{Color, DepthBiasConfig, InstanceKey, RenderConfig, TierPreference};
use lumen_render::gpu::{Capabilities, PassRecord, RecordingGpu, StencilMode, TargetRef};
use lumen_render::shader::variant::{ForwardVariant, ShaderVariant};
use lumen_render::target::DisplayTarget;
use lumen_render::texture::{DecodedImage, Placeholder};
use lumen_render::{
    Camera, DrawCallId, Lights, Material, Mesh, Pass, Pipeline, ProgramKind, RenderContext, RenderTarget, Scene,
    Shader, Texture,
};
use std::rc::Rc;

struct Fixture {
    ctx: RenderContext,
    scene: Scene,
    camera: Camera,
    lights: Lights,
    opaque: DrawCallId,
    translucent: DrawCallId,
    instanced: DrawCallId,
}

fn fixture(gpu: RecordingGpu) -> Fixture {
    let mut ctx = RenderContext::new(gpu, DepthBiasConfig::default());
    let mut mesh = Mesh::new();
    mesh.add_box(Vec3::ZERO, Vec3::ONE, Some(Color::rgb(0.8, 0.6, 0.4))).unwrap();
    let mesh = mesh.upload(&mut ctx, "box").unwrap();

    let mut scene = Scene::new();
    let opaque = scene.create_draw_call(mesh, Rc::new(Material::new(Pass::Opaque)));
    let translucent = scene.create_draw_call(mesh, Rc::new(Material::new(Pass::Translucent)));
    let instanced = scene.create_instanced_draw_call(mesh, Rc::new(Material::new(Pass::Instanced)));
    scene
        .draw_call_mut(translucent)
        .unwrap()
        .set_transform(Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)));
    let call = scene.instanced_mut(instanced).unwrap();
    for i in 0..3 {
        call.set_instance(
            InstanceKey::from_u64(i),
            Mat4::from_translation(Vec3::new(i as f32 * 2.0, 0.0, -4.0)),
        );
    }
    for id in [opaque, translucent, instanced] {
        scene.add(id).unwrap();
    }

    let (w, h) = ctx.surface_size();
    let mut camera = Camera::new(w, h);
    camera.look_at(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO, Vec3::Y);
    Fixture {
        ctx,
        scene,
        camera,
        lights: Lights::default(),
        opaque,
        translucent,
        instanced,
    }
}

fn take_passes(ctx: &mut RenderContext) -> Vec<PassRecord> {
    ctx.backend_mut::<RecordingGpu>().unwrap().take_passes()
}

fn shaders(pass: &PassRecord) -> Vec<&str> {
    pass.draws.iter().map(|d| d.shader.as_str()).collect()
}

#[test]
fn forward_frame_draws_every_bucket_on_the_display() {
    let gpu = RecordingGpu::with_capabilities(64, 64, Capabilities::baseline("recording"));
    let mut f = fixture(gpu);
    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    assert_eq!(pipeline.tier(), 0);

    let stats = pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    assert_eq!((stats.passes, stats.draws, stats.skipped), (1, 5, 0));

    let passes = take_passes(&mut f.ctx);
    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].target, TargetRef::Display);
    // No hardware instancing: one draw per instance with the forward program.
    assert_eq!(
        shaders(&passes[0]),
        ["forward", "forward", "forward", "forward", "translucent"]
    );
    let last = passes[0].draws.last().unwrap();
    assert!(last.state.blend);
    assert!(!last.state.depth_write);
    assert!(last.state.depth_bias.constant < 0);
}

#[test]
fn forward_tier_builds_no_deferred_programs() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let config = RenderConfig {
        tier: TierPreference::Forward,
        ..RenderConfig::default()
    };
    let pipeline = Pipeline::new(&mut f.ctx, &config).unwrap();
    assert_eq!(pipeline.tier(), 0);

    let gpu = f.ctx.backend::<RecordingGpu>().unwrap();
    let deferred: Vec<_> = ProgramKind::ALL
        .into_iter()
        .filter(|kind| kind.is_deferred())
        .map(|kind| kind.label().to_owned())
        .collect();
    assert!(gpu.program_labels().iter().all(|label| !deferred.contains(label)));
    assert_eq!(gpu.live_framebuffers(), 0);
}

#[test]
fn opaque_pass_issues_no_blend_toggles() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let forward = ForwardVariant.source(ProgramKind::Forward).unwrap();
    let translucent = ForwardVariant.source(ProgramKind::Translucent).unwrap();
    let mut opaque_shader = Shader::new(&mut f.ctx, &forward, ProgramKind::Forward.options());
    let mut blend_shader = Shader::new(&mut f.ctx, &translucent, ProgramKind::Translucent.options());
    let display = DisplayTarget::new(&f.ctx, Color::BLACK);

    display.start(&mut f.ctx).unwrap();
    f.ctx.backend_mut::<RecordingGpu>().unwrap().reset_toggles();
    let stats = f
        .scene
        .draw_pass(&mut f.ctx, &Pass::Opaque, &mut opaque_shader, &f.camera, false);
    assert_eq!(stats.drawn, 1);
    let gpu = f.ctx.backend::<RecordingGpu>().unwrap();
    assert_eq!(gpu.toggles().blend, 0);
    assert_eq!(shaders(&gpu.passes()[0]), ["forward"]);

    f.scene
        .draw_pass(&mut f.ctx, &Pass::Translucent, &mut blend_shader, &f.camera, false);
    assert_eq!(f.ctx.backend::<RecordingGpu>().unwrap().toggles().blend, 1);
    assert!(f.scene.is_attached(f.opaque) && f.scene.is_attached(f.translucent));
}

#[test]
fn deferred_frame_runs_geometry_occlusion_compose_and_blend() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    assert_eq!(pipeline.tier(), 2);

    let stats = pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    assert_eq!((stats.passes, stats.draws, stats.skipped), (4, 7, 0));

    let passes = take_passes(&mut f.ctx);
    let labels: Vec<_> = passes.iter().map(|p| p.label.as_str()).collect();
    assert_eq!(labels, ["gbuffer", "occlusion", "compose", "display"]);

    let geometry = &passes[0];
    assert_eq!(
        shaders(geometry),
        ["geometry", "geometry_instanced", "geometry_translucent"]
    );
    let write = StencilMode::Write { reference: 1 };
    assert_eq!(geometry.draws[0].state.stencil, write);
    assert_eq!(geometry.draws[1].state.stencil, write);
    assert_eq!(geometry.draws[1].instance_count, 3);
    let glass = &geometry.draws[2];
    assert_eq!(glass.state.stencil, StencilMode::Disabled);
    assert_eq!(glass.state.color_mask, 0b001);
    assert!(glass.state.blend && !glass.state.depth_write);

    assert_eq!(shaders(&passes[1]), ["occlusion"]);
    assert!(!passes[1].draws[0].state.depth_test);

    // Compose loads the shared stencil and only whitens unwritten pixels.
    assert_eq!(passes[2].clear.stencil, None);
    assert_eq!(passes[2].clear.depth, None);
    assert_eq!(shaders(&passes[2]), ["compose_copy", "compose_mask"]);
    assert_eq!(passes[2].draws[0].state.stencil, StencilMode::Disabled);
    assert_eq!(passes[2].draws[1].state.stencil, StencilMode::Equal { reference: 0 });

    assert_eq!(passes[3].target, TargetRef::Display);
    assert_eq!(shaders(&passes[3]), ["final_blend"]);
}

fn floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[test]
fn single_call_in_instanced_bucket_draws_with_its_own_transform() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let mesh = *f.scene.draw_call(f.opaque).unwrap().mesh();
    let single = f.scene.create_draw_call(mesh, Rc::new(Material::new(Pass::Instanced)));
    f.scene
        .draw_call_mut(single)
        .unwrap()
        .set_transform(Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)));
    f.scene.add(single).unwrap();
    f.scene
        .instanced_mut(f.instanced)
        .unwrap()
        .set_instance(InstanceKey::from_u64(0), Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0)));

    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    assert_eq!(pipeline.tier(), 2);
    let stats = pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    assert_eq!((stats.draws, stats.skipped), (8, 0));

    let passes = take_passes(&mut f.ctx);
    let geometry = &passes[0];
    assert_eq!(
        shaders(geometry),
        ["geometry", "geometry_instanced", "geometry_instanced", "geometry_translucent"]
    );
    let shared = f.scene.instanced(f.instanced).unwrap().buffer().unwrap();
    let own = f.scene.draw_call(single).unwrap().buffer().unwrap();
    let draw = &geometry.draws[2];
    assert_eq!(draw.instance_count, 1);
    assert!(draw.streams.iter().all(|s| s.buffer != shared));
    assert!(draw.streams.iter().any(|s| s.buffer == own));
    let gpu = f.ctx.backend::<RecordingGpu>().unwrap();
    assert_eq!(&floats(gpu.buffer_contents(own).unwrap())[12..15], &[0.0, 5.0, 0.0]);

    // Reallocating the other call's buffer leaves nothing stale behind.
    f.scene
        .instanced_mut(f.instanced)
        .unwrap()
        .delete_instance(&InstanceKey::from_u64(2));
    let stats = pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    assert_eq!(stats.skipped, 0);
    assert_eq!(f.ctx.backend::<RecordingGpu>().unwrap().rejected_draws(), 0);

    f.scene.destroy(&mut f.ctx);
    let gpu = f.ctx.backend::<RecordingGpu>().unwrap();
    assert!(gpu.buffer_contents(own).is_none());
}

#[test]
fn extension_tier_without_instancing_draws_instances_in_software() {
    let capabilities = Capabilities {
        instancing: lumen_render::Support::None,
        multiple_render_targets: lumen_render::Support::Extension,
        ..Capabilities::full("recording")
    };
    let mut f = fixture(RecordingGpu::with_capabilities(64, 64, capabilities));
    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    assert_eq!(pipeline.tier(), 1);
    assert_eq!(pipeline.occlusion_samples(), 16);

    pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    let passes = take_passes(&mut f.ctx);
    let geometry = &passes[0];
    assert_eq!(
        shaders(geometry),
        ["geometry", "geometry", "geometry", "geometry", "geometry_translucent"]
    );
    assert!(geometry.draws.iter().all(|d| d.instance_count == 1));
    assert!(f.scene.instanced(f.instanced).unwrap().buffer().is_none());
}

#[test]
fn resize_reaches_targets_and_camera() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    pipeline.resize(&mut f.ctx, &mut f.camera, 200, 100).unwrap();
    assert_eq!(f.camera.viewport(), (200, 100));
    assert_eq!(f.ctx.surface_size(), (200, 100));

    pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    let passes = take_passes(&mut f.ctx);
    let gpu = f.ctx.backend::<RecordingGpu>().unwrap();
    let occlusion = &passes[1].draws[0];
    let normal = occlusion.textures.iter().find(|b| b.unit == 0).unwrap();
    assert_eq!(gpu.texture_size(normal.texture), Some((200, 100)));
    let copy = &passes[2].draws[0];
    let ao = copy.textures.iter().find(|b| b.unit == 0).unwrap();
    assert_eq!(gpu.texture_size(ao.texture), Some((100, 50)));
}

#[test]
fn fov_change_regenerates_occlusion_kernel() {
    let mut f = fixture(RecordingGpu::new(64, 64));
    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    let kernel = take_passes(&mut f.ctx)[1].draws[0]
        .textures
        .iter()
        .find(|b| b.unit == 2)
        .unwrap()
        .texture;
    assert_eq!(f.ctx.backend::<RecordingGpu>().unwrap().texture_uploads(kernel), Some(1));

    f.camera.set_projection(40.0_f32.to_radians(), 0.1, 500.0);
    pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    assert_eq!(f.ctx.backend::<RecordingGpu>().unwrap().texture_uploads(kernel), Some(2));
}

#[test]
fn pending_texture_shows_placeholder_until_image_arrives() {
    let mut f = fixture(RecordingGpu::with_capabilities(64, 64, Capabilities::baseline("recording")));
    let (texture, sender) = Texture::pending(&mut f.ctx, "crate", Placeholder::Color).unwrap();
    let texture = Rc::new(texture);
    let mut mesh = Mesh::new();
    mesh.add_box(Vec3::ZERO, Vec3::ONE, None).unwrap();
    let mesh = mesh.upload(&mut f.ctx, "textured").unwrap();
    let material = Rc::new(Material::new(Pass::Opaque).with_diffuse(Rc::clone(&texture)));
    f.scene.remove(f.opaque);
    let textured = f.scene.create_draw_call(mesh, material);
    f.scene.add(textured).unwrap();

    let mut pipeline = Pipeline::new(&mut f.ctx, &RenderConfig::default()).unwrap();
    assert_eq!(diffuse_size(&mut f, &mut pipeline), Some((1, 1)));
    assert!(texture.is_pending());

    assert!(sender.send(DecodedImage {
        width: 4,
        height: 4,
        rgba: vec![200; 4 * 4 * 4],
    }));
    assert_eq!(diffuse_size(&mut f, &mut pipeline), Some((4, 4)));
    assert!(!texture.is_pending());
}

// Size of the texture bound to the diffuse unit of the first display draw.
fn diffuse_size(f: &mut Fixture, pipeline: &mut Pipeline) -> Option<(u32, u32)> {
    pipeline
        .render_frame(&mut f.ctx, &mut f.scene, &f.camera, &f.lights)
        .unwrap();
    let passes = take_passes(&mut f.ctx);
    let binding = passes[0].draws[0].textures.iter().find(|b| b.unit == 0).copied()?;
    f.ctx.backend::<RecordingGpu>().unwrap().texture_size(binding.texture)
}

#[test]
fn destroyed_texture_ignores_late_image() {
    let mut ctx = RenderContext::new(RecordingGpu::new(8, 8), DepthBiasConfig::default());
    let (texture, sender) = Texture::pending(&mut ctx, "late", Placeholder::Decal).unwrap();
    texture.destroy(&mut ctx);
    let delivered = std::thread::spawn(move || {
        sender.send(DecodedImage {
            width: 1,
            height: 1,
            rgba: vec![0; 4],
        })
    })
    .join()
    .unwrap();
    assert!(!delivered);
    assert!(!texture.poll(&mut ctx));
    assert_eq!(ctx.backend::<RecordingGpu>().unwrap().live_textures(), 0);
}
