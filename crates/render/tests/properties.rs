//! Behavioural properties of the core data structures.

use glam::{Mat4, Quat, Vec2, Vec3};
use lumen_common::{Color, DepthBiasConfig, InstanceKey};
use lumen_render::gpu::RecordingGpu;
use lumen_render::{Camera, Instances, Material, Mesh, Pass, RenderContext, Scene};
use std::rc::Rc;

fn context() -> RenderContext {
    RenderContext::new(RecordingGpu::new(64, 64), DepthBiasConfig::default())
}

#[test]
fn faces_keep_attribute_arrays_parallel() {
    let mut mesh = Mesh::new();
    let pentagon: Vec<Vec3> = (0..5)
        .map(|i| {
            let a = i as f32 * std::f32::consts::TAU / 5.0;
            Vec3::new(a.cos(), a.sin(), 0.0)
        })
        .collect();
    let colors = vec![Color::rgb(1.0, 0.0, 0.0); 5];
    mesh.add_face(&pentagon, Some(&colors[..]), None, None).unwrap();
    mesh.add_face(&pentagon[..3], None, Some(&[Vec2::ZERO, Vec2::X, Vec2::ONE][..]), None)
        .unwrap();

    assert_eq!(mesh.vertices.len(), mesh.normals.len());
    assert_eq!(mesh.vertices.len() % 3, 0);
    let vertices = mesh.vertex_count();
    assert_eq!(vertices, 9 + 3);
    // Colors and coordinates, once present, cover every vertex.
    assert_eq!(mesh.colors.len(), vertices * 4);
    assert_eq!(mesh.coordinates.len(), vertices * 2);
    assert_eq!(&mesh.colors[..4], &[1.0, 0.0, 0.0, 1.0]);
    mesh.validate().unwrap();
}

#[test]
fn unit_quad_is_two_triangles_facing_z() {
    let mut mesh = Mesh::new();
    let quad = [
        Vec3::new(0.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(1.0, 1.0, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
    ];
    mesh.add_face(&quad, None, None, None).unwrap();

    assert_eq!(mesh.vertex_count(), 6);
    assert_eq!(&mesh.vertices[0..3], &[0.0, 0.0, 0.0]);
    assert_eq!(&mesh.vertices[9..12], &[0.0, 0.0, 0.0]);
    for normal in mesh.normals.chunks(3) {
        assert_eq!(normal, &[0.0, 0.0, 1.0]);
    }
}

#[test]
fn deleted_instances_leave_survivors_intact() {
    let m1 = Mat4::from_translation(Vec3::X);
    let m2 = Mat4::from_rotation_translation(Quat::from_rotation_y(0.5), Vec3::Z);
    let mut instances = Instances::new();
    instances.set("a", m1);
    instances.set("b", m2);
    instances.delete(&"a");
    instances.rebuild();

    assert_eq!(instances.count(), 1);
    let slot = instances.slot(&"b").unwrap();
    assert_eq!(instances.model_at(slot), Some(m2));
    assert_eq!(Mat4::from_cols_slice(&instances.data()[..16]), m2);
}

#[test]
fn removing_detached_or_removed_calls_changes_nothing() {
    let mut ctx = context();
    let mut mesh = Mesh::new();
    mesh.add_box(Vec3::ZERO, Vec3::ONE, None).unwrap();
    let mesh = mesh.upload(&mut ctx, "box").unwrap();

    let mut scene = Scene::new();
    let opaque = Rc::new(Material::new(Pass::Opaque));
    let attached = scene.create_draw_call(mesh, Rc::clone(&opaque));
    let detached = scene.create_draw_call(mesh, opaque);
    scene.add(attached).unwrap();

    assert!(!scene.remove(detached));
    assert_eq!(scene.pass_len(&Pass::Opaque), 1);
    assert!(scene.remove(attached));
    assert!(!scene.remove(attached));
    assert_eq!(scene.pass_len(&Pass::Opaque), 0);
}

#[test]
fn view_matrix_inverts_location() {
    let mut camera = Camera::new(320, 200);
    for location in [
        Mat4::IDENTITY,
        Mat4::from_translation(Vec3::new(10.0, -3.0, 7.5)),
        Mat4::from_rotation_translation(Quat::from_euler(glam::EulerRot::XYZ, 0.3, 1.2, -0.4), Vec3::ONE),
    ] {
        camera.set_location(location);
        assert!((camera.view() * location).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((location * camera.view()).abs_diff_eq(Mat4::IDENTITY, 1e-5));
    }
}

#[test]
fn buckets_never_mix_across_insert_remove_sequences() {
    let mut ctx = context();
    let mut mesh = Mesh::new();
    mesh.add_box(Vec3::ZERO, Vec3::ONE, None).unwrap();
    let mesh = mesh.upload(&mut ctx, "box").unwrap();

    let mut scene = Scene::new();
    let opaque = Rc::new(Material::new(Pass::Opaque));
    let glass = Rc::new(Material::new(Pass::Translucent));
    let opaque_ids: Vec<_> = (0..4).map(|_| scene.create_draw_call(mesh, Rc::clone(&opaque))).collect();
    let glass_ids: Vec<_> = (0..4).map(|_| scene.create_draw_call(mesh, Rc::clone(&glass))).collect();

    // Deterministic pseudo-random add/remove walk.
    let mut state = 0x2545_f491_u32;
    for _ in 0..200 {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let ids = if state & 1 == 0 { &opaque_ids } else { &glass_ids };
        let id = ids[(state >> 1) as usize % ids.len()];
        if state & 2 == 0 {
            scene.add(id).unwrap();
        } else {
            scene.remove(id);
        }

        assert!(scene.iter_pass(&Pass::Opaque).all(|id| opaque_ids.contains(&id)));
        assert!(scene.iter_pass(&Pass::Translucent).all(|id| glass_ids.contains(&id)));
    }
}

#[test]
fn ao_kernel_is_bounded_and_monotonic() {
    let fov = 70.0_f32.to_radians();
    for count in [1, 8, 16, 32] {
        let kernel = lumen_render::ssao::kernel(0.6, count, fov);
        assert_eq!(kernel.len(), count as usize);
        let bound = 0.6 / (fov / 2.0).sin();
        let magnitudes: Vec<f32> = kernel.iter().map(|p| p.length()).collect();
        assert!(magnitudes.iter().all(|&m| m <= bound + 1e-4));
        assert!(magnitudes.windows(2).all(|w| w[1] + 1e-5 >= w[0]));
    }
}

#[test]
fn instance_keys_are_stable_handles() {
    let mut instances = Instances::new();
    let keys: Vec<_> = (0..10).map(InstanceKey::from_u64).collect();
    for (i, key) in keys.iter().enumerate() {
        instances.set(*key, Mat4::from_translation(Vec3::splat(i as f32)));
    }
    for key in keys.iter().step_by(3) {
        instances.delete(key);
    }
    instances.rebuild();
    for (i, key) in keys.iter().enumerate() {
        let expected = (i % 3 != 0).then(|| Mat4::from_translation(Vec3::splat(i as f32)));
        assert_eq!(instances.get(key), expected);
    }
}
