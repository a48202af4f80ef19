//! CPU-side triangle meshes and their GPU upload.
//!
//! # Invariants
//! - `vertices.len() == normals.len()`, both 3 floats per vertex.
//! - `colors` (4 per vertex) and `coordinates` (2 per vertex) are either
//!   empty or cover every vertex. A face that supplies one of them on a mesh
//!   that had none backfills the earlier vertices (white / zero).
//! - A [`GpuMesh`] is a snapshot; later CPU edits need a new upload.

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::gpu::BufferId;
use crate::shader::Shader;
use glam::{Mat3, Mat4, Vec2, Vec3};
use lumen_common::Color;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub normals: Vec<f32>,
    pub colors: Vec<f32>,
    pub coordinates: Vec<f32>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Append a planar polygon given as a fan of at least three points,
    /// triangulated around the first point. Without explicit normals each
    /// triangle gets the flat normal of its two edges from the first point.
    pub fn add_face(
        &mut self,
        vertices: &[Vec3],
        colors: Option<&[Color]>,
        coordinates: Option<&[Vec2]>,
        normals: Option<&[Vec3]>,
    ) -> Result<(), RenderError> {
        let points = vertices.len();
        if points < 3 {
            return Err(RenderError::InvalidFace(points));
        }
        check_len("colors", points, colors.map(<[_]>::len))?;
        check_len("coordinates", points, coordinates.map(<[_]>::len))?;
        check_len("normals", points, normals.map(<[_]>::len))?;

        let before = self.vertex_count();
        let added = (points - 2) * 3;
        if colors.is_some() && self.colors.is_empty() && before > 0 {
            self.colors.extend(Color::WHITE.to_array().repeat(before));
        }
        if coordinates.is_some() && self.coordinates.is_empty() && before > 0 {
            self.coordinates.resize(before * 2, 0.0);
        }

        for i in 1..points - 1 {
            let corners = [0, i, i + 1];
            let flat = (vertices[i] - vertices[0])
                .cross(vertices[i + 1] - vertices[0])
                .normalize_or_zero();
            for c in corners {
                self.vertices.extend(vertices[c].to_array());
                let normal = normals.map_or(flat, |n| n[c]);
                self.normals.extend(normal.to_array());
                if let Some(colors) = colors {
                    self.colors.extend(colors[c].to_array());
                }
                if let Some(coordinates) = coordinates {
                    self.coordinates.extend(coordinates[c].to_array());
                }
            }
        }

        if colors.is_none() && !self.colors.is_empty() {
            self.colors.extend(Color::WHITE.to_array().repeat(added));
        }
        if coordinates.is_none() && !self.coordinates.is_empty() {
            self.coordinates.resize(self.coordinates.len() + added * 2, 0.0);
        }
        Ok(())
    }

    /// Append a quad from four CCW corners with unit texture coordinates.
    pub fn add_quad(&mut self, corners: [Vec3; 4], color: Option<Color>) -> Result<(), RenderError> {
        let uv = [Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y];
        let colors = color.map(|c| [c; 4]);
        self.add_face(&corners, colors.as_ref().map(|c| c.as_slice()), Some(&uv[..]), None)
    }

    /// Append an axis-aligned box with outward faces.
    pub fn add_box(&mut self, center: Vec3, size: Vec3, color: Option<Color>) -> Result<(), RenderError> {
        let h = size * 0.5;
        let p = |x: f32, y: f32, z: f32| center + Vec3::new(x * h.x, y * h.y, z * h.z);
        #[rustfmt::skip]
        let faces = [
            [p(-1.0, -1.0,  1.0), p( 1.0, -1.0,  1.0), p( 1.0,  1.0,  1.0), p(-1.0,  1.0,  1.0)], // +Z
            [p( 1.0, -1.0, -1.0), p(-1.0, -1.0, -1.0), p(-1.0,  1.0, -1.0), p( 1.0,  1.0, -1.0)], // -Z
            [p( 1.0, -1.0,  1.0), p( 1.0, -1.0, -1.0), p( 1.0,  1.0, -1.0), p( 1.0,  1.0,  1.0)], // +X
            [p(-1.0, -1.0, -1.0), p(-1.0, -1.0,  1.0), p(-1.0,  1.0,  1.0), p(-1.0,  1.0, -1.0)], // -X
            [p(-1.0,  1.0,  1.0), p( 1.0,  1.0,  1.0), p( 1.0,  1.0, -1.0), p(-1.0,  1.0, -1.0)], // +Y
            [p(-1.0, -1.0, -1.0), p( 1.0, -1.0, -1.0), p( 1.0, -1.0,  1.0), p(-1.0, -1.0,  1.0)], // -Y
        ];
        for corners in faces {
            self.add_quad(corners, color)?;
        }
        Ok(())
    }

    /// Append every triangle of `other`.
    pub fn merge(&mut self, other: &Mesh) {
        let (before, added) = (self.vertex_count(), other.vertex_count());
        let merge_optional = |dst: &mut Vec<f32>, src: &[f32], fill: &[f32]| {
            if dst.is_empty() && src.is_empty() {
                return;
            }
            if dst.is_empty() {
                dst.extend(fill.repeat(before));
            }
            if src.is_empty() {
                dst.extend(fill.repeat(added));
            } else {
                dst.extend_from_slice(src);
            }
        };
        self.vertices.extend_from_slice(&other.vertices);
        self.normals.extend_from_slice(&other.normals);
        merge_optional(&mut self.colors, &other.colors, &Color::WHITE.to_array()[..]);
        merge_optional(&mut self.coordinates, &other.coordinates, &[0.0, 0.0][..]);
    }

    /// Transform vertices by `m` and normals by its normal matrix,
    /// renormalising them.
    pub fn transform(&mut self, m: Mat4) {
        for v in self.vertices.chunks_exact_mut(3) {
            let p = m.transform_point3(Vec3::from_slice(v));
            v.copy_from_slice(&p.to_array());
        }
        let normal_matrix = Mat3::from_mat4(m).inverse().transpose();
        for n in self.normals.chunks_exact_mut(3) {
            let t = (normal_matrix * Vec3::from_slice(n)).normalize_or_zero();
            n.copy_from_slice(&t.to_array());
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.vertices.len() % 3 != 0 {
            return Err(RenderError::InvalidMesh(format!(
                "{} vertex floats is not a multiple of 3",
                self.vertices.len()
            )));
        }
        let count = self.vertex_count();
        if self.normals.len() != self.vertices.len() {
            return Err(RenderError::InvalidMesh(format!(
                "{} normal floats for {count} vertices",
                self.normals.len()
            )));
        }
        if !self.colors.is_empty() && self.colors.len() != count * 4 {
            return Err(RenderError::InvalidMesh(format!(
                "{} color floats for {count} vertices",
                self.colors.len()
            )));
        }
        if !self.coordinates.is_empty() && self.coordinates.len() != count * 2 {
            return Err(RenderError::InvalidMesh(format!(
                "{} coordinate floats for {count} vertices",
                self.coordinates.len()
            )));
        }
        Ok(())
    }

    /// Upload to GPU buffers. Missing colors upload as white and missing
    /// coordinates as zero so every standard input is fed.
    pub fn upload(&self, ctx: &mut RenderContext, label: &str) -> Result<GpuMesh, RenderError> {
        self.validate()?;
        let count = self.vertex_count();
        let colors = if self.colors.is_empty() {
            Color::WHITE.to_array().repeat(count)
        } else {
            self.colors.clone()
        };
        let coordinates = if self.coordinates.is_empty() {
            vec![0.0; count * 2]
        } else {
            self.coordinates.clone()
        };

        let gpu = ctx.gpu_mut();
        let position = gpu.create_buffer(&format!("{label}.position"), bytemuck::cast_slice(&self.vertices))?;
        let normal = gpu.create_buffer(&format!("{label}.normal"), bytemuck::cast_slice(&self.normals))?;
        let color = gpu.create_buffer(&format!("{label}.color"), bytemuck::cast_slice(&colors))?;
        let coordinate = gpu.create_buffer(&format!("{label}.coordinate"), bytemuck::cast_slice(&coordinates))?;
        Ok(GpuMesh {
            position,
            normal,
            color,
            coordinate,
            draw_count: count as u32,
        })
    }
}

fn check_len(name: &'static str, points: usize, len: Option<usize>) -> Result<(), RenderError> {
    match len {
        Some(actual) if actual != points => Err(RenderError::FaceAttribute { name, points, actual }),
        _ => Ok(()),
    }
}

/// GPU-resident mesh buffers and the vertex count snapshotted at upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub position: BufferId,
    pub normal: BufferId,
    pub color: BufferId,
    pub coordinate: BufferId,
    pub draw_count: u32,
}

impl GpuMesh {
    /// Feed the standard vertex inputs of `shader`.
    pub fn bind(&self, shader: &mut Shader) {
        shader.set_attribute("position", self.position);
        shader.set_attribute("normal", self.normal);
        shader.set_attribute("color", self.color);
        shader.set_attribute("coordinate", self.coordinate);
    }

    pub fn destroy(&self, ctx: &mut RenderContext) {
        let gpu = ctx.gpu_mut();
        for buffer in [self.position, self.normal, self.color, self.coordinate] {
            gpu.destroy_buffer(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingGpu;
    use lumen_common::DepthBiasConfig;

    fn unit_quad() -> [Vec3; 4] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn quad_fans_into_two_triangles_sharing_origin() {
        let mut mesh = Mesh::new();
        mesh.add_face(&unit_quad(), None, None, None).unwrap();
        assert_eq!(mesh.vertex_count(), 6);
        assert_eq!(&mesh.vertices[0..3], &[0.0, 0.0, 0.0]);
        assert_eq!(&mesh.vertices[9..12], &[0.0, 0.0, 0.0]);
        for n in mesh.normals.chunks_exact(3) {
            assert_eq!(n, &[0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn non_planar_fan_gets_per_triangle_normals() {
        let mut mesh = Mesh::new();
        let bent = [
            Vec3::ZERO,
            Vec3::X,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
        ];
        mesh.add_face(&bent, None, None, None).unwrap();
        assert_ne!(&mesh.normals[0..3], &mesh.normals[9..12]);
    }

    #[test]
    fn face_attributes_cover_every_vertex() {
        let mut mesh = Mesh::new();
        mesh.add_face(&unit_quad(), None, None, None).unwrap();
        let red = [Color::rgb(1.0, 0.0, 0.0); 3];
        let tri = [Vec3::ZERO, Vec3::X, Vec3::Y];
        mesh.add_face(&tri, Some(&red[..]), None, None).unwrap();
        mesh.add_face(&tri, None, None, None).unwrap();

        assert_eq!(mesh.vertices.len(), mesh.normals.len());
        assert_eq!(mesh.colors.len(), mesh.vertex_count() * 4);
        // Backfilled white, then supplied red, then filled white.
        assert_eq!(&mesh.colors[0..4], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&mesh.colors[24..28], &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(&mesh.colors[36..40], &[1.0, 1.0, 1.0, 1.0]);
        assert!(mesh.coordinates.is_empty());
        mesh.validate().unwrap();
    }

    #[test]
    fn degenerate_and_mismatched_faces_are_rejected() {
        let mut mesh = Mesh::new();
        assert!(matches!(
            mesh.add_face(&[Vec3::ZERO, Vec3::X], None, None, None),
            Err(RenderError::InvalidFace(2))
        ));
        let uv = [Vec2::ZERO; 2];
        assert!(matches!(
            mesh.add_face(&unit_quad(), None, Some(&uv[..]), None),
            Err(RenderError::FaceAttribute { name: "coordinates", .. })
        ));
        assert!(mesh.is_empty());
    }

    #[test]
    fn transform_moves_vertices_and_renormalises_normals() {
        let mut mesh = Mesh::new();
        mesh.add_face(&unit_quad(), None, None, None).unwrap();
        mesh.transform(Mat4::from_scale_rotation_translation(
            Vec3::splat(3.0),
            glam::Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
            Vec3::new(0.0, 0.0, 5.0),
        ));
        let v2 = Vec3::from_slice(&mesh.vertices[6..9]);
        assert!(v2.abs_diff_eq(Vec3::new(3.0, 0.0, 8.0), 1e-5));
        let n = Vec3::from_slice(&mesh.normals[0..3]);
        assert!(n.abs_diff_eq(Vec3::new(0.0, -1.0, 0.0), 1e-5));
    }

    #[test]
    fn box_has_outward_normals() {
        let mut mesh = Mesh::new();
        mesh.add_box(Vec3::ZERO, Vec3::ONE, None).unwrap();
        assert_eq!(mesh.vertex_count(), 36);
        for (v, n) in mesh.vertices.chunks_exact(3).zip(mesh.normals.chunks_exact(3)) {
            assert!(Vec3::from_slice(v).dot(Vec3::from_slice(n)) > 0.0);
        }
        assert_eq!(mesh.coordinates.len(), 36 * 2);
    }

    #[test]
    fn merge_keeps_optional_arrays_aligned() {
        let mut a = Mesh::new();
        a.add_face(&unit_quad(), None, None, None).unwrap();
        let mut b = Mesh::new();
        b.add_quad(unit_quad(), Some(Color::BLACK)).unwrap();
        a.merge(&b);
        assert_eq!(a.vertex_count(), 12);
        assert_eq!(a.colors.len(), 48);
        assert_eq!(a.coordinates.len(), 24);
        a.validate().unwrap();
    }

    #[test]
    fn upload_snapshots_draw_count() {
        let mut ctx = RenderContext::new(RecordingGpu::new(8, 8), DepthBiasConfig::default());
        let mut mesh = Mesh::new();
        mesh.add_face(&unit_quad(), None, None, None).unwrap();
        let gpu_mesh = mesh.upload(&mut ctx, "quad").unwrap();
        mesh.add_face(&unit_quad(), None, None, None).unwrap();
        assert_eq!(gpu_mesh.draw_count, 6);

        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        assert_eq!(gpu.live_buffers(), 4);
        assert_eq!(gpu.buffer_contents(gpu_mesh.color).unwrap().len(), 6 * 16);
        gpu_mesh.destroy(&mut ctx);
        assert_eq!(ctx.backend::<RecordingGpu>().unwrap().live_buffers(), 0);
    }
}
