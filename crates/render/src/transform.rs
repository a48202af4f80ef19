use crate::camera::Camera;
use crate::shader::Shader;
use glam::{Mat3, Mat4};

/// Inverse-transpose of the upper 3×3; identity when singular.
pub fn normal_matrix(model: Mat4) -> Mat3 {
    let m = Mat3::from_mat4(model);
    let det = m.determinant();
    if det.abs() <= f32::EPSILON || !det.is_finite() {
        return Mat3::IDENTITY;
    }
    m.inverse().transpose()
}

/// A model matrix and its lazily derived normal matrix.
#[derive(Debug, Clone)]
pub struct Transform {
    matrix: Mat4,
    normal: Mat3,
    dirty: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

impl Transform {
    pub fn new(matrix: Mat4) -> Self {
        Self {
            matrix,
            normal: Mat3::IDENTITY,
            dirty: true,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn set(&mut self, matrix: Mat4) {
        self.matrix = matrix;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn normal_matrix(&mut self) -> Mat3 {
        if self.dirty {
            self.normal = normal_matrix(self.matrix);
            self.dirty = false;
        }
        self.normal
    }

    /// Publish the model uniforms and their products with the camera.
    pub fn apply(&mut self, shader: &mut Shader, camera: &Camera) {
        let normal = self.normal_matrix();
        apply_model(shader, camera, self.matrix, normal);
    }
}

pub(crate) fn apply_model(shader: &mut Shader, camera: &Camera, model: Mat4, normal: Mat3) {
    shader.set_uniform("model", model);
    shader.set_uniform("normal_matrix", normal);
    shader.set_uniform("model_view", camera.view() * model);
    shader.set_uniform("model_view_projection", camera.world_to_clip() * model);
    shader.set_uniform("model_view_normal", camera.view_normal() * normal);
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn normal_matrix_is_recomputed_only_after_set() {
        let mut transform = Transform::new(Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0)));
        assert!(transform.is_dirty());
        let n = transform.normal_matrix();
        assert!(!transform.is_dirty());
        assert!((n * Vec3::X).abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));

        transform.set(Mat4::IDENTITY);
        assert!(transform.is_dirty());
        assert_eq!(transform.normal_matrix(), Mat3::IDENTITY);
    }

    #[test]
    fn singular_model_falls_back_to_identity() {
        assert_eq!(normal_matrix(Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0))), Mat3::IDENTITY);
    }
}
