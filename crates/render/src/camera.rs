use crate::shader::Shader;
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};

/// Matrices derived from a camera's inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub projection: Mat4,
    /// World → view; the inverse of the location.
    pub view: Mat4,
    /// Rotates world-space normals into view space.
    pub view_normal: Mat3,
    /// View → world; the location itself.
    pub view_to_world: Mat4,
    pub world_to_clip: Mat4,
    pub clip_to_world: Mat4,
}

impl CameraMatrices {
    /// Recompute everything from the camera inputs. Depth maps to `0..1`.
    pub fn derive(location: Mat4, fov: f32, aspect: f32, near: f32, far: f32) -> Self {
        let projection = Mat4::perspective_rh(fov, aspect, near, far);
        let view = location.inverse();
        let world_to_clip = projection * view;
        Self {
            projection,
            view,
            view_normal: Mat3::from_mat4(location).transpose(),
            view_to_world: location,
            world_to_clip,
            clip_to_world: world_to_clip.inverse(),
        }
    }
}

/// Vertical field of view of a new camera, in radians.
pub const DEFAULT_FOV: f32 = std::f32::consts::FRAC_PI_3;

/// Perspective camera placed by a location (camera → world) matrix.
/// Derived matrices are recomputed together by every setter.
#[derive(Debug, Clone)]
pub struct Camera {
    location: Mat4,
    fov: f32,
    near: f32,
    far: f32,
    width: u32,
    height: u32,
    matrices: CameraMatrices,
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl Camera {
    pub fn new(width: u32, height: u32) -> Self {
        let mut camera = Self {
            location: Mat4::IDENTITY,
            fov: DEFAULT_FOV,
            near: 0.1,
            far: 1000.0,
            width: width.max(1),
            height: height.max(1),
            matrices: CameraMatrices::derive(Mat4::IDENTITY, 1.0, 1.0, 0.1, 1.0),
        };
        camera.recompute();
        camera
    }

    fn recompute(&mut self) {
        self.matrices = CameraMatrices::derive(self.location, self.fov, self.aspect(), self.near, self.far);
    }

    pub fn set_location(&mut self, location: Mat4) {
        self.location = location;
        self.recompute();
    }

    /// Place the camera at `eye` looking at `target`.
    pub fn look_at(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.set_location(Mat4::look_at_rh(eye, target, up).inverse());
    }

    /// Vertical field of view in radians and clip planes.
    pub fn set_projection(&mut self, fov: f32, near: f32, far: f32) {
        self.fov = fov;
        self.near = near;
        self.far = far;
        self.recompute();
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.recompute();
    }

    pub fn location(&self) -> Mat4 {
        self.location
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn matrices(&self) -> &CameraMatrices {
        &self.matrices
    }

    pub fn projection(&self) -> Mat4 {
        self.matrices.projection
    }

    pub fn view(&self) -> Mat4 {
        self.matrices.view
    }

    pub fn view_normal(&self) -> Mat3 {
        self.matrices.view_normal
    }

    pub fn view_to_world(&self) -> Mat4 {
        self.matrices.view_to_world
    }

    pub fn world_to_clip(&self) -> Mat4 {
        self.matrices.world_to_clip
    }

    pub fn clip_to_world(&self) -> Mat4 {
        self.matrices.clip_to_world
    }

    /// World-space camera position.
    pub fn position(&self) -> Vec3 {
        self.location.w_axis.truncate()
    }

    /// Unit world-space ray through normalized device coordinates
    /// (`-1..1`, y up).
    pub fn look_ray(&self, x: f32, y: f32) -> Vec3 {
        let unproject = |depth: f32| {
            let p = self.matrices.clip_to_world * Vec4::new(x, y, depth, 1.0);
            p.truncate() / p.w
        };
        (unproject(1.0) - unproject(0.0)).normalize_or_zero()
    }

    /// Unit world-space ray through a pixel (origin top-left).
    pub fn view_look_ray(&self, px: f32, py: f32) -> Vec3 {
        let x = 2.0 * px / self.width as f32 - 1.0;
        let y = 1.0 - 2.0 * py / self.height as f32;
        self.look_ray(x, y)
    }

    /// Publish the camera uniforms.
    pub fn apply(&self, shader: &mut Shader) {
        let m = &self.matrices;
        shader.set_uniform("view", m.view);
        shader.set_uniform("projection", m.projection);
        shader.set_uniform("view_projection", m.world_to_clip);
        shader.set_uniform("view_normal", m.view_normal);
        shader.set_uniform("camera_position", self.position());
        shader.set_uniform("near", self.near);
        shader.set_uniform("far", self.far);
        shader.set_uniform("fov", self.fov);
        shader.set_uniform("viewport", Vec2::new(self.width as f32, self.height as f32));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn view_is_inverse_of_location() {
        let mut camera = Camera::new(640, 480);
        let location = Mat4::from_rotation_translation(
            Quat::from_euler(glam::EulerRot::YXZ, 0.7, -0.3, 0.1),
            Vec3::new(3.0, 4.0, -2.0),
        );
        camera.set_location(location);
        assert!((camera.view() * location).abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert!((camera.clip_to_world() * camera.world_to_clip()).abs_diff_eq(Mat4::IDENTITY, 1e-3));
        assert_eq!(camera.position(), Vec3::new(3.0, 4.0, -2.0));
    }

    #[test]
    fn center_ray_looks_down_negative_z() {
        let camera = Camera::new(800, 600);
        assert!(camera.look_ray(0.0, 0.0).abs_diff_eq(Vec3::NEG_Z, 1e-4));
        assert!(camera.view_look_ray(400.0, 300.0).abs_diff_eq(Vec3::NEG_Z, 1e-4));
        let up = camera.view_look_ray(400.0, 0.0);
        assert!(up.y > 0.0);
        assert!((up.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn look_at_faces_target() {
        let mut camera = Camera::new(100, 100);
        camera.look_at(Vec3::new(0.0, 5.0, 10.0), Vec3::ZERO, Vec3::Y);
        let ray = camera.look_ray(0.0, 0.0);
        assert!(ray.abs_diff_eq(Vec3::new(0.0, -5.0, -10.0).normalize(), 1e-4));
    }

    #[test]
    fn setters_recompute_derived_matrices() {
        let mut camera = Camera::new(100, 100);
        let before = *camera.matrices();
        camera.set_viewport(200, 100);
        assert_ne!(camera.projection(), before.projection);
        assert_eq!(camera.aspect(), 2.0);
        camera.set_projection(1.0, 0.5, 50.0);
        assert_eq!(camera.matrices().projection, Mat4::perspective_rh(1.0, 2.0, 0.5, 50.0));
    }

    #[test]
    fn view_normal_rotates_into_view_space() {
        let mut camera = Camera::new(100, 100);
        camera.set_location(Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2));
        // World -X is straight ahead after turning left by 90 degrees.
        let n = camera.view_normal() * Vec3::NEG_X;
        assert!(n.abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }
}
