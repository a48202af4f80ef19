use glam::{Mat4, Vec3};
use lumen_render::Camera;

/// Keyboard and mouse driven placement of a [`Camera`].
///
/// Only position and orientation live here; projection and viewport stay
/// on the camera itself.
#[derive(Debug, Clone)]
pub struct FlyCamera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for FlyCamera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 4.0, 12.0),
            yaw: -90.0_f32.to_radians(),
            pitch: -15.0_f32.to_radians(),
            speed: 6.0,
            sensitivity: 0.003,
        }
    }
}

impl FlyCamera {
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    /// Move along the camera axes; `dir` is (right, up, forward) in units of
    /// `speed * dt`.
    pub fn travel(&mut self, dir: Vec3, dt: f32) {
        let step = self.speed * dt;
        self.position += (self.right() * dir.x + Vec3::Y * dir.y + self.forward() * dir.z) * step;
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch -= dy * self.sensitivity;
        self.pitch = self.pitch.clamp(-89.0_f32.to_radians(), 89.0_f32.to_radians());
    }

    /// Camera → world matrix.
    pub fn location(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.forward(), Vec3::Y).inverse()
    }

    pub fn apply(&self, camera: &mut Camera) {
        camera.set_location(self.location());
    }
}
