use crate::shader::Shader;
use glam::Vec3;

/// One ambient term and one directional light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lights {
    ambient: Vec3,
    directional: Vec3,
    aim: Vec3,
}

impl Default for Lights {
    fn default() -> Self {
        Self {
            ambient: Vec3::splat(0.35),
            directional: Vec3::splat(0.65),
            aim: Vec3::new(-0.3, -1.0, -0.5).normalize(),
        }
    }
}

impl Lights {
    pub fn new(ambient: Vec3, directional: Vec3, aim: Vec3) -> Self {
        let mut lights = Self {
            ambient,
            directional,
            aim: Vec3::NEG_Y,
        };
        lights.set_directional_aim(aim);
        lights
    }

    pub fn ambient_color(&self) -> Vec3 {
        self.ambient
    }

    pub fn directional_color(&self) -> Vec3 {
        self.directional
    }

    /// Unit direction the light travels in.
    pub fn directional_aim(&self) -> Vec3 {
        self.aim
    }

    pub fn set_ambient_color(&mut self, rgb: Vec3) {
        self.ambient = rgb;
    }

    pub fn set_directional_color(&mut self, rgb: Vec3) {
        self.directional = rgb;
    }

    /// Normalised on the way in; a zero vector keeps the previous aim.
    pub fn set_directional_aim(&mut self, aim: Vec3) {
        self.aim = aim.try_normalize().unwrap_or(self.aim);
    }

    pub fn apply(&self, shader: &mut Shader) {
        shader.set_uniform("ambient_color", self.ambient);
        shader.set_uniform("directional_color", self.directional);
        shader.set_uniform("directional_aim", self.aim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aim_is_normalised() {
        let mut lights = Lights::default();
        lights.set_directional_aim(Vec3::new(0.0, -4.0, 0.0));
        assert_eq!(lights.directional_aim(), Vec3::NEG_Y);
    }

    #[test]
    fn zero_aim_is_ignored() {
        let mut lights = Lights::new(Vec3::ZERO, Vec3::ONE, Vec3::X);
        lights.set_directional_aim(Vec3::ZERO);
        assert_eq!(lights.directional_aim(), Vec3::X);
    }
}
