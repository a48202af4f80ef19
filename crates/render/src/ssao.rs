//! Screen-space ambient occlusion: kernel generation, the dither rotation
//! table, and the CPU reference of the occlusion shader maths.
//!
//! The kernel is a golden-angle spiral of 2D offsets whose radius is
//! `radius / sin(fov / 2)`, so the world-space footprint does not change
//! with the field of view. Each pixel rotates the kernel by an entry of a
//! small ordered-dither table to trade banding for noise.
//!
//! # Invariants
//! - `kernel(r, n, fov)` has exactly `n` points, magnitudes non-decreasing
//!   in index and bounded by `r / sin(fov / 2)`.
//! - [`Occlusion`] regenerates its kernel table whenever the field of view
//!   it was built for differs from the camera's.

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::shader::Shader;
use crate::texture::{Sampled, TextureTable};
use glam::{Vec2, Vec3, Vec4};
use lumen_common::SsaoConfig;
use std::f32::consts::{PI, TAU};

/// Sampler unit of the G-buffer normal attachment.
pub const NORMAL_UNIT: u32 = 0;
/// Sampler unit of the G-buffer position attachment.
pub const POSITION_UNIT: u32 = 1;
/// Sampler unit of the kernel table.
pub const KERNEL_UNIT: u32 = 2;
/// Sampler unit of the rotation table.
pub const ROTATION_UNIT: u32 = 3;

/// Angle between consecutive spiral points, `π(3 − √5)`.
pub fn golden_angle() -> f32 {
    PI * (3.0 - 5.0_f32.sqrt())
}

/// Kernel radius for a camera field of view (radians).
pub fn kernel_radius(radius: f32, fov: f32) -> f32 {
    radius / (fov * 0.5).sin()
}

/// `count` spiral offsets: point `i` has magnitude
/// `kernel_radius · sqrt((i + 1) / count)` and angle `i · golden_angle`.
pub fn kernel(radius: f32, count: u32, fov: f32) -> Vec<Vec2> {
    let scale = kernel_radius(radius, fov);
    let angle = golden_angle();
    (0..count)
        .map(|i| {
            let magnitude = scale * ((i + 1) as f32 / count as f32).sqrt();
            Vec2::from_angle(i as f32 * angle) * magnitude
        })
        .collect()
}

/// Rank of cell `(x, y)` in an ordered-dither tile of side `side`
/// (a Bayer matrix when `side` is a power of two, row-major otherwise).
pub fn dither_rank(x: u32, y: u32, side: u32) -> u32 {
    if !side.is_power_of_two() {
        return x + y * side;
    }
    let bits = side.trailing_zeros();
    let xor = x ^ y;
    let mut rank = 0;
    for bit in 0..bits {
        rank = (rank << 2) | (((xor >> bit) & 1) << 1) | ((y >> bit) & 1);
    }
    rank
}

/// One 2×2 rotation per tile cell, stored column-major as
/// `(cos, sin, −sin, cos)` at index `x + y · side`.
pub fn rotations(entries: u32) -> Vec<Vec4> {
    let side = tile_side(entries);
    let count = side * side;
    let mut table = vec![Vec4::ZERO; count as usize];
    for y in 0..side {
        for x in 0..side {
            let angle = TAU * dither_rank(x, y, side) as f32 / count as f32;
            let (sin, cos) = angle.sin_cos();
            table[(x + y * side) as usize] = Vec4::new(cos, sin, -sin, cos);
        }
    }
    table
}

/// Side of the square tile holding `entries` rotations.
pub fn tile_side(entries: u32) -> u32 {
    ((entries.max(1) as f32).sqrt().round() as u32).max(1)
}

/// Occlusion contributed by one occluder offset `v` from a surface with
/// unit `normal`.
pub fn occlusion(v: Vec3, normal: Vec3, bias: f32, epsilon: f32) -> f32 {
    (v.dot(normal) + bias).max(0.0) / (v.dot(v) + epsilon)
}

/// Final ambient term from the summed occlusion of `count` samples.
pub fn ambient(sum: f32, count: u32, density: f32, falloff: f32) -> f32 {
    let count = count.max(1) as f32;
    (1.0 - density * sum / count).clamp(0.0, 1.0).powf(falloff)
}

/// GPU tables and uniforms for the occlusion program.
#[derive(Debug)]
pub struct Occlusion {
    config: SsaoConfig,
    samples: u32,
    fov: f32,
    kernel: TextureTable,
    rotations: TextureTable,
}

impl Occlusion {
    /// Build the tables for `fov`, clamping the sample count to `max_samples`.
    pub fn new(ctx: &mut RenderContext, config: SsaoConfig, max_samples: u32, fov: f32) -> Result<Self, RenderError> {
        let samples = config.samples.clamp(1, max_samples.max(1));
        if samples < config.samples {
            tracing::warn!(requested = config.samples, samples, "occlusion sample count clamped");
        }
        let kernel = TextureTable::new(ctx, "ao_kernel", &kernel_table(config.radius, samples, fov))?;
        let rotations = TextureTable::new(ctx, "ao_rotations", &rotations(config.dither_size))?;
        Ok(Self {
            config,
            samples,
            fov,
            kernel,
            rotations,
        })
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Field of view the kernel was generated for.
    pub fn fov(&self) -> f32 {
        self.fov
    }

    /// Regenerate the kernel if `fov` changed. Returns whether it did.
    pub fn update_fov(&mut self, ctx: &mut RenderContext, fov: f32) -> Result<bool, RenderError> {
        if fov == self.fov {
            return Ok(false);
        }
        self.kernel
            .update(ctx, &kernel_table(self.config.radius, self.samples, fov))?;
        tracing::debug!(fov, "occlusion kernel regenerated");
        self.fov = fov;
        Ok(true)
    }

    /// Bind the tables and tuning uniforms.
    pub fn apply(&self, ctx: &mut RenderContext, shader: &mut Shader) {
        self.kernel.apply(ctx, shader, KERNEL_UNIT);
        self.rotations.apply(ctx, shader, ROTATION_UNIT);
        shader.set_uniform("ao_samples", self.samples as i32);
        shader.set_uniform("ao_bias", self.config.bias);
        shader.set_uniform("ao_epsilon", self.config.epsilon);
        shader.set_uniform("ao_density", self.config.density);
        shader.set_uniform("ao_falloff", self.config.falloff);
        shader.set_uniform("dither_side", tile_side(self.config.dither_size) as i32);
    }

    pub fn destroy(&self, ctx: &mut RenderContext) {
        self.kernel.destroy(ctx);
        self.rotations.destroy(ctx);
    }
}

fn kernel_table(radius: f32, samples: u32, fov: f32) -> Vec<Vec4> {
    kernel(radius, samples, fov)
        .into_iter()
        .map(|p| Vec4::new(p.x, p.y, 0.0, 0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::RecordingGpu;
    use lumen_common::DepthBiasConfig;

    #[test]
    fn kernel_has_count_points_within_bound() {
        for (radius, count, fov) in [(0.6, 16, 1.0), (2.0, 7, 0.4), (1.0, 32, 2.5)] {
            let points = kernel(radius, count, fov);
            assert_eq!(points.len(), count as usize);
            let bound = radius / (fov / 2.0).sin();
            let mut previous = 0.0;
            for p in &points {
                let m = p.length();
                assert!(m <= bound + 1e-4, "{m} > {bound}");
                assert!(m + 1e-5 >= previous);
                previous = m;
            }
            assert!((previous - bound).abs() < 1e-4);
        }
    }

    #[test]
    fn kernel_follows_golden_spiral() {
        let points = kernel(1.0, 4, std::f32::consts::FRAC_PI_2);
        assert!(points[0].y.abs() < 1e-6);
        let turn = points[1].to_angle() - points[0].to_angle();
        assert!((turn - golden_angle()).abs() < 1e-4 || (turn + TAU - golden_angle()).abs() < 1e-4);
    }

    #[test]
    fn bayer_ranks_cover_the_tile() {
        let mut ranks: Vec<_> = (0..4).flat_map(|y| (0..4).map(move |x| dither_rank(x, y, 4))).collect();
        ranks.sort();
        assert_eq!(ranks, (0..16).collect::<Vec<_>>());
        assert_eq!(
            [dither_rank(0, 0, 2), dither_rank(1, 0, 2), dither_rank(0, 1, 2), dither_rank(1, 1, 2)],
            [0, 2, 3, 1]
        );
    }

    #[test]
    fn rotations_are_orthonormal() {
        let table = rotations(4);
        assert_eq!(table.len(), 4);
        for r in table {
            assert!((r.x * r.x + r.y * r.y - 1.0).abs() < 1e-5);
            assert_eq!((r.z, r.w), (-r.y, r.x));
        }
    }

    #[test]
    fn occlusion_ignores_samples_behind_surface() {
        assert_eq!(occlusion(Vec3::new(0.0, -1.0, 0.0), Vec3::Y, 0.0, 0.05), 0.0);
        let close = occlusion(Vec3::new(0.1, 0.2, 0.0), Vec3::Y, 0.0, 0.05);
        let far = occlusion(Vec3::new(1.0, 2.0, 0.0), Vec3::Y, 0.0, 0.05);
        assert!(close > far);
    }

    #[test]
    fn ambient_is_clamped() {
        assert_eq!(ambient(0.0, 16, 1.0, 1.5), 1.0);
        assert_eq!(ambient(100.0, 16, 1.0, 1.5), 0.0);
        let half = ambient(8.0, 16, 1.0, 1.0);
        assert!((half - 0.5).abs() < 1e-6);
    }

    #[test]
    fn fov_change_regenerates_kernel() {
        let mut ctx = RenderContext::new(RecordingGpu::new(8, 8), DepthBiasConfig::default());
        let config = SsaoConfig {
            samples: 64,
            ..SsaoConfig::default()
        };
        let mut ao = Occlusion::new(&mut ctx, config, 16, 1.0).unwrap();
        assert_eq!(ao.samples(), 16);
        assert!(!ao.update_fov(&mut ctx, 1.0).unwrap());
        assert!(ao.update_fov(&mut ctx, 0.8).unwrap());
        assert_eq!(ao.fov(), 0.8);
        let gpu = ctx.backend::<RecordingGpu>().unwrap();
        assert_eq!(gpu.texture_uploads(ao.kernel.texture_id()), Some(2));
    }
}
