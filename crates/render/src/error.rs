use crate::gpu::GpuError;
use crate::scene::DrawCallId;

/// Errors from the rendering core.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("a face needs at least 3 points, got {0}")]
    InvalidFace(usize),
    #[error("face {name} has {actual} entries for {points} points")]
    FaceAttribute {
        name: &'static str,
        points: usize,
        actual: usize,
    },
    #[error("inconsistent mesh: {0}")]
    InvalidMesh(String),
    #[error("image is {actual} bytes, expected {expected} for {width}x{height} RGBA8")]
    ImageSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("texture table needs at least one entry")]
    EmptyTable,
    #[error("unknown draw call {0:?}")]
    UnknownDrawCall(DrawCallId),
}
