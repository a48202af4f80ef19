//! Lumen rendering core.
//!
//! Resource management and frame orchestration over a backend-agnostic GPU
//! interface: textures and render targets, reflected shader programs,
//! meshes, materials, single and instanced draw calls grouped into pass
//! buckets, a perspective camera with lights, and a pipeline that draws
//! forward or deferred with screen-space ambient occlusion depending on the
//! host's capability tier.
//!
//! # Invariants
//! - All GPU work goes through the [`RenderContext`] passed to each call;
//!   the core keeps no global state.
//! - Everything runs on one render thread. The only cross-thread input is
//!   decoded image data arriving over a channel.
//! - Resources are released explicitly with `destroy(ctx)`.

pub mod camera;
pub mod context;
pub mod draw_call;
pub mod error;
pub mod gpu;
pub mod instances;
pub mod lights;
pub mod material;
pub mod mesh;
pub mod pipeline;
pub mod scene;
pub mod shader;
pub mod ssao;
pub mod target;
pub mod texture;
pub mod transform;

pub use camera::Camera;
pub use context::{FrameStats, RenderContext};
pub use draw_call::{DrawCall, InstancedDrawCall};
pub use error::RenderError;
pub use gpu::{Capabilities, GpuBackend, GpuError, RecordingGpu, Support};
pub use instances::Instances;
pub use lights::Lights;
pub use material::{Material, Pass};
pub use mesh::{GpuMesh, Mesh};
pub use pipeline::Pipeline;
pub use scene::{DrawCallId, PassStats, Scene};
pub use shader::{ProgramKind, Shader, ShaderOptions, ShaderSource, ShaderVariant};
pub use target::{AutoResize, RenderTarget, TargetConfig};
pub use texture::{DecodedImage, ImageSender, Placeholder, Sampled, Texture};
pub use transform::Transform;

pub fn crate_info() -> &'static str {
    "lumen-render v0.1.0"
}
