//! wgpu backend for the lumen rendering core.
//!
//! [`WgpuGpu`] implements [`lumen_render::GpuBackend`] on top of a wgpu
//! device. Programs are WGSL; their bind group layouts come from the same
//! naga reflection the core uses, and render pipelines are built lazily per
//! program, fixed-function state, vertex layout and target formats.
//!
//! # Invariants
//! - Draws are recorded and encoded into one command buffer at
//!   `end_frame`; buffer and texture writes issued during a frame are
//!   visible to every draw of that frame.
//! - wgpu validation errors are captured with error scopes and returned as
//!   `GpuError`, never raised through the device's uncaptured handler.
//! - A pipeline is never rebuilt for a key already in the cache.

mod convert;
mod frame;
mod gpu;
mod layout;
mod pipeline;

pub use gpu::{request_device, WgpuGpu, DISPLAY_DEPTH};
