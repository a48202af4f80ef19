//! Shared types for the lumen rendering core.
//!
//! Holds the small value types every lumen crate agrees on (colors, opaque
//! instance keys) and the serde-backed configuration model loaded by the
//! applications.

pub mod config;
pub mod types;

pub use config::{ConfigError, DepthBiasConfig, RenderConfig, SsaoConfig, TierPreference};
pub use types::{Color, InstanceKey};
