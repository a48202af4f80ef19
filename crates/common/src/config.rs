//! Render configuration loaded by the applications.
//!
//! Every field has a default so a partial file (or no file at all) yields a
//! working renderer. Files are YAML (`.yaml`/`.yml`) or JSON (`.json`),
//! selected by extension.

use crate::types::Color;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading or validating a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config extension: {0:?}")]
    UnsupportedFormat(Option<String>),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Which pipeline the orchestrator should prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierPreference {
    /// Highest tier the host supports.
    #[default]
    Auto,
    /// Forward pipeline even on capable hosts.
    Forward,
    /// Deferred + SSAO; degrades to forward if the host cannot do it.
    Deferred,
}

/// Screen-space ambient occlusion tuning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SsaoConfig {
    /// World-space kernel radius.
    pub radius: f32,
    /// Kernel sample count.
    pub samples: u32,
    pub density: f32,
    pub bias: f32,
    /// Exponent applied to the final occlusion term.
    pub falloff: f32,
    pub epsilon: f32,
    /// AO buffer size relative to the display.
    pub resolution_scale: f32,
    /// Rotation entries in the dither table (a square count: 4 = 2x2 tile).
    pub dither_size: u32,
}

impl Default for SsaoConfig {
    fn default() -> Self {
        Self {
            radius: 0.6,
            samples: 16,
            density: 1.0,
            bias: -0.05,
            falloff: 1.5,
            epsilon: 0.05,
            resolution_scale: 0.5,
            dither_size: 4,
        }
    }
}

/// Polygon offset applied by render targets and translucent shaders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthBiasConfig {
    pub constant: i32,
    pub slope_scale: f32,
    pub translucent_constant: i32,
    pub translucent_slope_scale: f32,
}

impl Default for DepthBiasConfig {
    fn default() -> Self {
        Self {
            constant: 1,
            slope_scale: 1.0,
            translucent_constant: -1,
            translucent_slope_scale: -1.0,
        }
    }
}

/// Top-level renderer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Clear color of the display and geometry buffer.
    pub background: Color,
    pub tier: TierPreference,
    /// Cap on the capability tier, regardless of what the host reports.
    pub max_tier: Option<u8>,
    pub ssao: SsaoConfig,
    pub depth_bias: DepthBiasConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            background: Color::rgb(0.55, 0.7, 0.9),
            tier: TierPreference::Auto,
            max_tier: None,
            ssao: SsaoConfig::default(),
            depth_bias: DepthBiasConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = match extension(path).as_deref() {
            Some("yaml" | "yml") => serde_yaml::from_str(&text)?,
            Some("json") => serde_json::from_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.map(str::to_owned))),
        };
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, format chosen by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let text = match extension(path).as_deref() {
            Some("yaml" | "yml") => serde_yaml::to_string(self)?,
            Some("json") => serde_json::to_string_pretty(self)?,
            other => return Err(ConfigError::UnsupportedFormat(other.map(str::to_owned))),
        };
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ssao = &self.ssao;
        if ssao.radius.is_nan() || ssao.radius <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "ssao.radius",
                reason: format!("must be positive, got {}", ssao.radius),
            });
        }
        if ssao.samples == 0 {
            return Err(ConfigError::Invalid {
                field: "ssao.samples",
                reason: "must be at least 1".into(),
            });
        }
        if ssao.resolution_scale.is_nan()
            || ssao.resolution_scale <= 0.0
            || ssao.resolution_scale > 1.0
        {
            return Err(ConfigError::Invalid {
                field: "ssao.resolution_scale",
                reason: format!("must be in (0, 1], got {}", ssao.resolution_scale),
            });
        }
        if ssao.epsilon <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "ssao.epsilon",
                reason: format!("must be positive, got {}", ssao.epsilon),
            });
        }
        let side = (ssao.dither_size as f32).sqrt() as u32;
        if ssao.dither_size == 0 || side * side != ssao.dither_size {
            return Err(ConfigError::Invalid {
                field: "ssao.dither_size",
                reason: format!("must be a non-zero square, got {}", ssao.dither_size),
            });
        }
        if let Some(tier) = self.max_tier {
            if tier > 2 {
                return Err(ConfigError::Invalid {
                    field: "max_tier",
                    reason: format!("tiers are 0..=2, got {tier}"),
                });
            }
        }
        Ok(())
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RenderConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: RenderConfig = serde_yaml::from_str("ssao:\n  samples: 8\ntier: forward\n").unwrap();
        assert_eq!(config.ssao.samples, 8);
        assert_eq!(config.ssao.radius, SsaoConfig::default().radius);
        assert_eq!(config.tier, TierPreference::Forward);
        assert_eq!(config.max_tier, None);
    }

    #[test]
    fn rejects_zero_samples() {
        let mut config = RenderConfig::default();
        config.ssao.samples = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "ssao.samples", .. })
        ));
    }

    #[test]
    fn rejects_non_square_dither() {
        let mut config = RenderConfig::default();
        config.ssao.dither_size = 6;
        assert!(config.validate().is_err());
        config.ssao.dither_size = 16;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_tier() {
        let config = RenderConfig {
            max_tier: Some(3),
            ..RenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_load_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.yaml");
        let config = RenderConfig {
            tier: TierPreference::Deferred,
            max_tier: Some(1),
            ..RenderConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(RenderConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn save_and_load_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.json");
        let mut config = RenderConfig::default();
        config.ssao.radius = 1.25;
        config.save(&path).unwrap();
        assert_eq!(RenderConfig::load(&path).unwrap().ssao.radius, 1.25);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("render.toml");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            RenderConfig::load(&path),
            Err(ConfigError::UnsupportedFormat(Some(ext))) if ext == "toml"
        ));
    }
}
