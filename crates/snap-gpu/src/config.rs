//! Helper configuration.
//!
//! # Environment Variables
//!
//! - `SNAP_SCALER_CACHE` - Number of scalers kept per helper
//! - `SNAP_DISABLE_MRT` - Never use multi-render-target YUV ("1" or "true")
//! - `SNAP_QUALITY` - Default scaler quality (`fast`, `good`, `best`)

use std::env;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::scaler::ScalerQuality;

/// Default number of cached scalers.
pub const DEFAULT_SCALER_CACHE: usize = 8;

/// Tunables for [`GlHelper`](crate::GlHelper).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Scalers kept for crop/scale readbacks. Each holds its intermediates.
    pub scaler_cache_capacity: usize,
    /// Flip crop/scale readbacks so a bottom-up surface reads back top-down.
    pub flip_readback: bool,
    /// Allow merged Y/U/V draws when the device supports three draw buffers.
    pub allow_mrt: bool,
    /// Quality used when a request does not name one.
    pub default_quality: ScalerQuality,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            scaler_cache_capacity: DEFAULT_SCALER_CACHE,
            flip_readback: true,
            allow_mrt: true,
            default_quality: ScalerQuality::Good,
        }
    }
}

impl HelperConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Applies `SNAP_*` overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(capacity) = env_usize("SNAP_SCALER_CACHE") {
            self.scaler_cache_capacity = capacity.max(1);
        }
        if env_flag("SNAP_DISABLE_MRT") {
            self.allow_mrt = false;
        }
        if let Ok(value) = env::var("SNAP_QUALITY") {
            match value.parse() {
                Ok(quality) => self.default_quality = quality,
                Err(err) => warn!(%value, %err, "Ignoring SNAP_QUALITY"),
            }
        }
        self
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.trim().parse().ok()
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HelperConfig::default();
        assert_eq!(config.scaler_cache_capacity, 8);
        assert!(config.flip_readback);
        assert!(config.allow_mrt);
        assert_eq!(config.default_quality, ScalerQuality::Good);
    }

    #[test]
    fn test_yaml_partial() {
        let config: HelperConfig =
            serde_yaml::from_str("allow_mrt: false\ndefault_quality: best\n").unwrap();
        assert!(!config.allow_mrt);
        assert_eq!(config.default_quality, ScalerQuality::Best);
        assert_eq!(config.scaler_cache_capacity, DEFAULT_SCALER_CACHE);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = HelperConfig {
            scaler_cache_capacity: 3,
            ..Default::default()
        };
        let text = serde_yaml::to_string(&config).unwrap();
        let back: HelperConfig = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
