//! Configuration loading and deep-merge for the elf core.
//!
//! Defaults are layered: built-in `Config::default()`, then
//! `<elf-base>/custom/config.yaml` deep-merged on top, then the
//! `ELF_BASE_PATH` / `CLAUDE_SESSION_ID` / `CLAUDE_AGENT_ID` environment
//! variables (§6).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::error::ConfigError;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub rate_limits: RateLimitConfig,
    pub fraud: FraudConfig,
    pub meta_observer: MetaObserverConfig,
    pub context: ContextConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            rate_limits: RateLimitConfig::default(),
            fraud: FraudConfig::default(),
            meta_observer: MetaObserverConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub project_root: PathBuf,
    pub elf_base: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let project_root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let elf_base = project_root.join(".elf");
        Self {
            project_root,
            elf_base,
        }
    }
}

/// Lifecycle engine rate limits (§4.4 step 1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_updates_per_day: u32,
    pub cooldown_minutes: i64,
    pub min_applications: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_updates_per_day: 5,
            cooldown_minutes: 60,
            min_applications: 10,
        }
    }
}

/// Fraud classification thresholds (§4.5), tunable but never auto-applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FraudConfig {
    pub clean_max: f64,
    pub suspicious_max: f64,
    pub fraud_likely_max: f64,
    pub target_fpr: f64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            clean_max: 0.20,
            suspicious_max: 0.50,
            fraud_likely_max: 0.80,
            target_fpr: 0.05,
        }
    }
}

/// Meta-observer rolling-window parameters (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetaObserverConfig {
    pub default_window_hours: i64,
    pub anomaly_z_threshold: f64,
    pub bootstrap_min_observations: usize,
}

impl Default for MetaObserverConfig {
    fn default() -> Self {
        Self {
            default_window_hours: 168,
            anomaly_z_threshold: 3.0,
            bootstrap_min_observations: 30,
        }
    }
}

/// Context builder defaults (§4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ContextConfig {
    pub default_max_tokens: usize,
    pub hard_max_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_max_tokens: 8_000,
            hard_max_tokens: 50_000,
        }
    }
}

impl Config {
    /// Load defaults, deep-merge `custom/config.yaml` if present, then apply
    /// environment overrides. Unknown top-level keys in the YAML file are
    /// logged and ignored rather than silently dropped.
    pub fn load(elf_base: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.paths.elf_base = elf_base.to_path_buf();
        if let Some(parent) = elf_base.parent() {
            config.paths.project_root = parent.to_path_buf();
        }

        let custom_path = elf_base.join("custom").join("config.yaml");
        if custom_path.exists() {
            let raw = std::fs::read_to_string(&custom_path).map_err(|e| ConfigError::Parse(e.to_string()))?;
            let overlay: serde_yaml::Value =
                serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
            let base = serde_yaml::to_value(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;
            let merged = deep_merge(base, overlay);
            config = serde_yaml::from_value(merged).map_err(|e| ConfigError::Parse(e.to_string()))?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(base) = std::env::var("ELF_BASE_PATH") {
            self.paths.elf_base = PathBuf::from(base);
        }
    }
}

/// Recursively merges `overlay` on top of `base`; overlay scalars win,
/// overlay maps are merged key-by-key, everything else is replaced wholesale.
fn deep_merge(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, overlay) {
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        tracing::warn!(key = ?k, "unknown config key in custom/config.yaml");
                        v
                    }
                };
                base_map.insert(k, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_rate_limits() {
        let c = Config::default();
        assert_eq!(c.rate_limits.max_updates_per_day, 5);
        assert_eq!(c.rate_limits.cooldown_minutes, 60);
    }

    #[test]
    fn load_falls_back_to_defaults_when_no_custom_file() {
        let tmp = tempfile::tempdir().unwrap();
        let elf_base = tmp.path().join(".elf");
        std::fs::create_dir_all(&elf_base).unwrap();
        let config = Config::load(&elf_base).unwrap();
        assert_eq!(config.context.hard_max_tokens, 50_000);
    }

    #[test]
    fn load_merges_custom_yaml_overlay() {
        let tmp = tempfile::tempdir().unwrap();
        let elf_base = tmp.path().join(".elf");
        std::fs::create_dir_all(elf_base.join("custom")).unwrap();
        std::fs::write(
            elf_base.join("custom").join("config.yaml"),
            "rate_limits:\n  max_updates_per_day: 9\n",
        )
        .unwrap();
        let config = Config::load(&elf_base).unwrap();
        assert_eq!(config.rate_limits.max_updates_per_day, 9);
        assert_eq!(config.rate_limits.cooldown_minutes, 60);
    }
}
