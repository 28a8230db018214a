//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::storage::StorageOptions;

/// Prefix for environment overrides, e.g. `GATEKEEPER__BUCKETS__SIZE=10`.
const ENV_PREFIX: &str = "GATEKEEPER";
const ENV_SEPARATOR: &str = "__";

/// Main configuration for a Gatekeeper rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Storage backend selection and options
    #[serde(default)]
    pub storage: StorageConfig,

    /// Bucket sizing and refill configuration
    #[serde(default)]
    pub buckets: BucketConfig,

    /// How far ahead (ms) to look for capacity when an entity has no free slot
    #[serde(default = "default_wait_for_token_ms", alias = "waitForTokenMs")]
    pub wait_for_token_ms: u64,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            buckets: BucketConfig::default(),
            wait_for_token_ms: default_wait_for_token_ms(),
        }
    }
}

/// Storage backend configuration.
///
/// Everything except `type` is handed to the backend factory untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Registered backend type name
    #[serde(rename = "type", default = "default_storage_type")]
    pub kind: String,

    /// Backend-specific options
    #[serde(flatten)]
    pub options: StorageOptions,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: default_storage_type(),
            options: StorageOptions::new(),
        }
    }
}

fn default_storage_type() -> String {
    "memory".to_string()
}

/// Bucket configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Total concurrency and throughput ceiling of a bucket
    #[serde(default = "default_size")]
    pub size: u32,

    /// Units of throughput gained every refresh interval
    #[serde(default = "default_refresh_rate", alias = "refreshRate")]
    pub refresh_rate: u32,

    /// Width of a refresh interval in seconds
    #[serde(default = "default_refresh_interval", alias = "refreshInterval")]
    pub refresh_interval: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
            refresh_rate: default_refresh_rate(),
            refresh_interval: default_refresh_interval(),
        }
    }
}

fn default_size() -> u32 {
    100
}

fn default_refresh_rate() -> u32 {
    50
}

fn default_refresh_interval() -> u64 {
    1
}

fn default_wait_for_token_ms() -> u64 {
    50
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limiter configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file layered under
    /// `GATEKEEPER__*` environment variables.
    ///
    /// The file is parsed as-is so camelCase keys keep their case. Environment
    /// keys arrive lowercased and replace file keys that differ only by case
    /// or underscores (`GATEKEEPER__BUCKETS__REFRESH_RATE` overrides
    /// `refreshRate`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut merged = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading limiter configuration");
                let contents = std::fs::read_to_string(path)?;
                if contents.trim().is_empty() {
                    serde_json::Value::Null
                } else {
                    serde_yaml::from_str::<serde_json::Value>(&contents).map_err(|e| {
                        GatekeeperError::Config(format!("Failed to parse configuration: {}", e))
                    })?
                }
            }
            None => serde_json::Value::Null,
        };
        if merged.is_null() {
            merged = serde_json::Value::Object(serde_json::Map::new());
        }

        let overrides: serde_json::Value = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        merge_overrides(&mut merged, overrides);

        let config: GatekeeperConfig = serde_json::from_value(merged)
            .map_err(|e| GatekeeperError::Config(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bucket parameters the decision algorithm cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.buckets.size == 0 {
            return Err(GatekeeperError::Config("buckets.size must be positive".into()));
        }
        if self.buckets.refresh_rate == 0 {
            return Err(GatekeeperError::Config(
                "buckets.refresh_rate must be positive".into(),
            ));
        }
        if self.buckets.refresh_interval == 0 {
            return Err(GatekeeperError::Config(
                "buckets.refresh_interval must be positive".into(),
            ));
        }
        // A zero lookahead window would report a delay of 0 without handing out a slot.
        if self.wait_for_token_ms == 0 {
            return Err(GatekeeperError::Config(
                "wait_for_token_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Key identity ignoring case and underscores.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Deep-merge `overrides` into `base`. An override replaces the base key it
/// normalizes to, keeping the base spelling.
fn merge_overrides(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                let wanted = normalize_key(&key);
                let existing = base.keys().find(|k| normalize_key(k) == wanted).cloned();
                match existing {
                    Some(existing) => {
                        let mut slot = base
                            .remove(&existing)
                            .unwrap_or(serde_json::Value::Null);
                        merge_overrides(&mut slot, value);
                        base.insert(existing, slot);
                    }
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overrides) => *base = overrides,
    }
}
