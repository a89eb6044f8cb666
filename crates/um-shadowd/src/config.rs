//! Shadow manager configuration, loadable from TOML.
//!
//! Every recognized key is enumerated here; unknown keys fail the parse
//! so a typo surfaces as `InvalidConfiguration` at install time instead
//! of being silently ignored.

use std::collections::BTreeMap;

use serde::Deserialize;

use um_channel::MqttConfig;
use um_protocol::errors::ShadowError;
use um_protocol::validator::{DEFAULT_DOC_SIZE_LIMIT, MAX_DOC_SIZE_LIMIT};

use crate::sync::direction::SyncDirection;

/// Top-level configuration for the shadow manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Platform-provided thing name of this gateway (the "core thing").
    pub thing_name: String,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub synchronize: SynchronizeConfig,
    /// Cloud MQTT session settings. None disables the sync plane.
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "umbra-shadows.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsConfig {
    /// Cap on a serialized shadow document, 1..=30720 bytes.
    #[serde(default = "default_doc_size")]
    pub shadow_document_size_limit_bytes: usize,
    /// Soft disk budget for the store. Zero disables the check.
    #[serde(default)]
    pub max_disk_utilization_megabytes: u64,
}

fn default_doc_size() -> usize {
    DEFAULT_DOC_SIZE_LIMIT
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            shadow_document_size_limit_bytes: DEFAULT_DOC_SIZE_LIMIT,
            max_disk_utilization_megabytes: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitsConfig {
    #[serde(default = "default_outbound_rate")]
    pub max_outbound_sync_updates_per_second: u32,
    #[serde(default = "default_total_rate")]
    pub max_total_local_requests_rate: u32,
    #[serde(default = "default_per_thing_rate")]
    pub max_local_requests_rate_per_thing: u32,
}

fn default_outbound_rate() -> u32 {
    100
}

fn default_total_rate() -> u32 {
    200
}

fn default_per_thing_rate() -> u32 {
    20
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            max_outbound_sync_updates_per_second: default_outbound_rate(),
            max_total_local_requests_rate: default_total_rate(),
            max_local_requests_rate_per_thing: default_per_thing_rate(),
        }
    }
}

/// Worker scheduling strategy for the sync plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StrategyConfig {
    #[default]
    RealTime,
    Periodic {
        /// Seconds between drain passes.
        delay: u64,
    },
}

/// Shadows to synchronize for one thing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThingShadowsConfig {
    #[serde(default)]
    pub classic_shadow: bool,
    #[serde(default)]
    pub named_shadows: Vec<String>,
}

/// List-form sync entry with an explicit thing name.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThingShadowsEntry {
    pub thing_name: String,
    #[serde(default)]
    pub classic_shadow: bool,
    #[serde(default)]
    pub named_shadows: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynchronizeConfig {
    #[serde(default)]
    pub direction: SyncDirection,
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Shadows of this gateway itself; inherits the platform thing name.
    #[serde(default)]
    pub core_thing: Option<ThingShadowsConfig>,
    /// List form, one entry per thing.
    #[serde(default)]
    pub shadow_documents: Vec<ThingShadowsEntry>,
    /// Map form, keyed by thing name.
    #[serde(default)]
    pub shadow_documents_map: BTreeMap<String, ThingShadowsConfig>,
}

impl ServiceConfig {
    /// Load configuration from a TOML file path.
    pub fn from_file(path: &str) -> Result<Self, ShadowError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ShadowError::InvalidConfiguration(format!("{path}: {e}")))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ShadowError> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ShadowError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges the schema cannot express.
    pub fn validate(&self) -> Result<(), ShadowError> {
        let size = self.limits.shadow_document_size_limit_bytes;
        if size == 0 || size > MAX_DOC_SIZE_LIMIT {
            return Err(ShadowError::InvalidConfiguration(format!(
                "shadow_document_size_limit_bytes must be between 1 and {MAX_DOC_SIZE_LIMIT}"
            )));
        }
        if let StrategyConfig::Periodic { delay } = self.synchronize.strategy {
            if delay == 0 {
                return Err(ShadowError::InvalidConfiguration(
                    "periodic strategy delay must be at least 1 second".into(),
                ));
            }
        }
        Ok(())
    }
}
