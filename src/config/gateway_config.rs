//! Gateway Configuration - thresholds, correction policy, devices, delivery
//!
//! Every tunable constant of the gateway is a field here. Each
//! struct implements `Default` with those values, so running without a
//! config file reproduces the stock behaviour.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::defaults::{
    AGENT_ENDPOINT, DELIVERY_TIMEOUT_SECS, IOT_ADMIN_URL, IOT_AGENT_URL, ORION_URL,
    PROVISIONING_TIMEOUT_SECS, REPLAY_CYCLE_DELAY_MS,
};
use crate::gateway::{CorrectionPolicy, GeoOrigin, GridPosition, RegistrySettings, ThresholdTable};

/// Environment variable pointing at a config file.
pub const CONFIG_ENV_VAR: &str = "GATEWAY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "gateway_config.toml";

/// Environment variable overriding `delivery.api_key`.
pub const API_KEY_ENV_VAR: &str = "API_KEY";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one gateway deployment.
///
/// Load with `GatewayConfig::load()` which searches:
/// 1. `$GATEWAY_CONFIG` env var
/// 2. `./gateway_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub gateway: GatewayInfo,

    /// Valid physical range per metric
    #[serde(default)]
    pub thresholds: ThresholdTable,

    #[serde(default)]
    pub correction: CorrectionPolicy,

    /// Geographic anchor of the device grid
    #[serde(default)]
    pub origin: GeoOrigin,

    /// Static grid position per device
    #[serde(default = "default_device_positions")]
    pub devices: BTreeMap<String, GridPosition>,

    #[serde(default)]
    pub delivery: DeliveryConfig,

    #[serde(default)]
    pub replay: ReplayConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayInfo::default(),
            thresholds: ThresholdTable::default(),
            correction: CorrectionPolicy::default(),
            origin: GeoOrigin::default(),
            devices: default_device_positions(),
            delivery: DeliveryConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration using the standard search order:
    /// 1. `$GATEWAY_CONFIG` environment variable
    /// 2. `./gateway_config.toml` in the current working directory
    /// 3. Built-in defaults
    ///
    /// The `API_KEY` environment override is applied in every case.
    pub fn load() -> Self {
        let mut config = Self::search();
        config.apply_env_overrides();
        config
    }

    fn search() -> Self {
        // 1. Check env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), gateway = %config.gateway.name, "Loaded gateway config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 2. Check ./gateway_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(gateway = %config.gateway.name, "Loaded gateway config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 3. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys only warn.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Override secrets from the environment (`API_KEY`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV_VAR) {
            if !key.is_empty() {
                self.delivery.api_key = key;
            }
        }
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Save config to a file.
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Gateway config saved");
        Ok(())
    }

    /// Validate for internal consistency.
    ///
    /// Rules:
    /// - Every threshold range must satisfy `min < max`
    /// - Window capacity and streak limit must be > 0
    /// - Smoothing weight must lie in `[0, 1]`
    /// - Delivery timeouts must be > 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = self.thresholds.malformed_entries();
        let c = &self.correction;

        if c.window_capacity == 0 {
            errors.push("correction.window_capacity must be > 0".to_string());
        }
        if c.streak_limit == 0 {
            errors.push("correction.streak_limit must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&c.smoothing_weight) {
            errors.push(format!(
                "correction.smoothing_weight ({:.3}) must be within [0, 1]",
                c.smoothing_weight
            ));
        }
        if !c.sentinel.is_finite() {
            errors.push("correction.sentinel must be finite".to_string());
        }
        if self.delivery.timeout_secs == 0 {
            errors.push("delivery.timeout_secs must be > 0".to_string());
        }
        if self.delivery.provisioning_timeout_secs == 0 {
            errors.push("delivery.provisioning_timeout_secs must be > 0".to_string());
        }
        if !self.origin.lat.is_finite() || self.origin.lat.abs() >= 90.0 {
            errors.push(format!(
                "origin.lat ({}) must be strictly between -90 and 90",
                self.origin.lat
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Registry inputs derived from this config.
    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            origin: self.origin,
            positions: Arc::new(self.devices.clone()),
            entity_prefix: self.gateway.entity_prefix.clone(),
            entity_type: self.gateway.entity_type.clone(),
            timeout: Duration::from_secs(self.delivery.provisioning_timeout_secs),
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Gateway Info
// ============================================================================

/// Identification and entity naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(default = "default_gateway_name")]
    pub name: String,

    /// Prefix prepended to the device id to form the context entity id
    #[serde(default = "default_entity_prefix")]
    pub entity_prefix: String,

    #[serde(default = "default_entity_type")]
    pub entity_type: String,
}

fn default_gateway_name() -> String {
    "field-gateway".to_string()
}
fn default_entity_prefix() -> String {
    "urn:ngsi-ld:Cluster:".to_string()
}
fn default_entity_type() -> String {
    "Cluster".to_string()
}

impl Default for GatewayInfo {
    fn default() -> Self {
        Self {
            name: default_gateway_name(),
            entity_prefix: default_entity_prefix(),
            entity_type: default_entity_type(),
        }
    }
}

// ============================================================================
// Devices
// ============================================================================

/// Grid positions (tens of metres) of the stock field clusters.
fn default_device_positions() -> BTreeMap<String, GridPosition> {
    [
        ("cluster_01", 8.0, 32.0),
        ("cluster_02", 33.0, 26.0),
        ("cluster_03", 44.0, 19.0),
        ("cluster_04", 63.0, 30.0),
        ("cluster_05", 91.0, 28.0),
        ("cluster_06", 2.0, 82.0),
        ("cluster_07", 35.0, 70.0),
        ("cluster_08", 45.0, 70.0),
        ("cluster_09", 67.0, 75.0),
        ("cluster_10", 89.0, 72.0),
    ]
    .into_iter()
    .map(|(id, x, y)| (id.to_string(), GridPosition::new(x, y)))
    .collect()
}

// ============================================================================
// Delivery
// ============================================================================

/// Context platform endpoints and delivery behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// When false, payloads are only logged
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_iot_agent_url")]
    pub iot_agent_url: String,

    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    #[serde(default = "default_orion_url")]
    pub orion_url: String,

    /// Endpoint declared for devices at provisioning
    #[serde(default = "default_agent_endpoint")]
    pub agent_endpoint: String,

    /// IoT-agent API key; `API_KEY` in the environment takes precedence
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_service_path")]
    pub service_path: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_provisioning_timeout_secs")]
    pub provisioning_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_iot_agent_url() -> String {
    IOT_AGENT_URL.to_string()
}
fn default_admin_url() -> String {
    IOT_ADMIN_URL.to_string()
}
fn default_orion_url() -> String {
    ORION_URL.to_string()
}
fn default_agent_endpoint() -> String {
    AGENT_ENDPOINT.to_string()
}
fn default_service() -> String {
    "openiot".to_string()
}
fn default_service_path() -> String {
    "/".to_string()
}
fn default_timeout_secs() -> u64 {
    DELIVERY_TIMEOUT_SECS
}
fn default_provisioning_timeout_secs() -> u64 {
    PROVISIONING_TIMEOUT_SECS
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            iot_agent_url: default_iot_agent_url(),
            admin_url: default_admin_url(),
            orion_url: default_orion_url(),
            agent_endpoint: default_agent_endpoint(),
            api_key: String::new(),
            service: default_service(),
            service_path: default_service_path(),
            timeout_secs: default_timeout_secs(),
            provisioning_timeout_secs: default_provisioning_timeout_secs(),
        }
    }
}

impl DeliveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ============================================================================
// Replay
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Delay between replayed batches (ms)
    #[serde(default = "default_cycle_delay_ms")]
    pub cycle_delay_ms: u64,
}

fn default_cycle_delay_ms() -> u64 {
    REPLAY_CYCLE_DELAY_MS
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            cycle_delay_ms: default_cycle_delay_ms(),
        }
    }
}
