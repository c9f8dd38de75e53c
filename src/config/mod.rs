//! Gateway Configuration Module
//!
//! Loads threshold ranges, correction policy, device positions and
//! delivery endpoints from TOML, falling back to built-in defaults that
//! match the stock field deployment.
//!
//! ## Loading Order
//!
//! 1. `GATEWAY_CONFIG` environment variable (path to TOML file)
//! 2. `gateway_config.toml` in the current working directory
//! 3. Built-in defaults
//!
//! `API_KEY` in the environment overrides `delivery.api_key` in all cases.
//!
//! ```ignore
//! let config = GatewayConfig::load();
//! let pipeline = CorrectionPipeline::new(Arc::new(config.thresholds.clone()), config.correction.clone());
//! ```

mod gateway_config;
pub mod defaults;
pub mod validation;

pub use gateway_config::*;
