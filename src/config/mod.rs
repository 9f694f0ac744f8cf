//! Engine Configuration Module
//!
//! Typed, validated parameter table built once at startup. Downstream layers
//! (rules, predictor, pipeline) receive values or section references,
//! never string lookups.
//!
//! ## Loading Order
//!
//! 1. `PUMPGUARD_CONFIG` environment variable (path to TOML file)
//! 2. `pumpguard.toml` in the current working directory
//! 3. Built-in defaults
//!
//! followed by the container environment overrides (`PUMP_ID`, `MQTT_BROKER`,
//! ...). Call `config::init()` once at startup, then `config::get()` anywhere.

mod engine_config;
pub mod defaults;
pub mod validation;

pub use engine_config::*;
pub use validation::{validate_artifacts, validate_config, ConfigError};

use std::sync::OnceLock;

/// Global engine configuration, initialized once at startup.
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global engine configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG
        .get()
        .unwrap_or_else(|| panic!("config::get() called before config::init() — startup bug"))
}

/// Check whether the config has been initialized.
///
/// Useful for tests and optional config paths.
pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
