//! Application configuration
//!
//! Loaded from TOML (`<config-dir>/hestia.toml`) with environment-variable
//! overrides, validated before startup.
//!
//! ## Loading Order
//!
//! 1. `--config-dir` CLI flag (default: current directory)
//! 2. `HESTIA_*` environment overrides for secrets and endpoints
//! 3. Built-in defaults for everything else
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(AppConfig::load(&args.config_dir)?);
//!
//! // Anywhere in the codebase:
//! let batch = config::get().influxdb.batch_size;
//! ```

mod settings;
pub mod validation;

pub use settings::*;
pub use validation::ConfigError;

use std::sync::OnceLock;

/// Global application configuration, initialized once at startup.
static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();

/// Initialize the global configuration.
///
/// Must be called exactly once before any calls to `get()`.
pub fn init(config: AppConfig) {
    if APP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup bug, not a recoverable condition.
#[allow(clippy::expect_used)]
pub fn get() -> &'static AppConfig {
    APP_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}