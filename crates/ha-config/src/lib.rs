//! YAML configuration loading for Home Assistant
//!
//! Reads `configuration.yaml` from the config directory. The
//! `homeassistant:` and `http:` sections are parsed into typed structs;
//! every other top-level key is kept as raw YAML for the integration of the
//! same name to interpret.
//!
//! # Example
//!
//! ```ignore
//! use ha_config::Config;
//!
//! let config = Config::load("/config")?;
//! let hubs: Option<Vec<HubConfig>> = config.integration("vegehub")?;
//! ```

mod core_config;
mod error;

pub use core_config::{Config, CoreConfig, HttpConfig, CONFIG_FILE, DEFAULT_SERVER_PORT};
pub use error::{ConfigError, ConfigResult};

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
