//! Core Home Assistant configuration
//!
//! Parses the `homeassistant:` and `http:` sections from configuration.yaml

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};

/// Name of the main configuration file
pub const CONFIG_FILE: &str = "configuration.yaml";

/// Port the HTTP server listens on unless configured otherwise
pub const DEFAULT_SERVER_PORT: u16 = 8123;

/// Core configuration from the `homeassistant:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Name of the location (e.g., "Home")
    #[serde(default = "default_name")]
    pub name: String,

    /// URL the instance is reachable at from the local network
    #[serde(default)]
    pub internal_url: Option<String>,

    /// URL the instance is reachable at from the internet
    #[serde(default)]
    pub external_url: Option<String>,
}

fn default_name() -> String {
    "Home".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            internal_url: None,
            external_url: None,
        }
    }
}

/// HTTP server configuration from the `http:` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to bind
    #[serde(default = "default_server_host")]
    pub server_host: String,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
        }
    }
}

/// The whole of configuration.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub homeassistant: CoreConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Remaining top-level sections keyed by integration domain
    #[serde(flatten)]
    pub integrations: HashMap<String, Value>,
}

impl Config {
    /// Load `configuration.yaml` from a config directory
    ///
    /// A missing file yields the default configuration.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = config_dir.as_ref().join(CONFIG_FILE);
        if !path.exists() {
            info!("No {} in {:?}, using defaults", CONFIG_FILE, config_dir.as_ref());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_yaml_str(&content).map_err(|source| ConfigError::ParseYaml {
            path: path.clone(),
            source,
        })?;

        debug!(
            "Loaded {:?} with {} integration sections",
            path,
            config.integrations.len()
        );
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty file parses as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Deserialize the section of an integration, `None` if it is absent
    pub fn integration<T: DeserializeOwned>(&self, domain: &str) -> ConfigResult<Option<T>> {
        let Some(section) = self.integrations.get(domain) else {
            return Ok(None);
        };

        serde_yaml::from_value(section.clone())
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: domain.to_string(),
                reason: e.to_string(),
            })
    }
}
