//! Integration and entity-platform seams
//!
//! An integration is registered with the host under its domain. The host
//! drives its config entries through [`Integration::async_setup_entry`] and
//! [`Integration::async_unload_entry`]; entity platforms are set up by
//! forwarding an entry to them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use ha_config_entries::{ConfigEntriesError, ConfigEntry};
use thiserror::Error;

use crate::config_flow::ConfigFlow;
use crate::HomeAssistant;

/// Errors raised while setting up or unloading a config entry
#[derive(Debug, Error)]
pub enum SetupError {
    /// Setup failed in a way retrying won't fix
    #[error("{0}")]
    ConfigEntryError(String),

    /// The device is not ready yet; setup is retried later
    #[error("{0}")]
    ConfigEntryNotReady(String),

    #[error("Integration {0} is not registered")]
    IntegrationNotFound(String),

    #[error("Integration {domain} has no {platform} platform")]
    PlatformNotFound { domain: String, platform: Platform },

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// Entity platforms an integration can forward entries to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Sensor,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Sensor => "sensor",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Integration: Send + Sync {
    fn domain(&self) -> &'static str;

    /// Set up a config entry; `Ok(false)` means setup failed without detail
    async fn async_setup_entry(
        &self,
        hass: &Arc<HomeAssistant>,
        entry: &ConfigEntry,
    ) -> Result<bool, SetupError>;

    async fn async_unload_entry(&self, hass: &Arc<HomeAssistant>, entry: &ConfigEntry) -> bool;

    /// Entity platform implementation for `platform`, if provided
    fn platform(&self, platform: Platform) -> Option<Arc<dyn EntityPlatform>>;

    /// New config flow instance, for integrations configurable through flows
    fn config_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        None
    }
}

#[async_trait]
pub trait EntityPlatform: Send + Sync {
    async fn async_setup_entry(
        &self,
        hass: &Arc<HomeAssistant>,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError>;

    async fn async_unload_entry(&self, hass: &Arc<HomeAssistant>, entry: &ConfigEntry) -> bool;
}
