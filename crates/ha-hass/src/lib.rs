//! The Home Assistant host
//!
//! [`HomeAssistant`] bundles the core stores (event bus, state store,
//! registries, config entries, webhooks) with the registered integrations
//! and is shared as `Arc<HomeAssistant>` with everything that needs it.

pub mod config_flow;
pub mod integration;
pub mod setup;
pub mod update_coordinator;

pub use config_flow::{
    ConfigFlow, FlowContext, FlowError, FlowInit, FlowManager, FlowOutcome, FlowResult, FormField,
    UserInput, ZeroconfServiceInfo,
};
pub use integration::{EntityPlatform, Integration, Platform, SetupError};
pub use setup::{
    async_forward_entry_setups, async_setup_entry, async_unload_entry, async_unload_platforms,
};
pub use update_coordinator::{CoordinatorListener, DataUpdateCoordinator, UpdateListener};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use ha_config::Config;
use ha_config_entries::ConfigEntries;
use ha_core::{events, Context, Event};
use ha_event_bus::EventBus;
use ha_registries::{Registries, StorageResult};
use ha_state_store::StateStore;
use ha_webhook::{WebhookRegistry, WebhookResult};
use tracing::{info, warn};

pub struct HomeAssistant {
    pub config_dir: PathBuf,
    pub config: Config,
    pub bus: Arc<EventBus>,
    pub states: Arc<StateStore>,
    pub registries: Arc<Registries>,
    pub config_entries: Arc<ConfigEntries>,
    pub webhooks: Arc<WebhookRegistry>,
    pub flows: FlowManager,
    integrations: DashMap<String, Arc<dyn Integration>>,
}

impl HomeAssistant {
    pub fn new(config_dir: impl AsRef<Path>, config: Config) -> Arc<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();
        let bus = Arc::new(EventBus::new());
        let registries = Arc::new(Registries::new(&config_dir));

        Arc::new(Self {
            states: Arc::new(StateStore::new(Arc::clone(&bus))),
            config_entries: Arc::new(ConfigEntries::new(Arc::clone(&registries.storage))),
            webhooks: Arc::new(WebhookRegistry::new()),
            flows: FlowManager::new(),
            integrations: DashMap::new(),
            config_dir,
            config,
            bus,
            registries,
        })
    }

    /// Load registries and config entries from `.storage`
    pub async fn async_load(&self) -> StorageResult<()> {
        self.registries.load_all().await?;
        self.config_entries.load().await?;
        Ok(())
    }

    pub fn register_integration(&self, integration: Arc<dyn Integration>) {
        info!("Registered integration {}", integration.domain());
        self.integrations
            .insert(integration.domain().to_string(), integration);
    }

    pub fn integration(&self, domain: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(domain).map(|r| Arc::clone(r.value()))
    }

    /// Base URL devices on the local network can reach this instance at
    pub fn internal_url(&self) -> WebhookResult<String> {
        ha_webhook::internal_base_url(&self.config.homeassistant, &self.config.http)
    }

    /// Set up every stored entry whose integration is registered
    pub async fn async_setup_entries(self: &Arc<Self>) {
        for entry_id in self.config_entries.entry_ids() {
            let Some(entry) = self.config_entries.get(&entry_id) else {
                continue;
            };
            if self.integration(&entry.domain).is_none() {
                continue;
            }
            if let Err(err) = async_setup_entry(self, &entry_id).await {
                warn!("Setting up {} failed: {}", entry.title, err);
            }
        }
    }

    /// Announce shutdown and persist state
    pub async fn async_stop(&self) {
        info!("Stopping Home Assistant");
        self.bus.fire(Event::new(
            events::HOMEASSISTANT_STOP,
            serde_json::Value::Null,
            Context::new(),
        ));

        // Let one-shot stop listeners run before persisting
        tokio::task::yield_now().await;

        if let Err(err) = self.registries.save_all().await {
            warn!("Saving registries failed: {}", err);
        }
        if let Err(err) = self.config_entries.save().await {
            warn!("Saving config entries failed: {}", err);
        }
    }
}
