//! Vegetronix VegeHub integration
//!
//! A VegeHub is a small sensor hub on the local network. During entry setup
//! it is told to push its readings to a webhook of this instance; every push
//! goes through [`VegeHubCoordinator`] to the sensor entities.

pub mod config_flow;
pub mod consts;
pub mod coordinator;
pub mod hub;
pub mod sensor;
pub mod webhook;

pub use config_flow::{DiscoveredHubs, VegeHubConfigFlow};
pub use coordinator::{SensorData, VegeHubCoordinator};
pub use hub::{HubError, VegeHub};
pub use sensor::VegeHubSensorPlatform;
pub use webhook::{entity_key, VegeHubWebhookHandler};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ha_config_entries::ConfigEntry;
use ha_core::events::HOMEASSISTANT_STOP;
use ha_hass::{
    async_forward_entry_setups, async_unload_platforms, ConfigFlow, EntityPlatform, HomeAssistant,
    Integration, Platform, SetupError, UserInput,
};
use ha_registries::{DeviceConnection, DeviceIdentifier, DeviceInfo, CONNECTION_NETWORK_MAC};
use ha_webhook::{Method, WebhookRegistry};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use consts::{CONF_HOST, CONF_IP_ADDRESS, CONF_MAC, DOMAIN, MANUFACTURER, MODEL, NAME, PLATFORMS};

/// A hub listed under `vegehub:` in configuration.yaml
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubConfig {
    pub ip_address: String,
}

impl HubConfig {
    /// Input for the import flow
    pub fn flow_input(&self) -> UserInput {
        UserInput::from([(CONF_IP_ADDRESS.to_string(), json!(self.ip_address))])
    }
}

/// Runtime data stored on a loaded entry
pub struct VegeHubData {
    pub hub: VegeHub,
    pub coordinator: Arc<VegeHubCoordinator>,
}

pub struct VegeHubIntegration {
    sensor: Arc<VegeHubSensorPlatform>,
    discovered: DiscoveredHubs,
    hub_timeout: Duration,
}

impl Default for VegeHubIntegration {
    fn default() -> Self {
        Self {
            sensor: Arc::new(VegeHubSensorPlatform::new()),
            discovered: DiscoveredHubs::default(),
            hub_timeout: hub::DEFAULT_TIMEOUT,
        }
    }
}

impl VegeHubIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request timeout used for every hub this integration talks to
    pub fn with_hub_timeout(mut self, timeout: Duration) -> Self {
        self.hub_timeout = timeout;
        self
    }

    /// Share the IP to MAC map of discovered hubs
    pub fn with_discovered_hubs(mut self, discovered: DiscoveredHubs) -> Self {
        self.discovered = discovered;
        self
    }

    pub fn sensor_platform(&self) -> &Arc<VegeHubSensorPlatform> {
        &self.sensor
    }
}

fn setup_error(err: HubError) -> SetupError {
    if err.is_timeout() {
        SetupError::ConfigEntryNotReady("Device is not responding".into())
    } else {
        SetupError::ConfigEntryError("Error connecting to device".into())
    }
}

/// Non-empty string field of the entry data
fn required<'a>(entry: &'a ConfigEntry, key: &str) -> Result<&'a str, SetupError> {
    entry
        .data_str(key)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| SetupError::ConfigEntryError(format!("Config entry has no {key}")))
}

/// Register the webhook and unregister it again once the host stops
fn register_webhook(
    hass: &HomeAssistant,
    entry_id: &str,
    webhook_id: &str,
    device_mac: &str,
    coordinator: Arc<VegeHubCoordinator>,
) {
    let handler = VegeHubWebhookHandler::new(device_mac, entry_id, coordinator);
    let name = format!("{NAME} {device_mac}");

    if let Err(err) = hass.webhooks.register(
        DOMAIN,
        &name,
        webhook_id,
        Arc::new(handler),
        vec![Method::POST],
    ) {
        error!(%name, error = %err, "Failed to register webhook");
        return;
    }

    let webhooks: Arc<WebhookRegistry> = Arc::clone(&hass.webhooks);
    let webhook_id = webhook_id.to_string();
    let stop_listener = hass.bus.listen_once(HOMEASSISTANT_STOP, move |_| async move {
        webhooks.unregister(&webhook_id);
    });
    hass.config_entries
        .async_on_unload(entry_id, Box::new(move || stop_listener.remove()));
}

#[async_trait]
impl Integration for VegeHubIntegration {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    #[instrument(skip_all, fields(entry_id = %entry.entry_id))]
    async fn async_setup_entry(
        &self,
        hass: &Arc<HomeAssistant>,
        entry: &ConfigEntry,
    ) -> Result<bool, SetupError> {
        let device_mac = required(entry, CONF_MAC)?.to_string();
        let device_ip = required(entry, CONF_IP_ADDRESS)?;
        let unique_id = entry
            .unique_id
            .clone()
            .ok_or_else(|| SetupError::ConfigEntryError("Config entry has no unique id".into()))?;

        let mut hub =
            VegeHub::new(device_ip, device_mac.as_str(), unique_id).with_timeout(self.hub_timeout);

        let webhook_id = WebhookRegistry::generate_id();
        let base_url = hass
            .internal_url()
            .map_err(|e| SetupError::ConfigEntryError(e.to_string()))?;
        let webhook_url = ha_webhook::generate_url(&base_url, &webhook_id);

        hub.setup("", &webhook_url, 1).await.map_err(|err| {
            error!(ip = %device_ip, error = %err, "Hub setup failed");
            setup_error(err)
        })?;
        debug!(%webhook_url, "Hub pushes to webhook");

        let coordinator = VegeHubCoordinator::new(hub.unique_id());
        hass.config_entries.set_runtime_data(
            &entry.entry_id,
            Arc::new(VegeHubData {
                hub: hub.clone(),
                coordinator: Arc::clone(&coordinator),
            }),
        );

        let host = entry.data_str(CONF_HOST).unwrap_or(&entry.title);
        hass.registries.devices.get_or_create(
            &entry.entry_id,
            DeviceInfo {
                identifiers: vec![DeviceIdentifier::new(DOMAIN, &device_mac)],
                connections: vec![DeviceConnection::new(CONNECTION_NETWORK_MAC, &device_mac)],
                manufacturer: Some(MANUFACTURER.to_string()),
                model: Some(MODEL.to_string()),
                name: Some(host.to_string()),
                sw_version: hub.sw_version().map(str::to_string),
                configuration_url: Some(hub.url()),
            },
        );

        async_forward_entry_setups(hass, entry, PLATFORMS).await?;

        let task_hass = Arc::clone(hass);
        let entry_id = entry.entry_id.clone();
        hass.config_entries.create_background_task(
            &entry.entry_id,
            "vegehub_register_webhook",
            async move {
                register_webhook(&task_hass, &entry_id, &webhook_id, &device_mac, coordinator);
            },
        );

        if let Err(err) = hub.request_update().await {
            error!(ip = %device_ip, error = %err, "Requesting an update from the hub failed");
            async_unload_platforms(hass, entry, PLATFORMS).await;
            return Err(setup_error(err));
        }

        info!(
            title = %entry.title,
            sensors = hub.num_sensors(),
            actuators = hub.num_actuators(),
            "VegeHub set up"
        );
        Ok(true)
    }

    async fn async_unload_entry(&self, hass: &Arc<HomeAssistant>, entry: &ConfigEntry) -> bool {
        async_unload_platforms(hass, entry, PLATFORMS).await
    }

    fn platform(&self, platform: Platform) -> Option<Arc<dyn EntityPlatform>> {
        match platform {
            Platform::Sensor => Some(Arc::clone(&self.sensor) as Arc<dyn EntityPlatform>),
        }
    }

    fn config_flow(&self) -> Option<Box<dyn ConfigFlow>> {
        Some(Box::new(VegeHubConfigFlow::new(
            Arc::clone(&self.discovered),
            self.hub_timeout,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_error_mapping() {
        let invalid = HubError::InvalidResponse {
            ip: "192.0.2.1".into(),
            reason: "HTTP 500".into(),
        };
        assert!(matches!(
            setup_error(invalid),
            SetupError::ConfigEntryError(msg) if msg == "Error connecting to device"
        ));
    }

    #[test]
    fn test_integration_surface() {
        let integration = VegeHubIntegration::new();
        assert_eq!(integration.domain(), "vegehub");
        assert!(integration.platform(Platform::Sensor).is_some());
        assert!(integration.config_flow().is_some());
    }

    #[test]
    fn test_hub_config_from_yaml() {
        let config = ha_config::Config::from_yaml_str(
            "vegehub:\n  - ip_address: 192.168.0.20\n  - ip_address: 192.168.0.21\n",
        )
        .unwrap();
        let hubs: Vec<HubConfig> = config.integration(DOMAIN).unwrap().unwrap();

        assert_eq!(hubs.len(), 2);
        assert_eq!(hubs[1].flow_input()["ip_address"], "192.168.0.21");
    }
}
