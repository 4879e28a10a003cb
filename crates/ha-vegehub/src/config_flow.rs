//! Config flow for VegeHub
//!
//! Hubs are added either by entering their IP address or through zeroconf
//! discovery. Both paths end in the `user` step, which creates the entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use ha_hass::{
    ConfigFlow, FlowContext, FlowResult, FormField, HomeAssistant, UserInput, ZeroconfServiceInfo,
};
use serde_json::json;
use tracing::{error, info};

use crate::consts::{
    ATTR_CONFIGURATION_URL, ATTR_SW_VERSION, CONF_HOST, CONF_IP_ADDRESS, CONF_MAC, DOMAIN,
};
use crate::hub::VegeHub;

/// IP to MAC pairs seen by any flow, so a rediscovered hub is not woken up again
pub type DiscoveredHubs = Arc<DashMap<String, String>>;

pub struct VegeHubConfigFlow {
    context: FlowContext,
    discovered: DiscoveredHubs,
    hub: Option<VegeHub>,
    hostname: String,
    properties: HashMap<String, String>,
    config_url: String,
    timeout: Duration,
}

impl VegeHubConfigFlow {
    pub fn new(discovered: DiscoveredHubs, timeout: Duration) -> Self {
        Self {
            context: FlowContext::default(),
            discovered,
            hub: None,
            hostname: String::new(),
            properties: HashMap::new(),
            config_url: String::new(),
            timeout,
        }
    }

    /// Record `ip -> mac`, dropping any older IP the same hub had
    fn remember_mac(&self, ip: &str, mac: &str) {
        let before = self.discovered.len();
        self.discovered.retain(|_, known| known.as_str() != mac);
        if self.discovered.len() == before {
            info!(ip, "Found new hub");
        }
        self.discovered.insert(ip.to_string(), mac.to_string());
    }

    /// Contact the hub for its MAC; `None` when none could be read
    async fn fetch_mac(&self, hub: &mut VegeHub) -> Option<String> {
        if let Err(err) = hub.retrieve_mac_address(0).await {
            error!(ip = %hub.ip_address(), error = %err, "Failed to get MAC address");
        }
        if hub.mac_address().is_empty() {
            error!(ip = %hub.ip_address(), "Failed to get device config");
            return None;
        }
        Some(hub.mac_address().to_string())
    }

    fn ip_form() -> FlowResult {
        FlowResult::form("user", vec![FormField::required_string(CONF_IP_ADDRESS)])
    }

    fn entry_data(&self, hub: &VegeHub) -> UserInput {
        HashMap::from([
            (CONF_MAC.to_string(), json!(hub.mac_address())),
            (CONF_IP_ADDRESS.to_string(), json!(hub.ip_address())),
            (CONF_HOST.to_string(), json!(self.hostname)),
            (ATTR_SW_VERSION.to_string(), json!(self.properties.get("version"))),
            (ATTR_CONFIGURATION_URL.to_string(), json!(self.config_url)),
        ])
    }
}

#[async_trait]
impl ConfigFlow for VegeHubConfigFlow {
    fn context(&self) -> &FlowContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut FlowContext {
        &mut self.context
    }

    async fn async_step_user(
        &mut self,
        hass: &Arc<HomeAssistant>,
        user_input: Option<UserInput>,
    ) -> FlowResult {
        let Some(user_input) = user_input else {
            return match &self.hub {
                None => Self::ip_form(),
                Some(_) => FlowResult::form("user", Vec::new())
                    .with_placeholders(self.context.title_placeholders.clone()),
            };
        };

        let ip_address = user_input.get(CONF_IP_ADDRESS).and_then(|v| v.as_str());
        if let Some(ip_address) = ip_address.filter(|_| self.hub.is_none()) {
            let mut hub = VegeHub::new(ip_address, "", "").with_timeout(self.timeout);
            let Some(mac) = self.fetch_mac(&mut hub).await else {
                return FlowResult::abort("cannot_connect");
            };
            self.remember_mac(hub.ip_address(), &mac);

            self.context.set_unique_id(mac);
            if let Some(abort) = self.context.abort_if_unique_id_configured(hass, DOMAIN) {
                return abort;
            }

            self.hostname = hub.ip_address().to_string();
            self.config_url = hub.url();
            self.hub = Some(hub);
        }

        match &self.hub {
            Some(hub) => FlowResult::create_entry(self.hostname.clone(), self.entry_data(hub)),
            None => {
                error!("No IP address for device");
                Self::ip_form().with_error("base", "cannot_connect")
            }
        }
    }

    async fn async_step_zeroconf(
        &mut self,
        hass: &Arc<HomeAssistant>,
        discovery_info: ZeroconfServiceInfo,
    ) -> FlowResult {
        let device_ip = discovery_info.ip_address.to_string();

        self.hostname = discovery_info
            .hostname
            .strip_suffix(".local.")
            .unwrap_or(&discovery_info.hostname)
            .to_string();
        let host = discovery_info
            .hostname
            .strip_suffix('.')
            .unwrap_or(&discovery_info.hostname);
        self.config_url = match discovery_info.port {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        self.properties = discovery_info.properties;

        let known_mac = self.discovered.get(&device_ip).map(|mac| mac.value().clone());
        let hub = match known_mac {
            Some(mac) => VegeHub::new(&device_ip, mac, "").with_timeout(self.timeout),
            None => {
                let mut hub = VegeHub::new(&device_ip, "", "").with_timeout(self.timeout);
                let Some(mac) = self.fetch_mac(&mut hub).await else {
                    return FlowResult::abort("cannot_connect");
                };
                self.remember_mac(&device_ip, &mac);
                hub
            }
        };

        self.context.set_unique_id(hub.mac_address());
        if let Some(abort) = self.context.abort_if_unique_id_configured(hass, DOMAIN) {
            return abort;
        }

        self.context.title_placeholders = HashMap::from([(
            "host".to_string(),
            format!("{} ({})", self.hostname, device_ip),
        )]);
        self.hub = Some(hub);

        self.async_step_user(hass, None).await
    }
}
