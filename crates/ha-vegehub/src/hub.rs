//! Client for the VegeHub local HTTP API
//!
//! Every call is a JSON POST to `http://<ip>/api/...`. Operations take a
//! `retries` count and are attempted at most `retries + 1` times.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Request timeout used unless overridden
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the server endpoint the hub pushes readings to
pub const ENDPOINT_NAME: &str = "HomeAssistant";

const PATH_INFO: &str = "/api/info/get";
const PATH_CONFIG_GET: &str = "/api/config/get";
const PATH_CONFIG_SET: &str = "/api/config/set";
const PATH_UPDATE: &str = "/api/update/send";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Error connecting to hub at {ip}")]
    Connection {
        ip: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Hub at {ip} did not respond in time")]
    Timeout {
        ip: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid response from hub at {ip}: {reason}")]
    InvalidResponse { ip: String, reason: String },
}

impl HubError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, HubError::Timeout { .. })
    }
}

/// `hub` section of `/api/info/get`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubDetails {
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub num_channels: Option<u32>,
    #[serde(default)]
    pub num_actuators: Option<u32>,
}

/// `wifi` section of `/api/info/get`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WifiDetails {
    #[serde(default)]
    pub mac_addr: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubInfo {
    #[serde(default)]
    pub hub: HubDetails,
    #[serde(default)]
    pub wifi: WifiDetails,
}

/// Normalise a MAC as reported by the hub: separators dropped, upper case
pub fn normalize_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| *c != ':')
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug, Clone)]
pub struct VegeHub {
    ip_address: String,
    mac_address: String,
    unique_id: String,
    info: Option<HubInfo>,
    client: reqwest::Client,
    timeout: Duration,
}

impl VegeHub {
    pub fn new(
        ip_address: impl Into<String>,
        mac_address: impl Into<String>,
        unique_id: impl Into<String>,
    ) -> Self {
        Self {
            ip_address: ip_address.into(),
            mac_address: mac_address.into(),
            unique_id: unique_id.into(),
            info: None,
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    /// Empty until known
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// Config entry unique id; empty while a flow is still probing the hub
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn sw_version(&self) -> Option<&str> {
        self.info.as_ref()?.hub.firmware_version.as_deref()
    }

    pub fn num_sensors(&self) -> u32 {
        self.info
            .as_ref()
            .and_then(|info| info.hub.num_channels)
            .unwrap_or(0)
    }

    pub fn num_actuators(&self) -> u32 {
        self.info
            .as_ref()
            .and_then(|info| info.hub.num_actuators)
            .unwrap_or(0)
    }

    /// Web UI of the hub
    pub fn url(&self) -> String {
        format!("http://{}", self.ip_address)
    }

    /// Ask the hub for its MAC address; returns whether one was found
    #[instrument(skip(self), fields(ip = %self.ip_address))]
    pub async fn retrieve_mac_address(&mut self, retries: u32) -> Result<bool, HubError> {
        let info = self.get_device_info(retries).await?;

        match info.wifi.mac_addr.as_deref().filter(|mac| !mac.is_empty()) {
            Some(mac) => {
                self.mac_address = normalize_mac(mac);
                debug!(mac = %self.mac_address, "Retrieved MAC address");
                Ok(true)
            }
            None => {
                warn!("Hub did not report a MAC address");
                Ok(false)
            }
        }
    }

    /// Point the hub's `HomeAssistant` endpoint at `server_address`
    ///
    /// Reads the hub configuration, updates the API key and endpoint, writes
    /// it back and then caches the device info.
    #[instrument(skip(self, api_key), fields(ip = %self.ip_address))]
    pub async fn setup(
        &mut self,
        api_key: &str,
        server_address: &str,
        retries: u32,
    ) -> Result<(), HubError> {
        let request = json!({ "hub": [], "api_key": [], "endpoints": [] });
        let mut config = self.post_json(PATH_CONFIG_GET, &request, retries).await?;

        if !config.is_object() {
            return Err(self.invalid("configuration is not a JSON object"));
        }
        apply_server_endpoint(&mut config, api_key, server_address);

        self.post(PATH_CONFIG_SET, &config, retries).await?;
        debug!(server_address, "Configured hub endpoint");

        let info = self.get_device_info(retries).await?;
        if self.mac_address.is_empty() {
            if let Some(mac) = info.wifi.mac_addr.as_deref() {
                self.mac_address = normalize_mac(mac);
            }
        }
        self.info = Some(info);
        Ok(())
    }

    /// Ask the hub to push its current readings
    pub async fn request_update(&self) -> Result<(), HubError> {
        self.post(PATH_UPDATE, &json!({}), 0).await?;
        Ok(())
    }

    async fn get_device_info(&self, retries: u32) -> Result<HubInfo, HubError> {
        let request = json!({ "hub": [], "wifi": [] });
        let value = self.post_json(PATH_INFO, &request, retries).await?;
        serde_json::from_value(value).map_err(|e| self.invalid(e.to_string()))
    }

    async fn post_json(&self, path: &str, body: &Value, retries: u32) -> Result<Value, HubError> {
        let text = self.post(path, body, retries).await?;
        serde_json::from_str(&text).map_err(|e| self.invalid(e.to_string()))
    }

    /// POST `body` to `path`, retrying failed attempts
    async fn post(&self, path: &str, body: &Value, retries: u32) -> Result<String, HubError> {
        let url = format!("{}{}", self.url(), path);
        let mut attempt = 0;

        loop {
            match self.send_once(&url, body).await {
                Ok(text) => return Ok(text),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    debug!(%url, error = %err, attempt, "Hub request failed, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn send_once(&self, url: &str, body: &Value) -> Result<String, HubError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.invalid(format!("HTTP {status}")));
        }

        response.text().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, err: reqwest::Error) -> HubError {
        let ip = self.ip_address.clone();
        if err.is_timeout() {
            HubError::Timeout { ip, source: err }
        } else if err.is_connect() || err.is_request() {
            HubError::Connection { ip, source: err }
        } else {
            HubError::InvalidResponse {
                ip,
                reason: err.to_string(),
            }
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> HubError {
        HubError::InvalidResponse {
            ip: self.ip_address.clone(),
            reason: reason.into(),
        }
    }
}

/// Set the API key and upsert the server endpoint in a hub configuration
fn apply_server_endpoint(config: &mut Value, api_key: &str, server_address: &str) {
    config["api_key"] = json!(api_key);

    let endpoint_config = json!({
        "url": server_address,
        "data_format": "json",
    });

    if !config["endpoints"].is_array() {
        config["endpoints"] = json!([]);
    }
    let Some(endpoints) = config["endpoints"].as_array_mut() else {
        return;
    };

    if let Some(existing) = endpoints
        .iter_mut()
        .find(|endpoint| endpoint["name"] == ENDPOINT_NAME)
    {
        existing["type"] = json!("custom");
        existing["enabled"] = json!(true);
        existing["config"] = endpoint_config;
        return;
    }

    let next_id = endpoints
        .iter()
        .filter_map(|endpoint| endpoint["id"].as_u64())
        .max()
        .map_or(1, |id| id + 1);

    endpoints.push(json!({
        "id": next_id,
        "name": ENDPOINT_NAME,
        "type": "custom",
        "enabled": true,
        "config": endpoint_config,
    }));
}
