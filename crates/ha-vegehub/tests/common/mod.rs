//! Shared fixtures for VegeHub tests
//!
//! [`FakeHub`] serves the hub's local JSON API on an ephemeral port and
//! records what it was asked to do.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use ha_config::Config;
use ha_config_entries::ConfigEntry;
use ha_hass::HomeAssistant;
use ha_vegehub::VegeHubIntegration;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const MAC: &str = "A1B2C3D4E5F6";
pub const FIRMWARE: &str = "5.1.1";
pub const CHANNELS: u32 = 2;
pub const INTERNAL_URL: &str = "http://192.0.2.5:8123";

#[derive(Debug)]
pub struct HubState {
    pub config: Value,
    pub config_requests: usize,
    pub updates_requested: usize,
    pub info_requests: usize,
    pub delay: Duration,
    /// Answer `config/get` with HTTP 500
    pub fail_config: bool,
    /// Answer `update/send` with HTTP 500
    pub fail_updates: bool,
}

type Shared = Arc<Mutex<HubState>>;

pub struct FakeHub {
    pub addr: SocketAddr,
    state: Shared,
    server: JoinHandle<()>,
}

impl FakeHub {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Every request is answered only after `delay`
    pub async fn start_with_delay(delay: Duration) -> Self {
        Self::start_with(|hub| hub.delay = delay).await
    }

    /// Start with the initial state adjusted by `configure`
    pub async fn start_with(configure: impl FnOnce(&mut HubState)) -> Self {
        let mut hub = HubState {
            config: json!({
                "hub": { "name": "garden" },
                "api_key": "",
                "endpoints": [{ "id": 1, "name": "Cloud", "type": "vegecloud", "enabled": false }],
            }),
            config_requests: 0,
            updates_requested: 0,
            info_requests: 0,
            delay: Duration::ZERO,
            fail_config: false,
            fail_updates: false,
        };
        configure(&mut hub);
        let state = Arc::new(Mutex::new(hub));

        let router = Router::new()
            .route("/api/config/get", post(config_get))
            .route("/api/config/set", post(config_set))
            .route("/api/info/get", post(info_get))
            .route("/api/update/send", post(update_send))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            addr,
            state,
            server,
        }
    }

    /// What the integration uses as the hub's IP address
    pub fn ip(&self) -> String {
        self.addr.to_string()
    }

    pub fn state<R>(&self, read: impl FnOnce(&HubState) -> R) -> R {
        read(&self.state.lock().unwrap())
    }

    /// URL of the endpoint the integration configured on the hub
    pub fn pushed_url(&self) -> Option<String> {
        self.state(|hub| {
            hub.config["endpoints"]
                .as_array()?
                .iter()
                .find(|endpoint| endpoint["name"] == "HomeAssistant")?["config"]["url"]
                .as_str()
                .map(str::to_string)
        })
    }
}

impl Drop for FakeHub {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn delayed(state: &Shared) {
    let delay = state.lock().unwrap().delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

async fn config_get(
    State(state): State<Shared>,
    Json(_): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.lock().unwrap().config_requests += 1;
    delayed(&state).await;
    let hub = state.lock().unwrap();
    if hub.fail_config {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(hub.config.clone()))
}

async fn config_set(State(state): State<Shared>, Json(config): Json<Value>) -> Json<Value> {
    delayed(&state).await;
    state.lock().unwrap().config = config;
    Json(json!({ "error": "success" }))
}

async fn info_get(State(state): State<Shared>, Json(_): Json<Value>) -> Json<Value> {
    delayed(&state).await;
    state.lock().unwrap().info_requests += 1;
    Json(json!({
        "hub": {
            "firmware_version": FIRMWARE,
            "num_channels": CHANNELS,
            "num_actuators": 1,
        },
        "wifi": { "mac_addr": "a1:b2:c3:d4:e5:f6" },
    }))
}

async fn update_send(
    State(state): State<Shared>,
    Json(_): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    delayed(&state).await;
    let mut hub = state.lock().unwrap();
    hub.updates_requested += 1;
    if hub.fail_updates {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "error": "success" })))
}

/// Host with the VegeHub integration registered and a fixed internal URL
pub fn hass_with(integration: VegeHubIntegration) -> (TempDir, Arc<HomeAssistant>, Arc<VegeHubIntegration>) {
    let dir = TempDir::new().unwrap();
    let config =
        Config::from_yaml_str(&format!("homeassistant:\n  internal_url: {INTERNAL_URL}\n")).unwrap();
    let hass = HomeAssistant::new(dir.path(), config);

    let integration = Arc::new(integration);
    hass.register_integration(integration.clone());
    (dir, hass, integration)
}

/// Entry as the config flow creates it for a manually added hub
pub async fn add_entry(hass: &HomeAssistant, ip: &str) -> String {
    let data = HashMap::from([
        ("mac_address".to_string(), json!(MAC)),
        ("ip_address".to_string(), json!(ip)),
        ("host".to_string(), json!("vegehub-garden")),
        ("sw_version".to_string(), Value::Null),
        ("configuration_url".to_string(), json!(format!("http://{ip}"))),
    ]);
    let entry = ConfigEntry::new("vegehub", "vegehub-garden")
        .with_data(data)
        .with_unique_id(MAC);
    hass.config_entries.add(entry).await.unwrap().entry_id
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
