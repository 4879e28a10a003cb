//! Webhook handler for readings pushed by a hub
//!
//! Payload: `{"sensors": [{"slot": 1, "samples": [{"v": 3.3, ...}, ...]}]}`.
//! Only the last sample of each sensor is used.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use ha_webhook::{
    StatusCode, WebhookError, WebhookHandler, WebhookRequest, WebhookResponse, WebhookResult,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::coordinator::{SensorData, VegeHubCoordinator};

/// Key of a hub channel: coordinator key and sensor unique id
pub fn entity_key(mac: &str, slot: impl Display) -> String {
    format!("vegehub_{mac}_{slot}").to_lowercase()
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    sensors: Option<Vec<SensorReport>>,
}

#[derive(Debug, Deserialize)]
struct SensorReport {
    #[serde(default)]
    slot: Option<i64>,
    samples: Vec<Sample>,
}

#[derive(Debug, Deserialize)]
struct Sample {
    v: f64,
}

/// Extract the latest reading of every reported sensor
pub fn parse_sensor_payload(mac: &str, body: &[u8]) -> WebhookResult<SensorData> {
    let payload: Payload =
        serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

    let mut sensor_data = SensorData::new();
    for sensor in payload.sensors.unwrap_or_default() {
        // A sensor without a slot still reports, under the `none` key
        let slot = sensor
            .slot
            .map_or_else(|| "none".to_string(), |slot| slot.to_string());
        let latest = sensor.samples.last().ok_or_else(|| {
            WebhookError::InvalidPayload(format!("sensor in slot {slot} has no samples"))
        })?;
        sensor_data.insert(entity_key(mac, slot), latest.v);
    }
    Ok(sensor_data)
}

/// Webhook handler bound to one hub
pub struct VegeHubWebhookHandler {
    device_mac: String,
    entry_id: String,
    coordinator: Arc<VegeHubCoordinator>,
}

impl VegeHubWebhookHandler {
    pub fn new(
        device_mac: impl Into<String>,
        entry_id: impl Into<String>,
        coordinator: Arc<VegeHubCoordinator>,
    ) -> Self {
        Self {
            device_mac: device_mac.into(),
            entry_id: entry_id.into(),
            coordinator,
        }
    }
}

#[async_trait]
impl WebhookHandler for VegeHubWebhookHandler {
    #[instrument(skip(self, request), fields(mac = %self.device_mac, entry_id = %self.entry_id))]
    async fn handle(
        &self,
        _webhook_id: &str,
        request: WebhookRequest,
    ) -> WebhookResult<WebhookResponse> {
        if !request.has_body() {
            return Ok(WebhookResponse::json(
                StatusCode::BAD_REQUEST,
                json!({ "result": "No Body" }),
            ));
        }

        let sensor_data = parse_sensor_payload(&self.device_mac, &request.body)?;
        debug!(readings = sensor_data.len(), "Parsed hub push");

        if !sensor_data.is_empty() {
            self.coordinator.async_update_data(sensor_data);
        }

        Ok(WebhookResponse::json(StatusCode::OK, json!({ "result": "OK" })))
    }
}
