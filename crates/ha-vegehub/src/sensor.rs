//! VegeHub sensor platform
//!
//! One voltage sensor per analog input plus a diagnostic battery sensor in
//! the slot after the last input. Entities take their values from the
//! coordinator whenever the hub pushes readings.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use ha_config_entries::ConfigEntry;
use ha_core::{Context, EntityId, STATE_UNKNOWN};
use ha_hass::{CoordinatorListener, EntityPlatform, HomeAssistant, SetupError};
use ha_registries::{EntityCategory, EntityRegistration};
use ha_state_store::StateStore;
use serde_json::{json, Value};
use tracing::debug;

use crate::consts::{CONF_HOST, CONF_MAC, DOMAIN};
use crate::coordinator::{SensorData, VegeHubCoordinator};
use crate::webhook::entity_key;
use crate::VegeHubData;

const SENSOR_DOMAIN: &str = "sensor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorKind {
    Analog,
    Battery,
}

#[derive(Debug, Clone)]
struct VegeHubSensor {
    entity_id: EntityId,
    key: String,
    friendly_name: String,
}

impl VegeHubSensor {
    fn attributes(&self) -> HashMap<String, Value> {
        HashMap::from([
            ("device_class".to_string(), json!("voltage")),
            ("unit_of_measurement".to_string(), json!("V")),
            ("state_class".to_string(), json!("measurement")),
            ("friendly_name".to_string(), json!(self.friendly_name)),
        ])
    }

    fn write_state(&self, states: &StateStore, value: Option<f64>) {
        let state = value.map_or_else(|| STATE_UNKNOWN.to_string(), |v| v.to_string());
        states.set(self.entity_id.clone(), state, self.attributes(), Context::new());
    }
}

/// Entities and listener owned by one config entry
struct LoadedEntry {
    sensors: Vec<VegeHubSensor>,
    listener: CoordinatorListener<SensorData>,
}

#[derive(Default)]
pub struct VegeHubSensorPlatform {
    loaded: DashMap<String, LoadedEntry>,
}

impl VegeHubSensorPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entity ids created for an entry, inputs first then battery
    pub fn entity_ids(&self, entry_id: &str) -> Vec<String> {
        self.loaded
            .get(entry_id)
            .map(|loaded| loaded.sensors.iter().map(|s| s.entity_id.to_string()).collect())
            .unwrap_or_default()
    }
}

fn write_from_coordinator(
    states: &StateStore,
    coordinator: &Weak<VegeHubCoordinator>,
    sensors: &[VegeHubSensor],
) {
    let Some(coordinator) = coordinator.upgrade() else {
        return;
    };
    let data = coordinator.data();
    for sensor in sensors {
        if let Some(value) = data.get(&sensor.key) {
            sensor.write_state(states, Some(*value));
        }
    }
}

#[async_trait]
impl EntityPlatform for VegeHubSensorPlatform {
    async fn async_setup_entry(
        &self,
        hass: &Arc<HomeAssistant>,
        entry: &ConfigEntry,
    ) -> Result<(), SetupError> {
        let runtime = hass
            .config_entries
            .runtime_data::<VegeHubData>(&entry.entry_id)
            .ok_or_else(|| SetupError::ConfigEntryError("Hub runtime data missing".into()))?;

        let mac = entry.data_str(CONF_MAC).unwrap_or_default();
        let device_name = entry.data_str(CONF_HOST).unwrap_or(&entry.title);
        let device_id = hass
            .registries
            .devices
            .get_by_identifier(DOMAIN, mac)
            .map(|device| device.id.clone());

        let num_sensors = runtime.hub.num_sensors();
        let slots = (1..=num_sensors)
            .map(|slot| (slot, SensorKind::Analog, format!("Input {slot}")))
            .chain(std::iter::once((
                num_sensors + 1,
                SensorKind::Battery,
                "Battery voltage".to_string(),
            )));

        let mut sensors = Vec::new();
        for (slot, kind, name) in slots {
            let key = entity_key(mac, slot);
            let friendly_name = format!("{device_name} {name}");

            let registered = hass.registries.entities.get_or_create(EntityRegistration {
                domain: SENSOR_DOMAIN,
                platform: DOMAIN,
                unique_id: &key,
                suggested_object_id: &friendly_name,
                config_entry_id: Some(&entry.entry_id),
                device_id: device_id.as_deref(),
                original_name: Some(&name),
                entity_category: (kind == SensorKind::Battery).then_some(EntityCategory::Diagnostic),
            });

            let entity_id = registered
                .entity_id
                .parse::<EntityId>()
                .map_err(|e| SetupError::ConfigEntryError(e.to_string()))?;

            let sensor = VegeHubSensor {
                entity_id,
                key,
                friendly_name,
            };
            sensor.write_state(&hass.states, runtime.coordinator.value(&sensor.key));
            sensors.push(sensor);
        }

        let states = Arc::clone(&hass.states);
        let weak_coordinator = Arc::downgrade(&runtime.coordinator);
        let listening = sensors.clone();
        let listener = runtime.coordinator.coordinator().async_add_listener(move || {
            write_from_coordinator(&states, &weak_coordinator, &listening);
        });

        debug!(entry_id = %entry.entry_id, count = sensors.len(), "Added VegeHub sensors");
        self.loaded
            .insert(entry.entry_id.clone(), LoadedEntry { sensors, listener });
        Ok(())
    }

    async fn async_unload_entry(&self, hass: &Arc<HomeAssistant>, entry: &ConfigEntry) -> bool {
        if let Some((_, loaded)) = self.loaded.remove(&entry.entry_id) {
            loaded.listener.remove();
            for sensor in &loaded.sensors {
                hass.states.remove(&sensor.entity_id, Context::new());
            }
        }
        true
    }
}
