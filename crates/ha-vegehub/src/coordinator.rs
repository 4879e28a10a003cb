//! Coordinator for pushed VegeHub readings

use std::collections::HashMap;
use std::sync::Arc;

use ha_hass::DataUpdateCoordinator;
use tracing::debug;

/// Latest reading per entity key
pub type SensorData = HashMap<String, f64>;

pub struct VegeHubCoordinator {
    device_id: String,
    inner: Arc<DataUpdateCoordinator<SensorData>>,
}

impl VegeHubCoordinator {
    /// The hub pushes its data, so there is no polling interval
    pub fn new(device_id: impl Into<String>) -> Arc<Self> {
        let device_id = device_id.into();
        let inner = DataUpdateCoordinator::new(format!("{device_id} DataUpdateCoordinator"), None);
        Arc::new(Self { device_id, inner })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Merge pushed readings into the current data and notify entities once
    pub fn async_update_data(&self, sensor_data: SensorData) {
        debug!(device_id = %self.device_id, readings = sensor_data.len(), "Received readings");
        self.inner.async_modify_data(|data| {
            data.get_or_insert_with(HashMap::new).extend(sensor_data);
        });
    }

    pub fn value(&self, key: &str) -> Option<f64> {
        self.inner.data()?.get(key).copied()
    }

    pub fn data(&self) -> SensorData {
        self.inner.data().unwrap_or_default()
    }

    pub fn coordinator(&self) -> &Arc<DataUpdateCoordinator<SensorData>> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_merges_and_notifies_once() {
        let coordinator = VegeHubCoordinator::new("A1B2C3D4E5F6");
        assert_eq!(
            coordinator.coordinator().name(),
            "A1B2C3D4E5F6 DataUpdateCoordinator"
        );

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _listener = coordinator.coordinator().async_add_listener(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.async_update_data(HashMap::from([
            ("vegehub_a1b2c3d4e5f6_1".to_string(), 1.5),
            ("vegehub_a1b2c3d4e5f6_2".to_string(), 2.5),
        ]));
        coordinator.async_update_data(HashMap::from([("vegehub_a1b2c3d4e5f6_1".to_string(), 1.75)]));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.value("vegehub_a1b2c3d4e5f6_1"), Some(1.75));
        assert_eq!(coordinator.value("vegehub_a1b2c3d4e5f6_2"), Some(2.5));
        assert_eq!(coordinator.data().len(), 2);
    }
}
