//! Entry setup, webhook pushes and unload against a fake hub

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{add_entry, hass_with, wait_for, FakeHub, CHANNELS, FIRMWARE, INTERNAL_URL, MAC};
use ha_config_entries::ConfigEntryState;
use ha_hass::{async_setup_entry, async_unload_entry};
use ha_registries::EntityCategory;
use ha_vegehub::{VegeHubData, VegeHubIntegration};
use tower::ServiceExt;

fn webhook_id(url: &str) -> String {
    url.rsplit('/').next().unwrap().to_string()
}

async fn push(hass: &ha_hass::HomeAssistant, webhook_id: &str, body: &'static str) -> StatusCode {
    let router = ha_webhook::create_router(hass.webhooks.clone());
    let response = router
        .oneshot(
            Request::post(format!("/api/webhook/{webhook_id}"))
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    response.status()
}

#[tokio::test]
async fn test_setup_registers_device_and_sensors() {
    let hub = FakeHub::start().await;
    let (_dir, hass, integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &hub.ip()).await;

    assert!(async_setup_entry(&hass, &entry_id).await.unwrap());
    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::Loaded);

    let device = hass
        .registries
        .devices
        .get_by_identifier("vegehub", MAC)
        .expect("device registered");
    assert_eq!(device.manufacturer.as_deref(), Some("vegetronix"));
    assert_eq!(device.model.as_deref(), Some("VegeHub"));
    assert_eq!(device.name.as_deref(), Some("vegehub-garden"));
    assert_eq!(device.sw_version.as_deref(), Some(FIRMWARE));
    let expected_url = format!("http://{}", hub.ip());
    assert_eq!(device.configuration_url.as_deref(), Some(expected_url.as_str()));

    let pushed_url = hub.pushed_url().expect("endpoint configured");
    assert!(pushed_url.starts_with(&format!("{INTERNAL_URL}/api/webhook/")));
    assert_eq!(hub.state(|h| h.updates_requested), 1);
    assert_eq!(hub.state(|h| h.config["endpoints"].as_array().unwrap().len()), 2);

    let runtime = hass
        .config_entries
        .runtime_data::<VegeHubData>(&entry_id)
        .unwrap();
    assert_eq!(runtime.hub.num_sensors(), CHANNELS);
    assert_eq!(runtime.hub.unique_id(), MAC);

    let entity_ids = integration.sensor_platform().entity_ids(&entry_id);
    assert_eq!(
        entity_ids,
        vec![
            "sensor.vegehub_garden_input_1",
            "sensor.vegehub_garden_input_2",
            "sensor.vegehub_garden_battery_voltage",
        ]
    );
    for entity_id in &entity_ids {
        let state = hass.states.get(entity_id).unwrap();
        assert_eq!(state.state, "unknown");
        assert_eq!(state.attributes["unit_of_measurement"], "V");
        assert_eq!(state.attributes["device_class"], "voltage");
    }

    let battery = hass
        .registries
        .entities
        .get("sensor.vegehub_garden_battery_voltage")
        .unwrap();
    assert_eq!(battery.unique_id, "vegehub_a1b2c3d4e5f6_3");
    assert_eq!(battery.entity_category, Some(EntityCategory::Diagnostic));
    assert_eq!(battery.device_id.as_deref(), Some(device.id.as_str()));
}

#[tokio::test]
async fn test_push_updates_states_and_stop_unregisters() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &hub.ip()).await;
    assert!(async_setup_entry(&hass, &entry_id).await.unwrap());

    let webhook_id = webhook_id(&hub.pushed_url().unwrap());
    assert!(wait_for(|| hass.webhooks.is_registered(&webhook_id)).await);
    assert_eq!(
        hass.webhooks.get(&webhook_id).unwrap().name,
        format!("VegeHub {MAC}")
    );

    let status = push(
        &hass,
        &webhook_id,
        r#"{"sensors":[{"slot":1,"samples":[{"v":1.0},{"v":3.3}]},{"slot":3,"samples":[{"v":4.1}]}]}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        hass.states.get_state("sensor.vegehub_garden_input_1").as_deref(),
        Some("3.3")
    );
    assert_eq!(
        hass.states.get_state("sensor.vegehub_garden_input_2").as_deref(),
        Some("unknown")
    );
    assert_eq!(
        hass.states.get_state("sensor.vegehub_garden_battery_voltage").as_deref(),
        Some("4.1")
    );

    assert_eq!(push(&hass, &webhook_id, "").await, StatusCode::BAD_REQUEST);

    hass.async_stop().await;
    assert!(wait_for(|| !hass.webhooks.is_registered(&webhook_id)).await);
}

#[tokio::test]
async fn test_unload_drops_runtime_data_and_states() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &hub.ip()).await;
    assert!(async_setup_entry(&hass, &entry_id).await.unwrap());

    let webhook_id = webhook_id(&hub.pushed_url().unwrap());
    assert!(wait_for(|| hass.webhooks.is_registered(&webhook_id)).await);

    assert!(async_unload_entry(&hass, &entry_id).await.unwrap());
    assert_eq!(
        hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::NotLoaded
    );
    assert!(!hass.config_entries.has_runtime_data(&entry_id));
    assert!(hass.states.get("sensor.vegehub_garden_input_1").is_none());

    // The stop listener went away with the entry
    hass.async_stop().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(hass.webhooks.is_registered(&webhook_id));
}

#[tokio::test]
async fn test_connection_refused_is_setup_error() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &addr.to_string()).await;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());

    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(entry.reason.as_deref(), Some("Error connecting to device"));
    assert!(!hass.config_entries.has_runtime_data(&entry_id));
    assert!(hass.registries.devices.is_empty());
}

#[tokio::test]
async fn test_slow_hub_is_retried() {
    let hub = FakeHub::start_with_delay(Duration::from_secs(2)).await;
    let integration = VegeHubIntegration::new().with_hub_timeout(Duration::from_millis(100));
    let (_dir, hass, _integration) = hass_with(integration);
    let entry_id = add_entry(&hass, &hub.ip()).await;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());

    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupRetry);
    assert_eq!(entry.reason.as_deref(), Some("Device is not responding"));
    assert_eq!(entry.tries, 1);
    // Setup retries a request once, then gives up
    assert!(wait_for(|| hub.state(|h| h.config_requests) == 2).await);

    // Unloading cancels the scheduled retry
    assert!(async_unload_entry(&hass, &entry_id).await.unwrap());
    assert_eq!(
        hass.config_entries.get(&entry_id).unwrap().state,
        ConfigEntryState::NotLoaded
    );
}

#[tokio::test]
async fn test_entry_without_unique_id_fails() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry = ha_config_entries::ConfigEntry::new("vegehub", "no id").with_data(
        [
            ("ip_address".to_string(), serde_json::json!(hub.ip())),
            ("mac_address".to_string(), serde_json::json!(MAC)),
        ]
        .into_iter()
        .collect(),
    );
    let entry_id = hass.config_entries.add(entry).await.unwrap().entry_id;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());
    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(entry.reason.as_deref(), Some("Config entry has no unique id"));
    assert_eq!(hub.state(|h| h.info_requests), 0);
}

#[tokio::test]
async fn test_failing_hub_is_asked_twice() {
    let hub = FakeHub::start_with(|h| h.fail_config = true).await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &hub.ip()).await;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());

    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(entry.reason.as_deref(), Some("Error connecting to device"));
    assert_eq!(hub.state(|h| h.config_requests), 2);
    assert_eq!(hub.state(|h| h.info_requests), 0);
}

#[tokio::test]
async fn test_rejected_update_request_fails_setup() {
    let hub = FakeHub::start_with(|h| h.fail_updates = true).await;
    let (_dir, hass, integration) = hass_with(VegeHubIntegration::new());
    let entry_id = add_entry(&hass, &hub.ip()).await;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());

    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(entry.reason.as_deref(), Some("Error connecting to device"));
    assert_eq!(hub.state(|h| h.updates_requested), 1);
    assert!(!hass.config_entries.has_runtime_data(&entry_id));
    assert!(integration.sensor_platform().entity_ids(&entry_id).is_empty());
    assert!(hass.states.get("sensor.vegehub_garden_input_1").is_none());
}

#[tokio::test]
async fn test_entry_without_mac_fails() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());
    let entry = ha_config_entries::ConfigEntry::new("vegehub", "no mac")
        .with_data(
            [("ip_address".to_string(), serde_json::json!(hub.ip()))]
                .into_iter()
                .collect(),
        )
        .with_unique_id(MAC);
    let entry_id = hass.config_entries.add(entry).await.unwrap().entry_id;

    assert!(!async_setup_entry(&hass, &entry_id).await.unwrap());

    let entry = hass.config_entries.get(&entry_id).unwrap();
    assert_eq!(entry.state, ConfigEntryState::SetupError);
    assert_eq!(entry.reason.as_deref(), Some("Config entry has no mac_address"));
    assert_eq!(hub.state(|h| h.config_requests), 0);
    assert!(hass.registries.devices.is_empty());
}
