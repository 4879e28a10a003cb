//! Config flows through the host flow manager

mod common;

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use common::{hass_with, FakeHub, MAC};
use ha_config_entries::{ConfigEntrySource, ConfigEntryState};
use ha_hass::{FlowInit, FlowResult, UserInput, ZeroconfServiceInfo};
use ha_vegehub::{DiscoveredHubs, VegeHubIntegration};
use serde_json::json;

fn ip_input(ip: &str) -> UserInput {
    HashMap::from([("ip_address".to_string(), json!(ip))])
}

fn discovery(ip: &str) -> ZeroconfServiceInfo {
    ZeroconfServiceInfo {
        ip_address: ip.parse::<IpAddr>().unwrap(),
        hostname: "vegehub-garden.local.".to_string(),
        port: Some(80),
        service_type: "_vege._tcp.local.".to_string(),
        name: "VegeHub Garden._vege._tcp.local.".to_string(),
        properties: HashMap::from([("version".to_string(), "5.1.1".to_string())]),
    }
}

#[tokio::test]
async fn test_manual_ip_creates_and_loads_entry() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());

    let outcome = hass
        .flows
        .async_init(&hass, "vegehub", FlowInit::User(None))
        .await
        .unwrap();
    assert!(matches!(outcome.result, FlowResult::Form { .. }));
    assert_eq!(hass.flows.in_progress(), 1);

    let outcome = hass
        .flows
        .async_configure(&hass, &outcome.flow_id, Some(ip_input(&hub.ip())))
        .await
        .unwrap();

    let FlowResult::CreateEntry { title, data } = &outcome.result else {
        panic!("expected entry, got {:?}", outcome.result);
    };
    assert_eq!(title, &hub.ip());
    assert_eq!(data["mac_address"], MAC);
    assert_eq!(data["configuration_url"], format!("http://{}", hub.ip()));
    assert_eq!(hass.flows.in_progress(), 0);

    let entry = outcome.entry.expect("entry created");
    assert_eq!(entry.unique_id.as_deref(), Some(MAC));
    assert_eq!(entry.source, ConfigEntrySource::User);
    assert_eq!(entry.state, ConfigEntryState::Loaded);
}

#[tokio::test]
async fn test_duplicate_mac_aborts() {
    let hub = FakeHub::start().await;
    let (_dir, hass, _integration) = hass_with(VegeHubIntegration::new());

    let first = hass
        .flows
        .async_init(&hass, "vegehub", FlowInit::User(Some(ip_input(&hub.ip()))))
        .await
        .unwrap();
    assert!(first.entry.is_some());

    let second = hass
        .flows
        .async_init(&hass, "vegehub", FlowInit::User(Some(ip_input(&hub.ip()))))
        .await
        .unwrap();
    assert_eq!(second.result, FlowResult::abort("already_configured"));
    assert_eq!(hass.config_entries.len(), 1);
}

#[tokio::test]
async fn test_unreachable_hub_aborts() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let integration = VegeHubIntegration::new().with_hub_timeout(Duration::from_millis(200));
    let (_dir, hass, _integration) = hass_with(integration);

    let outcome = hass
        .flows
        .async_init(
            &hass,
            "vegehub",
            FlowInit::User(Some(ip_input(&addr.to_string()))),
        )
        .await
        .unwrap();
    assert_eq!(outcome.result, FlowResult::abort("cannot_connect"));
    assert!(hass.config_entries.is_empty());
}

#[tokio::test]
async fn test_manual_flow_records_discovered_hub() {
    let hub = FakeHub::start().await;
    let discovered = DiscoveredHubs::default();
    discovered.insert("192.0.2.99".to_string(), MAC.to_string());
    let (_dir, hass, _integration) =
        hass_with(VegeHubIntegration::new().with_discovered_hubs(discovered.clone()));

    hass.flows
        .async_init(&hass, "vegehub", FlowInit::User(Some(ip_input(&hub.ip()))))
        .await
        .unwrap();

    // The hub moved, so its old address is forgotten
    assert!(!discovered.contains_key("192.0.2.99"));
    assert_eq!(
        discovered.get(&hub.ip()).map(|mac| mac.value().clone()),
        Some(MAC.to_string())
    );
}

#[tokio::test]
async fn test_zeroconf_reuses_known_mac() {
    let discovered = DiscoveredHubs::default();
    discovered.insert("192.0.2.10".to_string(), MAC.to_string());
    let integration = VegeHubIntegration::new()
        .with_discovered_hubs(discovered)
        .with_hub_timeout(Duration::from_millis(100));
    let (_dir, hass, _integration) = hass_with(integration);

    // Nothing listens on 192.0.2.10, so any hub request would fail the flow
    let outcome = hass
        .flows
        .async_init(&hass, "vegehub", FlowInit::Zeroconf(discovery("192.0.2.10")))
        .await
        .unwrap();
    let FlowResult::Form {
        data_schema,
        description_placeholders,
        ..
    } = &outcome.result
    else {
        panic!("expected confirmation, got {:?}", outcome.result);
    };
    assert!(data_schema.is_empty());
    assert_eq!(
        description_placeholders.get("host").map(String::as_str),
        Some("vegehub-garden (192.0.2.10)")
    );

    let outcome = hass
        .flows
        .async_configure(&hass, &outcome.flow_id, Some(UserInput::new()))
        .await
        .unwrap();
    let entry = outcome.entry.expect("entry created");
    assert_eq!(entry.title, "vegehub-garden");
    assert_eq!(entry.source, ConfigEntrySource::Zeroconf);
    assert_eq!(entry.unique_id.as_deref(), Some(MAC));
    assert_eq!(entry.data["sw_version"], "5.1.1");
    assert_eq!(entry.data["configuration_url"], "http://vegehub-garden.local:80");
}

#[tokio::test]
async fn test_zeroconf_already_configured() {
    let hub = FakeHub::start().await;
    let discovered = DiscoveredHubs::default();
    let (_dir, hass, _integration) =
        hass_with(VegeHubIntegration::new().with_discovered_hubs(discovered.clone()));

    hass.flows
        .async_init(&hass, "vegehub", FlowInit::User(Some(ip_input(&hub.ip()))))
        .await
        .unwrap();
    discovered.insert("192.0.2.10".to_string(), MAC.to_string());

    let outcome = hass
        .flows
        .async_init(&hass, "vegehub", FlowInit::Zeroconf(discovery("192.0.2.10")))
        .await
        .unwrap();
    assert_eq!(outcome.result, FlowResult::abort("already_configured"));
}
