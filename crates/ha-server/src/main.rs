//! Home Assistant Rust Server
//!
//! Loads the configuration directory, sets up the stored config entries,
//! imports hubs listed in configuration.yaml and serves webhooks until
//! interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use ha_config::Config;
use ha_hass::{FlowInit, FlowResult, HomeAssistant};
use ha_vegehub::{consts::DOMAIN, HubConfig, VegeHubIntegration};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Config directory from the first argument, `HA_CONFIG_DIR`, or `./config`
fn config_dir() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("HA_CONFIG_DIR").ok())
        .unwrap_or_else(|| "config".to_string())
        .into()
}

/// Start a flow for every hub listed under `vegehub:`
async fn import_yaml_hubs(hass: &Arc<HomeAssistant>) -> Result<()> {
    let hubs: Vec<HubConfig> = hass.config.integration(DOMAIN)?.unwrap_or_default();

    for hub in hubs {
        let outcome = hass
            .flows
            .async_init(hass, DOMAIN, FlowInit::Import(hub.flow_input()))
            .await?;
        match outcome.result {
            FlowResult::CreateEntry { title, .. } => info!("Imported VegeHub {}", title),
            FlowResult::Abort { reason } if reason == "already_configured" => {}
            other => warn!("Importing VegeHub at {} failed: {:?}", hub.ip_address, other),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Home Assistant (Rust)");

    let config_dir = config_dir();
    let config = Config::load(&config_dir).context("loading configuration")?;
    let bind_addr = format!("{}:{}", config.http.server_host, config.http.server_port);

    let hass = HomeAssistant::new(&config_dir, config);
    hass.async_load().await.context("loading .storage")?;
    hass.register_integration(Arc::new(VegeHubIntegration::new()));

    // Hubs start pushing as soon as they are set up
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    let router = ha_webhook::create_router(Arc::clone(&hass.webhooks));
    let server = tokio::spawn(async move { axum::serve(listener, router).await });
    info!("Serving webhooks on {}", bind_addr);

    hass.async_setup_entries().await;
    import_yaml_hubs(&hass).await?;

    info!("Home Assistant is running");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    hass.async_stop().await;
    server.abort();

    Ok(())
}
