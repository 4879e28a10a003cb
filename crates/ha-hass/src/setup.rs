//! Config entry setup and unload
//!
//! Drives an entry through its lifecycle states around the integration's
//! setup and unload hooks, schedules retries for entries that are not
//! ready and forwards entries to entity platforms.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use ha_config_entries::{calculate_retry_delay, ConfigEntriesError, ConfigEntry, ConfigEntryState};
use tracing::{debug, error, info, instrument, warn};

use crate::integration::{Platform, SetupError};
use crate::HomeAssistant;

/// Set up a config entry
///
/// Integration failures are recorded on the entry rather than returned:
/// a "not ready" error moves it to `SetupRetry` and schedules another
/// attempt, any other error moves it to `SetupError`. Returns whether the
/// entry ended up loaded.
#[instrument(skip(hass))]
pub async fn async_setup_entry(hass: &Arc<HomeAssistant>, entry_id: &str) -> Result<bool, SetupError> {
    let lock = hass.config_entries.entry_lock(entry_id);
    let _guard = lock.lock().await;

    let entry = hass
        .config_entries
        .get(entry_id)
        .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

    if entry.is_disabled() {
        debug!("Skipping setup of disabled entry {}", entry.title);
        return Ok(false);
    }

    let Some(integration) = hass.integration(&entry.domain) else {
        hass.config_entries.set_state(
            entry_id,
            ConfigEntryState::SetupInProgress,
            None,
        )?;
        hass.config_entries.set_state(
            entry_id,
            ConfigEntryState::SetupError,
            Some("Integration not found".to_string()),
        )?;
        error!("Integration {} not found for entry {}", entry.domain, entry.title);
        return Ok(false);
    };

    hass.config_entries
        .set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

    let result = integration.async_setup_entry(hass, &entry).await;

    match result {
        Ok(true) => {
            hass.config_entries
                .set_state(entry_id, ConfigEntryState::Loaded, None)?;
            info!("Set up {} entry {}", entry.domain, entry.title);
            Ok(true)
        }
        Ok(false) => {
            error!("Setup of {} entry {} failed", entry.domain, entry.title);
            discard_setup(hass, entry_id);
            hass.config_entries
                .set_state(entry_id, ConfigEntryState::SetupError, None)?;
            Ok(false)
        }
        Err(SetupError::ConfigEntryNotReady(reason)) => {
            let tries = hass.config_entries.increment_tries(entry_id).unwrap_or(0);
            let delay = calculate_retry_delay(tries);
            warn!(
                "Config entry {} for {} not ready yet: {}; retrying in {:?}",
                entry.title, entry.domain, reason, delay
            );

            discard_setup(hass, entry_id);
            hass.config_entries
                .set_state(entry_id, ConfigEntryState::SetupRetry, Some(reason))?;

            hass.config_entries.create_background_task(
                entry_id,
                "setup retry",
                retry_setup(Arc::clone(hass), entry_id.to_string(), delay),
            );
            Ok(false)
        }
        Err(err) => {
            error!(
                "Error setting up entry {} for {}: {}",
                entry.title, entry.domain, err
            );
            discard_setup(hass, entry_id);
            hass.config_entries.set_state(
                entry_id,
                ConfigEntryState::SetupError,
                Some(err.to_string()),
            )?;
            Ok(false)
        }
    }
}

fn retry_setup(
    hass: Arc<HomeAssistant>,
    entry_id: String,
    delay: std::time::Duration,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        if let Err(err) = async_setup_entry(&hass, &entry_id).await {
            error!(%entry_id, error = %err, "Retrying setup failed");
        }
    })
}

/// Drop what a failed setup attempt left behind
fn discard_setup(hass: &HomeAssistant, entry_id: &str) {
    hass.config_entries.run_unload_callbacks(entry_id);
    hass.config_entries.clear_runtime_data(entry_id);
}

/// Unload a config entry
///
/// Returns whether the integration unloaded cleanly. Entries that never
/// finished setup are torn down without calling the integration.
#[instrument(skip(hass))]
pub async fn async_unload_entry(hass: &Arc<HomeAssistant>, entry_id: &str) -> Result<bool, SetupError> {
    let lock = hass.config_entries.entry_lock(entry_id);
    let _guard = lock.lock().await;

    let entry = hass
        .config_entries
        .get(entry_id)
        .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

    if !entry.state.is_recoverable() {
        return Err(ConfigEntriesError::CannotUnload(entry.state).into());
    }
    if entry.state == ConfigEntryState::NotLoaded {
        return Ok(true);
    }

    hass.config_entries
        .set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

    let unloaded = if entry.state == ConfigEntryState::Loaded {
        match hass.integration(&entry.domain) {
            Some(integration) => integration.async_unload_entry(hass, &entry).await,
            None => true,
        }
    } else {
        true
    };

    if !unloaded {
        warn!("Unloading {} entry {} failed", entry.domain, entry.title);
        hass.config_entries.set_state(
            entry_id,
            ConfigEntryState::FailedUnload,
            Some("Unload failed".to_string()),
        )?;
        return Ok(false);
    }

    // No task may register unload callbacks once they have run
    hass.config_entries.cancel_background_tasks(entry_id);
    hass.config_entries.run_unload_callbacks(entry_id);
    hass.config_entries.clear_runtime_data(entry_id);
    hass.config_entries
        .set_state(entry_id, ConfigEntryState::NotLoaded, None)?;

    info!("Unloaded {} entry {}", entry.domain, entry.title);
    Ok(true)
}

/// Set up the entity platforms of an entry concurrently
pub async fn async_forward_entry_setups(
    hass: &Arc<HomeAssistant>,
    entry: &ConfigEntry,
    platforms: &[Platform],
) -> Result<(), SetupError> {
    let integration = hass
        .integration(&entry.domain)
        .ok_or_else(|| SetupError::IntegrationNotFound(entry.domain.clone()))?;

    let setups = platforms.iter().map(|&platform| {
        let integration = Arc::clone(&integration);
        async move {
            let handler = integration
                .platform(platform)
                .ok_or_else(|| SetupError::PlatformNotFound {
                    domain: entry.domain.clone(),
                    platform,
                })?;
            debug!("Forwarding {} entry {} to {}", entry.domain, entry.title, platform);
            handler.async_setup_entry(hass, entry).await
        }
    });

    join_all(setups).await.into_iter().collect()
}

/// Unload the entity platforms of an entry; true only if all of them unloaded
pub async fn async_unload_platforms(
    hass: &Arc<HomeAssistant>,
    entry: &ConfigEntry,
    platforms: &[Platform],
) -> bool {
    let Some(integration) = hass.integration(&entry.domain) else {
        return false;
    };

    let unloads = platforms.iter().map(|&platform| {
        let handler = integration.platform(platform);
        async move {
            match handler {
                Some(handler) => handler.async_unload_entry(hass, entry).await,
                None => false,
            }
        }
    });

    join_all(unloads).await.into_iter().all(|ok| ok)
}
