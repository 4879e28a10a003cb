//! Config Entries Manager
//!
//! Owns the persisted entries plus everything an entry accumulates while it
//! is loaded: runtime data, unload callbacks and background tasks.

use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use ha_registries::{Storable, Storage, StorageResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::entry::{ConfigEntry, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::InvalidTransition;

/// Storage key for config entries
pub const STORAGE_KEY: &str = "core.config_entries";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists for domain {domain} with unique_id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error("Cannot unload entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Storage error: {0}")]
    Storage(#[from] ha_registries::StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Callback run once when an entry unloads
pub type UnloadCallback = Box<dyn FnOnce() + Send + Sync>;

/// Config entries data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEntriesData {
    pub entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct ConfigEntries {
    storage: Arc<Storage>,

    /// Primary index: entry_id -> ConfigEntry
    entries: DashMap<String, ConfigEntry>,

    /// Index: domain -> set of entry_ids
    by_domain: DashMap<String, HashSet<String>>,

    /// Index: (domain, unique_id) -> entry_id
    by_unique_id: DashMap<(String, String), String>,

    /// Serialises setup and unload of a single entry
    entry_locks: DashMap<String, Arc<Mutex<()>>>,

    /// Integration payload attached while an entry is loaded
    runtime_data: DashMap<String, Arc<dyn Any + Send + Sync>>,

    on_unload: DashMap<String, Vec<UnloadCallback>>,

    background_tasks: DashMap<String, Vec<JoinHandle<()>>>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            entry_locks: DashMap::new(),
            runtime_data: DashMap::new(),
            on_unload: DashMap::new(),
            background_tasks: DashMap::new(),
        }
    }

    /// Load entries from storage
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<ConfigEntriesData>().await? {
            info!(
                "Loading {} config entries from storage (v{}.{})",
                file.data.entries.len(),
                file.version,
                file.minor_version
            );
            for entry in file.data.entries {
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = ConfigEntriesData {
            entries: self.entries.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} config entries to storage", data.entries.len());
        Ok(())
    }

    fn index_entry(&self, entry: ConfigEntry) {
        let entry_id = entry.entry_id.clone();

        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry_id.clone());

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert((entry.domain.clone(), unique_id.clone()), entry_id.clone());
        }

        self.entries.insert(entry_id, entry);
    }

    fn unindex_entry(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }
        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
        self.entries.remove(&entry.entry_id);
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|r| r.value().clone())
    }

    pub fn get_by_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.by_domain
            .get(domain)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        self.by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))
            .and_then(|entry_id| self.get(&entry_id))
    }

    /// Add a new config entry, rejecting duplicate unique ids
    pub async fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(ref unique_id) = entry.unique_id {
            if self.get_by_unique_id(&entry.domain, unique_id).is_some() {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index_entry(entry.clone());
        self.save().await?;

        info!(
            "Added config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry.entry_id
        );
        Ok(entry)
    }

    pub async fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);

        if let Some(title) = update.title {
            entry.title = title;
        }
        if let Some(data) = update.data {
            entry.data = data;
        }
        if let Some(options) = update.options {
            entry.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            entry.unique_id = unique_id;
        }
        entry.modified_at = Utc::now();

        self.index_entry(entry.clone());
        self.save().await?;

        debug!("Updated config entry: {}", entry_id);
        Ok(entry)
    }

    /// Remove an entry and everything attached to it
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        self.unindex_entry(&entry);
        self.run_unload_callbacks(entry_id);
        self.cancel_background_tasks(entry_id);
        self.clear_runtime_data(entry_id);
        self.entry_locks.remove(entry_id);
        self.save().await?;

        info!(
            "Removed config entry: {} ({}) [{}]",
            entry.title, entry.domain, entry_id
        );
        Ok(entry)
    }

    /// Move an entry to a new lifecycle state
    pub fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        entry.try_set_state(state, reason)?;
        debug!("Entry {} state changed to {:?}", entry_id, state);
        Ok(())
    }

    /// Bump the retry counter of an entry, returning the tries before the bump
    pub fn increment_tries(&self, entry_id: &str) -> Option<u32> {
        self.entries.get_mut(entry_id).map(|mut entry| {
            let tries = entry.tries;
            entry.tries += 1;
            tries
        })
    }

    /// Lock held while an entry is being set up or unloaded
    pub fn entry_lock(&self, entry_id: &str) -> Arc<Mutex<()>> {
        self.entry_locks
            .entry(entry_id.to_string())
            .or_default()
            .clone()
    }

    pub fn set_runtime_data<T: Any + Send + Sync>(&self, entry_id: &str, data: Arc<T>) {
        self.runtime_data.insert(entry_id.to_string(), data);
    }

    /// Runtime data of a loaded entry, `None` if absent or of another type
    pub fn runtime_data<T: Any + Send + Sync>(&self, entry_id: &str) -> Option<Arc<T>> {
        let data = self.runtime_data.get(entry_id)?.value().clone();
        data.downcast::<T>().ok()
    }

    pub fn has_runtime_data(&self, entry_id: &str) -> bool {
        self.runtime_data.contains_key(entry_id)
    }

    pub fn clear_runtime_data(&self, entry_id: &str) {
        self.runtime_data.remove(entry_id);
    }

    /// Register a callback to run when the entry unloads
    pub fn async_on_unload(&self, entry_id: &str, callback: UnloadCallback) {
        self.on_unload
            .entry(entry_id.to_string())
            .or_default()
            .push(callback);
    }

    /// Run and forget the unload callbacks of an entry
    pub fn run_unload_callbacks(&self, entry_id: &str) {
        if let Some((_, callbacks)) = self.on_unload.remove(entry_id) {
            debug!("Running {} unload callbacks for {}", callbacks.len(), entry_id);
            for callback in callbacks {
                callback();
            }
        }
    }

    /// Spawn a task owned by the entry; it is aborted when the entry unloads
    pub fn create_background_task<F>(&self, entry_id: &str, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!("Starting background task {} for {}", name, entry_id);
        let handle = tokio::spawn(future);

        let mut tasks = self.background_tasks.entry(entry_id.to_string()).or_default();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub fn cancel_background_tasks(&self, entry_id: &str) {
        if let Some((_, tasks)) = self.background_tasks.remove(entry_id) {
            for task in tasks {
                task.abort();
            }
        }
    }

    /// Background tasks of an entry that have not finished yet
    pub fn background_task_count(&self, entry_id: &str) -> usize {
        self.background_tasks
            .get(entry_id)
            .map_or(0, |tasks| tasks.iter().filter(|task| !task.is_finished()).count())
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
