//! Entity Registry
//!
//! Maps platform unique ids to stable entity ids and links entities to
//! their device and config entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ha_core::slugify;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 19;

/// Entity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityCategory {
    Config,
    Diagnostic,
}

/// A registered entity entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Internal UUID
    pub id: String,
    /// Full entity ID (domain.object_id)
    pub entity_id: String,
    /// Platform-specific unique identifier
    pub unique_id: String,
    /// Integration that provides this entity
    pub platform: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    /// Name given by the platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<EntityCategory>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// What a platform knows about an entity it is about to add
#[derive(Debug, Clone)]
pub struct EntityRegistration<'a> {
    /// Entity domain, e.g. "sensor"
    pub domain: &'a str,
    pub platform: &'a str,
    pub unique_id: &'a str,
    /// Basis for the generated object_id
    pub suggested_object_id: &'a str,
    pub config_entry_id: Option<&'a str>,
    pub device_id: Option<&'a str>,
    pub original_name: Option<&'a str>,
    pub entity_category: Option<EntityCategory>,
}

/// Entity registry data for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    pub entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

pub struct EntityRegistry {
    storage: Arc<Storage>,

    /// Primary index: entity_id -> EntityEntry
    by_entity_id: DashMap<String, EntityEntry>,

    /// Index: (domain, platform, unique_id) -> entity_id
    by_unique_id: DashMap<(String, String, String), String>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: DashMap::new(),
            by_unique_id: DashMap::new(),
        }
    }

    pub async fn load(&self) -> StorageResult<()> {
        if let Some(file) = self.storage.load::<EntityRegistryData>().await? {
            info!("Loading {} entities from storage", file.data.entities.len());
            for entry in file.data.entities {
                self.index_entry(entry);
            }
        }
        Ok(())
    }

    pub async fn save(&self) -> StorageResult<()> {
        let data = EntityRegistryData {
            entities: self.by_entity_id.iter().map(|r| r.value().clone()).collect(),
        };
        self.storage.save(&data).await?;
        debug!("Saved {} entities to storage", data.entities.len());
        Ok(())
    }

    fn index_entry(&self, entry: EntityEntry) {
        let domain = entry
            .entity_id
            .split_once('.')
            .map(|(domain, _)| domain.to_string())
            .unwrap_or_default();
        self.by_unique_id.insert(
            (domain, entry.platform.clone(), entry.unique_id.clone()),
            entry.entity_id.clone(),
        );
        self.by_entity_id.insert(entry.entity_id.clone(), entry);
    }

    pub fn get(&self, entity_id: &str) -> Option<EntityEntry> {
        self.by_entity_id.get(entity_id).map(|r| r.value().clone())
    }

    /// Find the entity id registered for a platform unique id
    pub fn get_entity_id(&self, domain: &str, platform: &str, unique_id: &str) -> Option<String> {
        self.by_unique_id
            .get(&(domain.to_string(), platform.to_string(), unique_id.to_string()))
            .map(|r| r.value().clone())
    }

    /// All entities created for a config entry
    pub fn entries_for_config_entry(&self, config_entry_id: &str) -> Vec<EntityEntry> {
        self.by_entity_id
            .iter()
            .filter(|r| r.value().config_entry_id.as_deref() == Some(config_entry_id))
            .map(|r| r.value().clone())
            .collect()
    }

    /// Get or create the registry entry for a platform unique id
    ///
    /// Existing entries keep their entity id; their device and config entry
    /// links are refreshed. New entries get `<domain>.<slug>` with a numeric
    /// suffix when that id is taken.
    pub fn get_or_create(&self, registration: EntityRegistration<'_>) -> EntityEntry {
        if let Some(entity_id) = self.get_entity_id(
            registration.domain,
            registration.platform,
            registration.unique_id,
        ) {
            if let Some(mut entry) = self.by_entity_id.get_mut(&entity_id) {
                entry.device_id = registration.device_id.map(str::to_string);
                entry.config_entry_id = registration.config_entry_id.map(str::to_string);
                return entry.clone();
            }
        }

        let entity_id = self.generate_entity_id(registration.domain, registration.suggested_object_id);
        let entry = EntityEntry {
            id: uuid::Uuid::new_v4().simple().to_string(),
            entity_id,
            unique_id: registration.unique_id.to_string(),
            platform: registration.platform.to_string(),
            device_id: registration.device_id.map(str::to_string),
            config_entry_id: registration.config_entry_id.map(str::to_string),
            original_name: registration.original_name.map(str::to_string),
            entity_category: registration.entity_category,
            created_at: Utc::now(),
        };

        info!(
            entity_id = %entry.entity_id,
            unique_id = %entry.unique_id,
            "Registered new entity"
        );
        self.index_entry(entry.clone());
        entry
    }

    fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let base = slugify(suggested_object_id);
        let mut entity_id = format!("{domain}.{base}");
        let mut suffix = 2;

        while self.by_entity_id.contains_key(&entity_id) {
            entity_id = format!("{domain}.{base}_{suffix}");
            suffix += 1;
        }

        entity_id
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registration<'a>(unique_id: &'a str, name: &'a str) -> EntityRegistration<'a> {
        EntityRegistration {
            domain: "sensor",
            platform: "vegehub",
            unique_id,
            suggested_object_id: name,
            config_entry_id: Some("entry-1"),
            device_id: Some("device-1"),
            original_name: Some(name),
            entity_category: None,
        }
    }

    fn registry() -> (TempDir, EntityRegistry) {
        let dir = TempDir::new().unwrap();
        let registry = EntityRegistry::new(Arc::new(Storage::new(dir.path())));
        (dir, registry)
    }

    #[test]
    fn test_get_or_create_is_stable() {
        let (_dir, registry) = registry();

        let first = registry.get_or_create(registration("vegehub_a1b2_1", "VegeHub Input 1"));
        assert_eq!(first.entity_id, "sensor.vegehub_input_1");

        let again = registry.get_or_create(registration("vegehub_a1b2_1", "Renamed"));
        assert_eq!(again.entity_id, first.entity_id);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get_entity_id("sensor", "vegehub", "vegehub_a1b2_1"),
            Some("sensor.vegehub_input_1".to_string())
        );
    }

    #[test]
    fn test_colliding_names_get_suffix() {
        let (_dir, registry) = registry();

        let a = registry.get_or_create(registration("vegehub_a1b2_1", "VegeHub Input 1"));
        let b = registry.get_or_create(registration("vegehub_c3d4_1", "VegeHub Input 1"));

        assert_eq!(a.entity_id, "sensor.vegehub_input_1");
        assert_eq!(b.entity_id, "sensor.vegehub_input_1_2");
        assert_eq!(registry.entries_for_config_entry("entry-1").len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(dir.path()));

        let registry = EntityRegistry::new(storage.clone());
        registry.get_or_create(registration("vegehub_a1b2_1", "VegeHub Input 1"));
        registry.save().await.unwrap();

        let reloaded = EntityRegistry::new(storage);
        reloaded.load().await.unwrap();
        let entry = reloaded.get("sensor.vegehub_input_1").unwrap();
        assert_eq!(entry.device_id.as_deref(), Some("device-1"));
    }
}
