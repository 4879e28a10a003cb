//! Home Assistant Registries
//!
//! Persistent registries for devices and entities. Both use JSON
//! persistence in the `.storage/` directory with a version envelope.

pub mod storage;

pub mod device_registry;
pub mod entity_registry;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use device_registry::{
    format_mac, DeviceConnection, DeviceEntry, DeviceIdentifier, DeviceInfo, DeviceRegistry,
    DeviceRegistryData, CONNECTION_NETWORK_MAC,
};

pub use entity_registry::{
    EntityCategory, EntityEntry, EntityRegistration, EntityRegistry, EntityRegistryData,
};

use std::sync::Arc;

/// All registries bundled together
pub struct Registries {
    pub storage: Arc<Storage>,
    pub devices: DeviceRegistry,
    pub entities: EntityRegistry,
}

impl Registries {
    /// Create new registries with the given config directory
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        Self::with_storage(Arc::new(Storage::new(config_dir)))
    }

    pub fn with_storage(storage: Arc<Storage>) -> Self {
        Self {
            devices: DeviceRegistry::new(storage.clone()),
            entities: EntityRegistry::new(storage.clone()),
            storage,
        }
    }

    pub async fn load_all(&self) -> StorageResult<()> {
        self.devices.load().await?;
        self.entities.load().await?;
        Ok(())
    }

    pub async fn save_all(&self) -> StorageResult<()> {
        self.devices.save().await?;
        self.entities.save().await?;
        Ok(())
    }
}
