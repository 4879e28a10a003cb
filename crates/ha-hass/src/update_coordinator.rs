//! Data update coordinator
//!
//! Holds the latest data of an integration and notifies listening entities
//! whenever it changes. Push-based integrations have no update interval and
//! feed data in through [`DataUpdateCoordinator::async_set_updated_data`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

/// Callback invoked after every data update
pub type UpdateListener = Arc<dyn Fn() + Send + Sync>;

pub struct DataUpdateCoordinator<T> {
    name: String,
    update_interval: Option<Duration>,
    data: watch::Sender<Option<T>>,
    listeners: DashMap<u64, UpdateListener>,
    next_listener_id: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> DataUpdateCoordinator<T> {
    pub fn new(name: impl Into<String>, update_interval: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            update_interval,
            data: watch::Sender::new(None),
            listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Option<Duration> {
        self.update_interval
    }

    /// Snapshot of the current data
    pub fn data(&self) -> Option<T> {
        self.data.borrow().clone()
    }

    /// Replace the data and notify listeners
    pub fn async_set_updated_data(&self, data: T) {
        self.data.send_replace(Some(data));
        self.async_update_listeners();
    }

    /// Change the data in place and notify listeners once
    pub fn async_modify_data(&self, modify: impl FnOnce(&mut Option<T>)) {
        self.data.send_modify(modify);
        self.async_update_listeners();
    }

    /// Call every listener
    pub fn async_update_listeners(&self) {
        // Listeners may add or remove listeners, so call them on a copy
        let listeners: Vec<UpdateListener> =
            self.listeners.iter().map(|r| r.value().clone()).collect();
        debug!(name = %self.name, listeners = listeners.len(), "Updating listeners");
        for listener in listeners {
            listener();
        }
    }

    pub fn async_add_listener(
        self: &Arc<Self>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> CoordinatorListener<T> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, Arc::new(listener));
        CoordinatorListener {
            coordinator: Arc::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Registration of a coordinator listener
pub struct CoordinatorListener<T> {
    coordinator: Weak<DataUpdateCoordinator<T>>,
    id: u64,
}

impl<T> CoordinatorListener<T> {
    /// Stop receiving updates
    pub fn remove(&self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.listeners.remove(&self.id);
        }
    }
}
