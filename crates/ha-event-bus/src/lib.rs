//! Event bus with typed pub/sub for Home Assistant
//!
//! The EventBus is the central message broker of the host. Components
//! subscribe to event types and fire events; one-shot listeners are used by
//! integrations that need to clean up when the host stops.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::future::Future;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Handle to a one-shot listener
///
/// Dropping the handle leaves the listener in place; call [`remove`] to
/// cancel it before it fires.
///
/// [`remove`]: ListenerHandle::remove
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Cancel the listener. Has no effect once it has fired.
    pub fn remove(&self) {
        self.task.abort();
    }

    /// Whether the listener has already run (or was removed)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Run `callback` the first time an event of `event_type` is fired
    ///
    /// The subscription is taken before this returns, so an event fired right
    /// after the call is not missed. Must be called from within a Tokio
    /// runtime.
    pub fn listen_once<F, Fut>(&self, event_type: impl Into<EventType>, callback: F) -> ListenerHandle
    where
        F: FnOnce(Event<serde_json::Value>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let event_type = event_type.into();
        let mut rx = self.subscribe(event_type.clone());

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        debug!(event_type = %event_type, "One-shot listener fired");
                        callback(event).await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(event_type = %event_type, skipped, "One-shot listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        ListenerHandle { task }
    }

    /// Fire an event to all subscribers of its type
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // A send error only means nobody is listening
            let _ = sender.send(event);
        }
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let data = serde_json::to_value(&data).unwrap_or_default();
        self.fire(Event::new(T::event_type(), data, context));
    }

    /// Get the number of event types with subscribers
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
