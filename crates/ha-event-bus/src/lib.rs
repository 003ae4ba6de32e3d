//! Event bus for the smart thermostat host
//!
//! Two delivery styles live on the same bus:
//!
//! - Broadcast subscriptions (`subscribe`, `subscribe_typed`) for observers
//!   that consume events asynchronously and may lag.
//! - State-change tracking (`track_state_change`) for components that must
//!   react to specific entities. Callbacks run synchronously inside the call
//!   that fired the change, in the order changes were fired, and stop the
//!   moment the returned [`Unsubscribe`] handle is called.

use dashmap::DashMap;
use ha_core::events::StateChangedData;
use ha_core::{Context, EntityId, Event, EventData, EventType};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for broadcast subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// A unique identifier for a state-change listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type StateChangeCallback = Box<dyn Fn(&Event<StateChangedData>) + Send + Sync>;

struct StateListener {
    entity_ids: HashSet<EntityId>,
    callback: StateChangeCallback,
    active: AtomicBool,
}

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Map of event types to their broadcast senders
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    /// Per-entity state-change listeners
    state_listeners: DashMap<ListenerId, Arc<StateListener>>,
    /// Counter for generating unique listener IDs
    next_listener_id: AtomicU64,
    /// Channel capacity
    capacity: usize,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with specified broadcast channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            state_listeners: DashMap::new(),
            next_listener_id: AtomicU64::new(1),
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
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to events of a specific typed event
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Fire an event to all broadcast subscribers of its type
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // Send errors only mean there are no active receivers
            let _ = sender.send(event);
        }
    }

    /// Fire a typed event to broadcast subscribers
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        self.fire(Event::typed(data, context).map_data(to_json));
    }

    /// Fire a state change
    ///
    /// Tracking callbacks for the changed entity run first, synchronously
    /// and in registration order. The event is then broadcast to observers.
    pub fn fire_state_changed(&self, data: StateChangedData, context: Context) {
        let event = Event::typed(data, context);

        // Snapshot matching listeners so callbacks are free to track,
        // unsubscribe or write states while we iterate.
        let mut matching: Vec<(ListenerId, Arc<StateListener>)> = self
            .state_listeners
            .iter()
            .filter(|entry| entry.value().entity_ids.contains(&event.data.entity_id))
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        matching.sort_by_key(|(id, _)| *id);

        for (id, listener) in matching {
            // An earlier callback in this dispatch may have unsubscribed it
            if !listener.active.load(Ordering::Acquire) {
                trace!(listener = id.0, "Skipping unsubscribed listener");
                continue;
            }
            trace!(listener = id.0, entity_id = %event.data.entity_id, "Delivering state change");
            (listener.callback)(&event);
        }

        self.fire(event.map_data(to_json));
    }

    /// Track state changes of a set of entities
    ///
    /// The callback is invoked for every `state_changed` of any of the given
    /// entities, including the final notification when one is removed. It
    /// stays registered until the returned handle is called.
    pub fn track_state_change<I, F>(self: &Arc<Self>, entity_ids: I, callback: F) -> Unsubscribe
    where
        I: IntoIterator<Item = EntityId>,
        F: Fn(&Event<StateChangedData>) + Send + Sync + 'static,
    {
        let id = self.next_listener_id();
        let listener = Arc::new(StateListener {
            entity_ids: entity_ids.into_iter().collect(),
            callback: Box::new(callback),
            active: AtomicBool::new(true),
        });

        debug!(
            listener = id.0,
            entities = listener.entity_ids.len(),
            "Tracking state changes"
        );
        self.state_listeners.insert(id, listener.clone());

        Unsubscribe {
            bus: Arc::downgrade(self),
            id,
            listener,
        }
    }

    /// Number of live state-change listeners
    pub fn state_listener_count(&self) -> usize {
        self.state_listeners.len()
    }

    /// Number of live state-change listeners watching an entity
    pub fn state_listener_count_for(&self, entity_id: &EntityId) -> usize {
        self.state_listeners
            .iter()
            .filter(|entry| entry.value().entity_ids.contains(entity_id))
            .count()
    }

    /// Number of event types with broadcast channels
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn next_listener_id(&self) -> ListenerId {
        ListenerId(self.next_listener_id.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn to_json<T: serde::Serialize>(data: T) -> serde_json::Value {
    serde_json::to_value(data).unwrap_or_default()
}

/// Handle that removes a state-change listener
///
/// After `call` returns, no dispatch on the calling thread delivers to the
/// listener, including one already in progress further up the stack. A
/// dispatch running concurrently on another thread may still be inside the
/// callback or about to enter it. Dropping the handle without calling leaves
/// the listener registered.
#[must_use = "dropping the handle leaves the listener registered"]
pub struct Unsubscribe {
    bus: Weak<EventBus>,
    id: ListenerId,
    listener: Arc<StateListener>,
}

impl Unsubscribe {
    /// Remove the listener
    pub fn call(self) {
        self.listener.active.store(false, Ordering::Release);
        if let Some(bus) = self.bus.upgrade() {
            bus.state_listeners.remove(&self.id);
        }
        debug!(listener = self.id.0, "Stopped tracking state changes");
    }

    pub fn listener_id(&self) -> ListenerId {
        self.id
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("entities", &self.listener.entity_ids.len())
            .finish()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose data deserializes as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }

    /// Receive an already-queued event without waiting
    pub fn try_recv(&mut self) -> Result<Event<T>, broadcast::error::TryRecvError> {
        loop {
            let event = self.rx.try_recv()?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map_data(|_| data));
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use ha_core::State;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn entity(id: &str) -> EntityId {
        id.parse().unwrap()
    }

    fn change(id: &str, value: Option<&str>) -> StateChangedData {
        StateChangedData {
            entity_id: entity(id),
            old_state: None,
            new_state: value.map(|v| State::new(entity(id), v, HashMap::new(), Context::new())),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&Event<StateChangedData>) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback = move |event: &Event<StateChangedData>| {
            let value = event
                .data
                .new_state
                .as_ref()
                .map(|s| s.state.clone())
                .unwrap_or_else(|| "<removed>".to_string());
            sink.lock().unwrap().push(format!("{}={}", event.data.entity_id, value));
        };
        (seen, callback)
    }

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("test_event");

        bus.fire(Event::new("test_event", json!({"key": "value"}), Context::new()));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type.as_str(), "test_event");
        assert_eq!(received.data["key"], "value");
    }

    #[tokio::test]
    async fn test_state_changed_is_broadcast() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_typed::<StateChangedData>();

        bus.fire_state_changed(change("sensor.outside", Some("12")), Context::new());

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data.entity_id.to_string(), "sensor.outside");
        assert_eq!(received.data.new_state.unwrap().state, "12");
    }

    #[test]
    fn test_tracking_only_delivers_tracked_entities() {
        let bus = Arc::new(EventBus::new());
        let (seen, callback) = recorder();
        let _unsub = bus.track_state_change([entity("sensor.a")], callback);

        bus.fire_state_changed(change("sensor.a", Some("1")), Context::new());
        bus.fire_state_changed(change("sensor.b", Some("2")), Context::new());
        bus.fire_state_changed(change("sensor.a", None), Context::new());

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["sensor.a=1".to_string(), "sensor.a=<removed>".to_string()]
        );
    }

    #[test]
    fn test_tracking_preserves_fire_order() {
        let bus = Arc::new(EventBus::new());
        let (seen, callback) = recorder();
        let _unsub = bus.track_state_change([entity("sensor.a"), entity("sensor.b")], callback);

        for (id, value) in [("sensor.a", "1"), ("sensor.b", "2"), ("sensor.a", "3")] {
            bus.fire_state_changed(change(id, Some(value)), Context::new());
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["sensor.a=1", "sensor.b=2", "sensor.a=3"]
        );
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = Arc::new(EventBus::new());
        let (seen, callback) = recorder();
        let unsub = bus.track_state_change([entity("sensor.a")], callback);
        assert_eq!(bus.state_listener_count_for(&entity("sensor.a")), 1);

        unsub.call();
        bus.fire_state_changed(change("sensor.a", Some("1")), Context::new());

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.state_listener_count(), 0);
        assert_eq!(bus.state_listener_count_for(&entity("sensor.a")), 0);
    }

    #[test]
    fn test_unsubscribe_from_inside_dispatch() {
        let bus = Arc::new(EventBus::new());
        let handle: Arc<Mutex<Option<Unsubscribe>>> = Arc::new(Mutex::new(None));
        let (seen, second) = recorder();

        // The first listener removes the second while a dispatch is running
        let slot = handle.clone();
        let _first = bus.track_state_change([entity("sensor.a")], move |_| {
            if let Some(unsub) = slot.lock().unwrap().take() {
                unsub.call();
            }
        });
        *handle.lock().unwrap() = Some(bus.track_state_change([entity("sensor.a")], second));

        bus.fire_state_changed(change("sensor.a", Some("1")), Context::new());

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(bus.state_listener_count(), 1);
    }

    #[test]
    fn test_unsubscribe_after_bus_dropped() {
        let bus = Arc::new(EventBus::new());
        let unsub = bus.track_state_change([entity("sensor.a")], |_| {});
        drop(bus);
        unsub.call();
    }

    #[test]
    fn test_listener_ids_are_unique() {
        let bus = Arc::new(EventBus::new());
        let a = bus.track_state_change([entity("sensor.a")], |_| {});
        let b = bus.track_state_change([entity("sensor.a")], |_| {});
        assert_ne!(a.listener_id(), b.listener_id());
        a.call();
        b.call();
    }
}
