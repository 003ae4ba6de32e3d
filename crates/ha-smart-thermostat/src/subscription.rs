//! State-change subscriptions of the active preset

use ha_core::events::StateChangedData;
use ha_core::{EntityId, Event};
use ha_event_bus::{EventBus, Unsubscribe};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Callback shared by every listener of one set
pub type ChangeCallback = Arc<dyn Fn(&Event<StateChangedData>) + Send + Sync>;

/// Live listeners for a set of entities
///
/// One listener per entity. Closing or dropping the set unsubscribes every
/// listener exactly once.
pub struct SubscriptionSet {
    entity_ids: BTreeSet<EntityId>,
    handles: Vec<Unsubscribe>,
}

impl SubscriptionSet {
    /// Subscribe `callback` to changes of every entity in `entity_ids`
    ///
    /// Returns `None` for an empty entity set.
    pub fn subscribe(
        bus: &Arc<EventBus>,
        entity_ids: BTreeSet<EntityId>,
        callback: ChangeCallback,
    ) -> Option<Self> {
        if entity_ids.is_empty() {
            return None;
        }

        let handles = entity_ids
            .iter()
            .map(|entity_id| {
                let callback = callback.clone();
                bus.track_state_change([entity_id.clone()], move |event| callback(event))
            })
            .collect();
        debug!(entities = entity_ids.len(), "Subscribed to preset entities");

        Some(Self {
            entity_ids,
            handles,
        })
    }

    pub fn entity_ids(&self) -> &BTreeSet<EntityId> {
        &self.entity_ids
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Unsubscribe every listener
    pub fn close(mut self) {
        self.unsubscribe_all();
    }

    fn unsubscribe_all(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for handle in self.handles.drain(..) {
            handle.call();
        }
        debug!(entities = self.entity_ids.len(), "Unsubscribed from preset entities");
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

impl std::fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("entity_ids", &self.entity_ids)
            .field("listeners", &self.handles.len())
            .finish()
    }
}

/// Whether the thermostat is listening for its active preset's entities
#[derive(Debug, Default)]
pub enum ListenerState {
    /// No template preset active, no listeners
    #[default]
    Idle,
    /// Listening for the entities of `preset`
    Subscribed {
        preset: String,
        subscriptions: SubscriptionSet,
    },
}

impl ListenerState {
    /// Tear down any live listeners and return to `Idle`
    pub fn reset(&mut self) {
        if let ListenerState::Subscribed {
            preset,
            subscriptions,
        } = std::mem::take(self)
        {
            debug!(preset = %preset, "Closing preset subscriptions");
            subscriptions.close();
        }
    }

    /// Replace the current listeners with a new set for `preset`
    ///
    /// The old set is closed before the new one is created, so listeners of
    /// two presets are never live at the same time.
    pub fn transition(
        &mut self,
        bus: &Arc<EventBus>,
        preset: Option<&str>,
        entity_ids: BTreeSet<EntityId>,
        callback: ChangeCallback,
    ) {
        self.reset();

        let Some(preset) = preset else { return };
        if let Some(subscriptions) = SubscriptionSet::subscribe(bus, entity_ids, callback) {
            *self = ListenerState::Subscribed {
                preset: preset.to_string(),
                subscriptions,
            };
        }
    }

    /// Whether `entity_id` belongs to the live subscription set
    pub fn is_tracking(&self, entity_id: &EntityId) -> bool {
        match self {
            ListenerState::Idle => false,
            ListenerState::Subscribed { subscriptions, .. } => {
                subscriptions.entity_ids().contains(entity_id)
            }
        }
    }

    /// Entities currently listened to
    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        match self {
            ListenerState::Idle => BTreeSet::new(),
            ListenerState::Subscribed { subscriptions, .. } => subscriptions.entity_ids().clone(),
        }
    }
}
