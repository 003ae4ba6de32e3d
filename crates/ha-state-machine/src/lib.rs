//! State machine holding the current state of every host entity
//!
//! Writes notify the event bus: a write that changes the state value or the
//! attributes fires `state_changed` (delivered to state trackers and
//! broadcast), an identical write only broadcasts `state_reported`. Removing
//! an entity fires a final `state_changed` with no new state.

use dashmap::DashMap;
use ha_core::events::{StateChangedData, StateReportedData};
use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// The state machine tracks all entity states
pub struct StateMachine {
    /// All entity states keyed by entity_id string
    states: DashMap<String, State>,
    /// Index of entity_ids by domain
    domain_index: DashMap<String, Vec<String>>,
    /// Event bus for firing state change events
    event_bus: Arc<EventBus>,
}

impl StateMachine {
    /// Create a new state machine with the given event bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domain_index: DashMap::new(),
            event_bus,
        }
    }

    /// Set the state of an entity
    ///
    /// `last_changed` only moves when the state value changes. The event is
    /// fired after the map is updated, so listeners reading the state
    /// machine see the new value.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let entity_id_str = entity_id.to_string();
        let old_state = self.get(&entity_id_str);

        let new_state = match &old_state {
            Some(existing) => existing.with_update(state, attributes, context.clone()),
            None => State::new(entity_id.clone(), state, attributes, context.clone()),
        };
        let changed = old_state.as_ref() != Some(&new_state);

        debug!(state = %new_state.state, changed, "Setting entity state");

        self.states.insert(entity_id_str.clone(), new_state.clone());

        if old_state.is_none() {
            self.domain_index
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(entity_id_str);
        }

        if changed {
            let event_data = StateChangedData {
                entity_id,
                old_state,
                new_state: Some(new_state.clone()),
            };
            self.event_bus.fire_state_changed(event_data, context);
        } else {
            let event_data = StateReportedData {
                entity_id,
                new_state: new_state.clone(),
                last_reported: chrono::Utc::now(),
            };
            self.event_bus.fire_typed(event_data, context);
        }

        new_state
    }

    /// Get the current state of an entity
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Get the state value as a string, or None if entity doesn't exist
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Check if an entity is in a specific state
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Get all entity IDs for a domain
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domain_index
            .get(domain)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Get all states for a domain
    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// Remove an entity's state
    ///
    /// Fires a STATE_CHANGED event with the old state and None for new_state.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let entity_id_str = entity_id.to_string();
        let old_state = self.states.remove(&entity_id_str).map(|(_, s)| s);

        if let Some(ref state) = old_state {
            trace!("Removing entity state");

            if let Some(mut ids) = self.domain_index.get_mut(entity_id.domain()) {
                ids.retain(|id| id != &entity_id_str);
            }

            let event_data = StateChangedData {
                entity_id: entity_id.clone(),
                old_state: Some(state.clone()),
                new_state: None,
            };
            self.event_bus.fire_state_changed(event_data, context);
        }

        old_state
    }

    /// Get the total number of entities
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }

    /// The event bus this state machine notifies
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Thread-safe wrapper for StateMachine
pub type SharedStateMachine = Arc<StateMachine>;
