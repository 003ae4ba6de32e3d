//! Core host types for the smart thermostat
//!
//! The thermostat runs inside a Home Assistant style host. This crate holds
//! the host vocabulary shared by the event bus, the state machine, the
//! template engine and the thermostat itself: EntityId, State, Event and
//! Context.

mod context;
mod entity_id;
mod event;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{Event, EventData, EventType};
pub use state::State;

/// State value of an entity that exists but cannot currently be read
pub const STATE_UNAVAILABLE: &str = "unavailable";

/// State value of an entity whose value is not known (or that does not exist)
pub const STATE_UNKNOWN: &str = "unknown";

/// Standard event types fired by the host
pub mod events {
    use super::*;

    /// Event type for state changes
    pub const STATE_CHANGED: &str = "state_changed";

    /// Event type for state reported (unchanged state was written)
    pub const STATE_REPORTED: &str = "state_reported";

    /// Data for STATE_CHANGED events
    ///
    /// `new_state` is `None` when the entity was removed from the host.
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl StateChangedData {
        /// Whether this change is the final notification of a removed entity
        pub fn is_removal(&self) -> bool {
            self.new_state.is_none()
        }
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Data for STATE_REPORTED events (state written without any change)
    #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
    pub struct StateReportedData {
        pub entity_id: EntityId,
        pub new_state: State,
        pub last_reported: chrono::DateTime<chrono::Utc>,
    }

    impl EventData for StateReportedData {
        fn event_type() -> &'static str {
            STATE_REPORTED
        }
    }
}
