//! Shared helpers for thermostat integration tests
//!
//! A host built from the real event bus, state machine and template engine,
//! plus a tracing layer that records emitted events for assertions.

#![allow(dead_code)]

use ha_core::{Context, EntityId, State};
use ha_event_bus::EventBus;
use ha_smart_thermostat::{
    control_channel, load_config_str, CycleRequest, Host, SmartThermostat,
};
use ha_state_machine::StateMachine;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context as LayerContext, Layer, SubscriberExt};

pub struct TestHost {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateMachine>,
    pub host: Host,
}

impl TestHost {
    pub fn new() -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let host = Host::new(states.clone());
        Self { bus, states, host }
    }

    /// Build a thermostat from YAML; the receiver collects its cycle requests
    pub fn thermostat(&self, yaml: &str) -> (SmartThermostat, mpsc::UnboundedReceiver<CycleRequest>) {
        let config = load_config_str(yaml).expect("valid thermostat config");
        let (control, requests) = control_channel();
        let thermostat = SmartThermostat::new(&config, self.host.clone(), control)
            .expect("thermostat accepts config");
        (thermostat, requests)
    }

    pub fn set_state(&self, entity_id: &str, state: &str) -> State {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.states.set(entity_id, state, HashMap::new(), Context::new())
    }

    pub fn remove_state(&self, entity_id: &str) -> Option<State> {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.states.remove(&entity_id, Context::new())
    }

    /// Live state-change listeners watching `entity_id`
    pub fn listeners_for(&self, entity_id: &str) -> usize {
        let entity_id: EntityId = entity_id.parse().expect("Invalid entity_id");
        self.bus.state_listener_count_for(&entity_id)
    }
}

/// Take every queued cycle request
pub fn drain(requests: &mut mpsc::UnboundedReceiver<CycleRequest>) -> Vec<CycleRequest> {
    let mut drained = Vec::new();
    while let Ok(request) = requests.try_recv() {
        drained.push(request);
    }
    drained
}

/// A tracing event as seen by [`LogCapture`]
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.level == Level::WARN)
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: LayerContext<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.fields.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{value:?}");
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

/// Run `f` with a subscriber that records every tracing event on this thread
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, LogCapture) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, capture)
}
