//! The `states` object and state helpers exposed to templates
//!
//! - `states('sensor.x')` returns the state string, `unknown` if the entity
//!   does not exist
//! - `states.sensor.x` returns a state object (`.state`, attributes)
//! - `is_state`, `state_attr`, `has_value`

use ha_core::{State, STATE_UNKNOWN};
use ha_state_machine::StateMachine;
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::filters::value_to_f64;

/// The states object exposed to templates
#[derive(Clone)]
pub struct StatesObject {
    state_machine: Arc<StateMachine>,
}

impl std::fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self { state_machine }
    }

    /// The state string of an entity, `unknown` when it does not exist
    pub fn state_or_unknown(&self, entity_id: &str) -> String {
        self.state_machine
            .get_state(entity_id)
            .unwrap_or_else(|| STATE_UNKNOWN.to_string())
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.state_machine.is_state(entity_id, state)
    }

    pub fn is_state_any(&self, entity_id: &str, states: &[String]) -> bool {
        self.state_machine
            .get_state(entity_id)
            .is_some_and(|current| states.iter().any(|s| *s == current))
    }

    /// An attribute of an entity, or undefined
    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.state_machine
            .get(entity_id)
            .and_then(|s| s.attributes.get(attribute).cloned())
            .map(json_to_value)
            .unwrap_or(Value::UNDEFINED)
    }

    /// Whether the entity exists and is neither unknown nor unavailable
    pub fn has_value(&self, entity_id: &str) -> bool {
        self.state_machine
            .get(entity_id)
            .is_some_and(|state| state.has_value())
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;

        if key.contains('.') {
            return self.state_machine.get(key).map(state_to_value);
        }

        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            state_machine: self.state_machine.clone(),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires entity_id")
        })?;

        Ok(Value::from(self.state_or_unknown(entity_id)))
    }
}

/// Proxy allowing `states.domain.object_id`
#[derive(Clone)]
struct DomainProxy {
    domain: String,
    state_machine: Arc<StateMachine>,
}

impl std::fmt::Debug for DomainProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainProxy")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let entity_id = format!("{}.{}", self.domain, key.as_str()?);
        self.state_machine.get(&entity_id).map(state_to_value)
    }
}

fn state_to_value(state: State) -> Value {
    Value::from_object(StateWrapper(state))
}

/// Wrapper exposing a State to templates
#[derive(Debug, Clone)]
pub struct StateWrapper(pub State);

impl std::fmt::Display for StateWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.state)
    }
}

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        match key {
            "state" => Some(Value::from(self.0.state.as_str())),
            "entity_id" => Some(Value::from(self.0.entity_id.to_string())),
            "domain" => Some(Value::from(self.0.entity_id.domain())),
            "object_id" => Some(Value::from(self.0.entity_id.object_id())),
            "last_changed" => Some(Value::from(self.0.last_changed.to_rfc3339())),
            "last_updated" => Some(Value::from(self.0.last_updated.to_rfc3339())),
            "attributes" => {
                let attrs: BTreeMap<String, Value> = self
                    .0
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v.clone())))
                    .collect();
                Some(Value::from_object(attrs))
            }
            _ => self.0.attributes.get(key).map(|v| json_to_value(v.clone())),
        }
    }
}

/// Convert serde_json::Value to minijinja Value
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::from(()),
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                Value::from(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(arr) => {
            Value::from(arr.into_iter().map(json_to_value).collect::<Vec<_>>())
        }
        serde_json::Value::Object(obj) => {
            let map: BTreeMap<String, Value> = obj
                .into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect();
            Value::from_object(map)
        }
    }
}

/// Function wrapper for is_state, accepting one state or a list of states
pub fn is_state_fn(states: &StatesObject, entity_id: &str, state: Value) -> bool {
    // Strings are iterable in minijinja, so check them first
    if let Some(s) = state.as_str() {
        states.is_state(entity_id, s)
    } else if let Ok(iter) = state.try_iter() {
        let wanted: Vec<String> = iter
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        states.is_state_any(entity_id, &wanted)
    } else {
        false
    }
}

/// Compare an attribute with a value, numerically when both are numbers
pub fn is_state_attr_fn(states: &StatesObject, entity_id: &str, attribute: &str, value: Value) -> bool {
    let actual = states.state_attr(entity_id, attribute);
    if let (Some(a), Some(b)) = (actual.as_str(), value.as_str()) {
        return a == b;
    }
    match (value_to_f64(&actual), value_to_f64(&value)) {
        (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
        _ => actual == value,
    }
}
