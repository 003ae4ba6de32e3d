//! Template engine for the smart thermostat host
//!
//! Renders Jinja templates against the state machine, validates template
//! syntax and reports which entities a template refers to.

use crate::entities;
use crate::error::{TemplateError, TemplateResult};
use crate::filters;
use crate::states::{self, StatesObject};
use ha_core::EntityId;
use ha_state_machine::StateMachine;
use minijinja::{Environment, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Evaluation budget for a single render, in minijinja fuel units
pub const DEFAULT_FUEL: u64 = 50_000;

/// Template engine with Home Assistant extensions
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with access to the state machine
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self::with_fuel(state_machine, Some(DEFAULT_FUEL))
    }

    /// Create an engine with a custom evaluation budget (`None` is unbounded)
    pub fn with_fuel(state_machine: Arc<StateMachine>, fuel: Option<u64>) -> Self {
        let states = Arc::new(StatesObject::new(state_machine));
        let mut env = Environment::new();

        env.set_debug(true);
        env.set_fuel(fuel);

        Self::register_filters(&mut env);
        Self::register_globals(&mut env, states);
        Self::register_tests(&mut env);

        Self { env }
    }

    fn register_filters(env: &mut Environment<'static>) {
        env.add_filter("float", filters::to_float);
        env.add_filter("int", filters::to_int);
        env.add_filter("round", filters::round_filter);
        env.add_filter("abs", filters::abs_filter);
        env.add_filter("is_number", filters::is_number);
    }

    fn register_globals(env: &mut Environment<'static>, states: Arc<StatesObject>) {
        env.add_global("states", Value::from_object((*states).clone()));

        let states_for_is_state = states.clone();
        env.add_function("is_state", move |entity_id: &str, state: Value| {
            states::is_state_fn(&states_for_is_state, entity_id, state)
        });

        let states_for_state_attr = states.clone();
        env.add_function("state_attr", move |entity_id: &str, attribute: &str| {
            states_for_state_attr.state_attr(entity_id, attribute)
        });

        let states_for_is_state_attr = states.clone();
        env.add_function(
            "is_state_attr",
            move |entity_id: &str, attribute: &str, value: Value| {
                states::is_state_attr_fn(&states_for_is_state_attr, entity_id, attribute, value)
            },
        );

        let states_for_has_value = states;
        env.add_function("has_value", move |entity_id: &str| {
            states_for_has_value.has_value(entity_id)
        });

        env.add_function("iif", |condition: Value, if_true: Value, if_false: Option<Value>| {
            if condition.is_true() {
                if_true
            } else {
                if_false.unwrap_or(Value::from(()))
            }
        });
        env.add_function("min", |values: Value| {
            filters::fold_numbers(values, f64::INFINITY, f64::min)
        });
        env.add_function("max", |values: Value| {
            filters::fold_numbers(values, f64::NEG_INFINITY, f64::max)
        });
    }

    fn register_tests(env: &mut Environment<'static>) {
        env.add_test("number", filters::is_number);
        env.add_test("defined", filters::is_defined);
    }

    /// Render a template string
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        trace!(template, "Rendering template");

        let tmpl = self.env.template_from_str(template)?;
        let result = tmpl.render(())?;

        Ok(result)
    }

    /// Check that a template compiles, without rendering it
    pub fn validate(&self, template: &str) -> TemplateResult<()> {
        self.env.template_from_str(template)?;
        Ok(())
    }

    /// Entities the template refers to
    ///
    /// Fails only when the template does not compile.
    pub fn extract_entities(&self, template: &str) -> TemplateResult<BTreeSet<EntityId>> {
        self.validate(template)?;
        let found = entities::referenced_entities(template);
        debug!(template, count = found.len(), "Extracted template entities");
        Ok(found)
    }
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

/// Errors a render can fail with at runtime (as opposed to at validation)
pub fn is_runtime_error(err: &TemplateError) -> bool {
    !matches!(err, TemplateError::SyntaxError { .. })
}
