//! The smart thermostat entity
//!
//! Ties presets, subscriptions and the environment together and exposes
//! the lifecycle hooks the host calls. State changes of entities read by
//! the active preset re-resolve its targets, request a forced control cycle
//! and publish the thermostat's new state.

use crate::config::{validate_presets, PresetMap, ThermostatConfig};
use crate::control::ControlCycleHandle;
use crate::coordinator::{PresetCoordinator, SavedTargets, PRESET_NONE};
use crate::environment::{HvacMode, SharedEnvironment, Targets, ThermostatEnvironment};
use crate::error::{ThermostatError, ThermostatResult};
use crate::expression::ExpressionEngine;
use crate::subscription::{ChangeCallback, ListenerState};
use ha_core::events::StateChangedData;
use ha_core::{Context, EntityId, Event, State};
use ha_event_bus::EventBus;
use ha_state_machine::StateMachine;
use ha_template::TemplateEngine;
use serde_json::json;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Entity domain of thermostats
pub const DOMAIN: &str = "climate";

/// Host services the thermostat depends on
#[derive(Clone)]
pub struct Host {
    pub bus: Arc<EventBus>,
    pub states: Arc<StateMachine>,
    pub engine: Arc<dyn ExpressionEngine>,
}

impl Host {
    /// Use the host template engine on top of `states`
    pub fn new(states: Arc<StateMachine>) -> Self {
        let engine = Arc::new(TemplateEngine::new(states.clone()));
        Self::with_engine(states, engine)
    }

    pub fn with_engine(states: Arc<StateMachine>, engine: Arc<dyn ExpressionEngine>) -> Self {
        Self {
            bus: states.event_bus().clone(),
            states,
            engine,
        }
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("entities", &self.states.entity_count())
            .finish_non_exhaustive()
    }
}

struct Inner {
    coordinator: PresetCoordinator,
    listener: ListenerState,
    /// Between `on_entity_added_to_host` and `on_entity_removed_from_host`
    added: bool,
}

struct Shared {
    entity_id: EntityId,
    name: String,
    host: Host,
    env: SharedEnvironment,
    control: ControlCycleHandle,
    inner: Mutex<Inner>,
}

/// A thermostat whose presets may follow other entities through templates
pub struct SmartThermostat {
    shared: Arc<Shared>,
}

impl SmartThermostat {
    /// Create a thermostat from validated configuration
    ///
    /// Nothing is subscribed or published until the host adds the entity.
    pub fn new(
        config: &ThermostatConfig,
        host: Host,
        control: ControlCycleHandle,
    ) -> ThermostatResult<Self> {
        config.validate(host.engine.as_ref())?;
        let entity_id = EntityId::new(DOMAIN, config.object_id())?;

        let env = ThermostatEnvironment {
            hvac_mode: config.hvac_mode,
            target_temp: config.target_temp,
            target_temp_low: config.target_temp_low,
            target_temp_high: config.target_temp_high,
            preset_mode: None,
            range_supported: config.heat_cool_mode,
        };
        let coordinator = PresetCoordinator::new(host.engine.clone(), &config.presets);
        debug!(entity_id = %entity_id, presets = ?coordinator.preset_modes(), "Created smart thermostat");

        Ok(Self {
            shared: Arc::new(Shared {
                entity_id,
                name: config.name.clone(),
                host,
                env: Arc::new(RwLock::new(env)),
                control,
                inner: Mutex::new(Inner {
                    coordinator,
                    listener: ListenerState::Idle,
                    added: false,
                }),
            }),
        })
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.shared.entity_id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The environment read by the control loop
    pub fn environment(&self) -> SharedEnvironment {
        self.shared.env.clone()
    }

    pub fn hvac_mode(&self) -> HvacMode {
        self.shared.read_env().hvac_mode
    }

    pub fn targets(&self) -> Targets {
        self.shared.read_env().targets()
    }

    /// Active preset, `none` if there is none
    pub fn preset_mode(&self) -> String {
        self.shared
            .lock()
            .coordinator
            .active()
            .unwrap_or(PRESET_NONE)
            .to_string()
    }

    pub fn preset_modes(&self) -> Vec<String> {
        self.shared.lock().coordinator.preset_modes()
    }

    /// Entities currently subscribed to
    pub fn subscribed_entities(&self) -> BTreeSet<EntityId> {
        self.shared.lock().listener.entity_ids()
    }

    /// Restore the last known state, activate its preset and start listening
    pub fn on_entity_added_to_host(&self) {
        let shared = &self.shared;
        let restored = shared.host.states.get(&shared.entity_id.to_string());
        {
            let mut inner = shared.lock();
            {
                let mut env = shared.write_env();
                if let Some(state) = &restored {
                    restore_environment(&mut env, state);
                    match state.attribute::<String>("preset_mode") {
                        Some(preset) if preset == PRESET_NONE => {}
                        Some(preset) if inner.coordinator.has_preset(&preset) => {
                            inner.coordinator.activate(&preset, &mut env);
                            if let Some(saved) = saved_targets(state) {
                                inner.coordinator.restore_saved(saved);
                            }
                        }
                        Some(preset) => {
                            debug!(preset = %preset, "Restored preset is no longer configured");
                        }
                        None => {}
                    }
                }
            }
            inner.added = true;
            shared.resubscribe(&mut inner);
        }
        info!(
            entity_id = %shared.entity_id,
            restored = restored.is_some(),
            "Smart thermostat added"
        );
        shared.control.request(true);
        shared.persist(Context::new());
    }

    /// Stop listening; the last published state stays in the host
    pub fn on_entity_removed_from_host(&self) {
        let mut inner = self.shared.lock();
        inner.listener.reset();
        if inner.added {
            info!(entity_id = %self.shared.entity_id, "Smart thermostat removed");
        }
        inner.added = false;
    }

    /// Activate a preset, or leave presets with `none`
    pub fn set_preset_mode(&self, preset: &str) -> ThermostatResult<()> {
        let shared = &self.shared;
        {
            let mut inner = shared.lock();
            if !inner.coordinator.has_preset(preset) {
                return Err(ThermostatError::UnknownPreset {
                    preset: preset.to_string(),
                    available: inner.coordinator.preset_modes(),
                });
            }
            {
                let mut env = shared.write_env();
                inner.coordinator.activate(preset, &mut env);
            }
            shared.resubscribe(&mut inner);
        }
        shared.control.request(true);
        shared.persist(Context::new());
        Ok(())
    }

    /// Hook for the host's preset service
    pub fn on_preset_activated(&self, preset: &str) -> ThermostatResult<()> {
        self.set_preset_mode(preset)
    }

    /// Set targets by hand; an active preset is left without restoring
    pub fn set_temperature(&self, targets: Targets) -> ThermostatResult<()> {
        let shared = &self.shared;
        {
            let mut inner = shared.lock();
            {
                let mut env = shared.write_env();
                check_targets(&env, targets)?;
                inner.coordinator.forget(&mut env);
                env.set_targets(targets);
            }
            inner.listener.reset();
        }
        debug!(entity_id = %shared.entity_id, ?targets, "Targets set manually");
        shared.control.request(true);
        shared.persist(Context::new());
        Ok(())
    }

    /// Switch mode; the active preset is re-resolved for the new mode
    pub fn set_hvac_mode(&self, mode: HvacMode) -> ThermostatResult<()> {
        let shared = &self.shared;
        {
            let mut inner = shared.lock();
            let mut env = shared.write_env();
            if mode == HvacMode::HeatCool && !env.range_supported {
                return Err(ThermostatError::UnsupportedHvacMode(mode));
            }
            env.hvac_mode = mode;
            inner.coordinator.reapply(&mut env);
        }
        info!(entity_id = %shared.entity_id, hvac_mode = %mode, "HVAC mode changed");
        shared.control.request(true);
        shared.persist(Context::new());
        Ok(())
    }

    /// Replace the preset configuration
    pub fn reconfigure(&self, presets: &PresetMap) -> ThermostatResult<()> {
        let shared = &self.shared;
        validate_presets(presets, shared.host.engine.as_ref())?;
        {
            let mut inner = shared.lock();
            {
                let mut env = shared.write_env();
                inner.coordinator.replace_presets(presets, &mut env);
            }
            shared.resubscribe(&mut inner);
        }
        info!(entity_id = %shared.entity_id, "Presets reconfigured");
        shared.control.request(true);
        shared.persist(Context::new());
        Ok(())
    }
}

impl std::fmt::Debug for SmartThermostat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartThermostat")
            .field("entity_id", &self.shared.entity_id)
            .finish_non_exhaustive()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_env(&self) -> RwLockReadGuard<'_, ThermostatEnvironment> {
        self.env.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_env(&self) -> RwLockWriteGuard<'_, ThermostatEnvironment> {
        self.env.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rebuild listeners for the active preset
    fn resubscribe(self: &Arc<Self>, inner: &mut Inner) {
        if !inner.added {
            inner.listener.reset();
            return;
        }

        let mut entity_ids = inner.coordinator.referenced_entities();
        if entity_ids.remove(&self.entity_id) {
            warn!(entity_id = %self.entity_id, "Preset template reads the thermostat itself, not subscribing to it");
        }

        let weak = Arc::downgrade(self);
        let callback: ChangeCallback = Arc::new(move |event: &Event<StateChangedData>| {
            if let Some(shared) = weak.upgrade() {
                shared.on_entity_changed(event);
            }
        });
        inner.listener.transition(
            &self.host.bus,
            inner.coordinator.active(),
            entity_ids,
            callback,
        );
    }

    fn on_entity_changed(&self, event: &Event<StateChangedData>) {
        {
            let mut inner = self.lock();
            if !inner.listener.is_tracking(&event.data.entity_id) {
                debug!(
                    entity_id = %self.entity_id,
                    source = %event.data.entity_id,
                    "Ignoring change of an entity no longer tracked"
                );
                return;
            }
            let changed = {
                let mut env = self.write_env();
                inner.coordinator.refresh(&mut env)
            };
            debug!(
                entity_id = %self.entity_id,
                source = %event.data.entity_id,
                removed = event.data.is_removal(),
                changed,
                "Preset entity changed"
            );
        }
        self.control.request(true);
        self.persist(event.context.child());
    }

    /// Publish the current state to the host
    ///
    /// Must be called without holding `inner`: the write notifies other
    /// listeners synchronously.
    fn persist(&self, context: Context) {
        let (state, attributes) = {
            let inner = self.lock();
            if !inner.added {
                return;
            }
            let env = self.read_env();
            (env.hvac_mode.to_string(), self.attributes(&inner, &env))
        };
        self.host
            .states
            .set(self.entity_id.clone(), state, attributes, context);
    }

    fn attributes(
        &self,
        inner: &Inner,
        env: &ThermostatEnvironment,
    ) -> HashMap<String, serde_json::Value> {
        let mut hvac_modes = vec![HvacMode::Off, HvacMode::Heat, HvacMode::Cool];
        if env.range_supported {
            hvac_modes.push(HvacMode::HeatCool);
        }

        let mut attributes = HashMap::from([
            ("friendly_name".to_string(), json!(self.name)),
            (
                "preset_mode".to_string(),
                json!(inner.coordinator.active().unwrap_or(PRESET_NONE)),
            ),
            (
                "preset_modes".to_string(),
                json!(inner.coordinator.preset_modes()),
            ),
            (
                "hvac_modes".to_string(),
                json!(hvac_modes.iter().map(|m| m.as_str()).collect::<Vec<_>>()),
            ),
        ]);
        match env.targets() {
            Targets::Single(target) => {
                attributes.insert("temperature".to_string(), json!(target));
            }
            Targets::Range { low, high } => {
                attributes.insert("target_temp_low".to_string(), json!(low));
                attributes.insert("target_temp_high".to_string(), json!(high));
            }
        }
        if let Some(saved) = inner.coordinator.saved() {
            attributes.insert("saved_target_temp".to_string(), json!(saved.target));
            attributes.insert("saved_target_temp_low".to_string(), json!(saved.low));
            attributes.insert("saved_target_temp_high".to_string(), json!(saved.high));
        }
        attributes
    }
}

fn restore_environment(env: &mut ThermostatEnvironment, state: &State) {
    match state.state.parse::<HvacMode>() {
        Ok(HvacMode::HeatCool) if !env.range_supported => {
            debug!("Not restoring heat_cool, range targets are disabled");
        }
        Ok(mode) => env.hvac_mode = mode,
        Err(e) => debug!(error = %e, "Not restoring hvac mode"),
    }
    if let Some(target) = state.attribute::<f64>("temperature") {
        env.target_temp = target;
    }
    if let Some(low) = state.attribute::<f64>("target_temp_low") {
        env.target_temp_low = low;
    }
    if let Some(high) = state.attribute::<f64>("target_temp_high") {
        env.target_temp_high = high;
    }
}

/// Targets to return to on `none`, as published while a preset was active
fn saved_targets(state: &State) -> Option<SavedTargets> {
    Some(SavedTargets {
        target: state.attribute("saved_target_temp")?,
        low: state.attribute("saved_target_temp_low")?,
        high: state.attribute("saved_target_temp_high")?,
    })
}

fn check_targets(env: &ThermostatEnvironment, targets: Targets) -> ThermostatResult<()> {
    let reason = match targets {
        Targets::Single(target) if !target.is_finite() => "target is not a number",
        Targets::Range { .. } if !env.range_supported => "range targets are disabled",
        Targets::Range { low, high } if !low.is_finite() || !high.is_finite() => {
            "range target is not a number"
        }
        Targets::Range { low, high } if low > high => "low target is above high target",
        _ => return Ok(()),
    };
    Err(ThermostatError::InvalidTargets(reason.to_string()))
}
