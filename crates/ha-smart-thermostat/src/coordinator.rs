//! Preset coordinator
//!
//! Tracks which preset is active and writes its resolved targets into the
//! thermostat environment. The targets in effect before a preset was chosen
//! are kept so that returning to `none` restores them.

use crate::config::PresetMap;
use crate::environment::ThermostatEnvironment;
use crate::expression::ExpressionEngine;
use crate::preset::{FieldKind, PresetTemperatureSet};
use ha_core::EntityId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Preset mode meaning "no preset"
pub const PRESET_NONE: &str = "none";

/// Targets in effect before a preset was chosen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedTargets {
    pub target: f64,
    pub low: f64,
    pub high: f64,
}

impl SavedTargets {
    fn capture(env: &ThermostatEnvironment) -> Self {
        Self {
            target: env.target_temp,
            low: env.target_temp_low,
            high: env.target_temp_high,
        }
    }

    fn restore(self, env: &mut ThermostatEnvironment) {
        env.target_temp = self.target;
        env.target_temp_low = self.low;
        env.target_temp_high = self.high;
    }
}

pub struct PresetCoordinator {
    engine: Arc<dyn ExpressionEngine>,
    /// Configured preset names, sorted
    preset_modes: Vec<String>,
    /// Presets that override at least one temperature
    presets: BTreeMap<String, PresetTemperatureSet>,
    active: Option<String>,
    saved: Option<SavedTargets>,
}

impl PresetCoordinator {
    pub fn new(engine: Arc<dyn ExpressionEngine>, presets: &PresetMap) -> Self {
        let mut coordinator = Self {
            engine,
            preset_modes: Vec::new(),
            presets: BTreeMap::new(),
            active: None,
            saved: None,
        };
        coordinator.load(presets);
        coordinator
    }

    fn load(&mut self, presets: &PresetMap) {
        self.preset_modes = presets.keys().cloned().collect();
        self.presets = presets
            .iter()
            .filter_map(|(name, config)| {
                let config = config.as_ref()?;
                PresetTemperatureSet::from_config(name.as_str(), config, self.engine.as_ref())
                    .map(|preset| (name.clone(), preset))
            })
            .collect();
        debug!(
            presets = self.preset_modes.len(),
            with_temperatures = self.presets.len(),
            "Loaded presets"
        );
    }

    /// Selectable preset modes, `none` first
    pub fn preset_modes(&self) -> Vec<String> {
        std::iter::once(PRESET_NONE.to_string())
            .chain(self.preset_modes.iter().cloned())
            .collect()
    }

    /// Whether `name` can be passed to [`activate`](Self::activate)
    pub fn has_preset(&self, name: &str) -> bool {
        name == PRESET_NONE || self.preset_modes.iter().any(|mode| mode == name)
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Targets `none` will restore, while a preset is active
    pub fn saved(&self) -> Option<SavedTargets> {
        self.saved
    }

    /// Replace the targets `none` will restore
    ///
    /// Used after a restart, when the environment already holds the
    /// preset's values. Ignored while no preset is active.
    pub fn restore_saved(&mut self, saved: SavedTargets) {
        if self.active.is_some() {
            self.saved = Some(saved);
        }
    }

    pub fn preset(&self, name: &str) -> Option<&PresetTemperatureSet> {
        self.presets.get(name)
    }

    /// Entities read by the active preset's templates
    pub fn referenced_entities(&self) -> BTreeSet<EntityId> {
        self.active
            .as_ref()
            .and_then(|name| self.presets.get(name))
            .map(|preset| preset.referenced_entities().clone())
            .unwrap_or_default()
    }

    /// Make `name` the active preset and write its targets
    ///
    /// `none` clears the active preset. Returns `false`, leaving everything
    /// untouched, for a preset that is not configured.
    pub fn activate(&mut self, name: &str, env: &mut ThermostatEnvironment) -> bool {
        if name == PRESET_NONE {
            self.clear(env);
            return true;
        }
        if !self.has_preset(name) {
            debug!(preset = name, "Ignoring unknown preset");
            return false;
        }

        if self.active.is_none() {
            self.saved = Some(SavedTargets::capture(env));
        }
        if self.active.as_deref() != Some(name) {
            info!(preset = name, "Activating preset");
        }
        self.active = Some(name.to_string());
        env.preset_mode = Some(name.to_string());
        self.reapply(env);
        true
    }

    /// Leave the active preset and restore the targets it replaced
    pub fn clear(&mut self, env: &mut ThermostatEnvironment) {
        if let Some(previous) = self.active.take() {
            info!(preset = %previous, "Clearing preset");
        }
        if let Some(saved) = self.saved.take() {
            saved.restore(env);
        }
        env.preset_mode = None;
    }

    /// Leave the active preset, keeping the current targets
    pub fn forget(&mut self, env: &mut ThermostatEnvironment) {
        if let Some(previous) = self.active.take() {
            debug!(preset = %previous, "Preset overridden by manual target");
        }
        self.saved = None;
        env.preset_mode = None;
    }

    /// Resolve the active preset's targets for the current mode
    pub fn reapply(&mut self, env: &mut ThermostatEnvironment) -> bool {
        let kinds: &[FieldKind] = if env.is_range_mode() {
            &[FieldKind::TargetLow, FieldKind::TargetHigh]
        } else {
            &[FieldKind::Target]
        };
        let engine = self.engine.as_ref();
        match self.active.as_ref().and_then(|name| self.presets.get_mut(name)) {
            Some(preset) => env.apply(&preset.resolve_fields(kinds, engine)),
            None => false,
        }
    }

    /// Resolve every field of the active preset
    ///
    /// Used when an entity read by the preset changes.
    pub fn refresh(&mut self, env: &mut ThermostatEnvironment) -> bool {
        let engine = self.engine.as_ref();
        match self.active.as_ref().and_then(|name| self.presets.get_mut(name)) {
            Some(preset) => env.apply(&preset.resolve_all(engine)),
            None => false,
        }
    }

    /// Swap in a new preset configuration
    ///
    /// The active preset stays active, re-resolved, if it still exists;
    /// otherwise it is cleared. Returns whether a preset is still active.
    pub fn replace_presets(&mut self, presets: &PresetMap, env: &mut ThermostatEnvironment) -> bool {
        self.load(presets);
        match self.active.clone() {
            Some(name) if self.has_preset(&name) => {
                self.reapply(env);
                true
            }
            Some(name) => {
                info!(preset = %name, "Active preset was removed from configuration");
                self.clear(env);
                false
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for PresetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresetCoordinator")
            .field("preset_modes", &self.preset_modes)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}
