//! Thermostat configuration
//!
//! Loaded from YAML. Each preset may override the single target and/or the
//! low/high range targets with either a number or a template string:
//!
//! ```yaml
//! name: Living Room
//! heat_cool_mode: true
//! presets:
//!   away:
//!     target: 16
//!   eco:
//!     target_low: 18
//!     target_high: "{{ states('sensor.outside')|float + 4 }}"
//! ```

use crate::environment::HvacMode;
use crate::error::{ConfigError, ConfigResult};
use crate::expression::ExpressionEngine;
use crate::preset::FieldKind;
use crate::PRESET_NONE;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TARGET_TEMP: f64 = 20.0;
pub const DEFAULT_TARGET_TEMP_LOW: f64 = 18.0;
pub const DEFAULT_TARGET_TEMP_HIGH: f64 = 24.0;

/// A preset temperature as written in configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPresetValue {
    Number(f64),
    Template(String),
}

impl From<f64> for RawPresetValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for RawPresetValue {
    fn from(value: &str) -> Self {
        Self::Template(value.to_string())
    }
}

/// Temperature overrides of one preset
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PresetConfig {
    #[serde(default, alias = "temperature")]
    pub target: Option<RawPresetValue>,
    #[serde(default, alias = "target_temp_low")]
    pub target_low: Option<RawPresetValue>,
    #[serde(default, alias = "target_temp_high")]
    pub target_high: Option<RawPresetValue>,
}

impl PresetConfig {
    pub fn get(&self, kind: FieldKind) -> Option<&RawPresetValue> {
        match kind {
            FieldKind::Target => self.target.as_ref(),
            FieldKind::TargetLow => self.target_low.as_ref(),
            FieldKind::TargetHigh => self.target_high.as_ref(),
        }
    }

    /// Whether any field carries a number or a non-blank template
    pub fn is_populated(&self) -> bool {
        FieldKind::ALL.iter().any(|kind| match self.get(*kind) {
            Some(RawPresetValue::Number(_)) => true,
            Some(RawPresetValue::Template(template)) => !template.trim().is_empty(),
            None => false,
        })
    }
}

/// Preset name to its optional temperature overrides
///
/// A preset listed without overrides is selectable but leaves the targets
/// untouched.
pub type PresetMap = BTreeMap<String, Option<PresetConfig>>;

/// Configuration of one smart thermostat
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThermostatConfig {
    pub name: String,

    /// Object id of the `climate.*` entity; derived from the name if absent
    #[serde(default)]
    pub unique_id: Option<String>,

    /// Mode the thermostat starts in when there is nothing to restore
    #[serde(default)]
    pub hvac_mode: HvacMode,

    /// Whether the thermostat supports low/high range targets
    #[serde(default)]
    pub heat_cool_mode: bool,

    #[serde(default = "default_target_temp")]
    pub target_temp: f64,

    #[serde(default = "default_target_temp_low")]
    pub target_temp_low: f64,

    #[serde(default = "default_target_temp_high")]
    pub target_temp_high: f64,

    /// Minimum seconds between two non-forced control cycles
    #[serde(default)]
    pub min_cycle_duration: u64,

    #[serde(default)]
    pub presets: PresetMap,
}

fn default_target_temp() -> f64 {
    DEFAULT_TARGET_TEMP
}

fn default_target_temp_low() -> f64 {
    DEFAULT_TARGET_TEMP_LOW
}

fn default_target_temp_high() -> f64 {
    DEFAULT_TARGET_TEMP_HIGH
}

impl ThermostatConfig {
    /// Object id of the thermostat entity
    pub fn object_id(&self) -> String {
        match &self.unique_id {
            Some(id) => id.clone(),
            None => slug::slugify(&self.name).replace('-', "_"),
        }
    }

    pub fn min_cycle_duration(&self) -> Duration {
        Duration::from_secs(self.min_cycle_duration)
    }

    /// Validate values and preset templates
    pub fn validate(&self, engine: &dyn ExpressionEngine) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.hvac_mode == HvacMode::HeatCool && !self.heat_cool_mode {
            return Err(ConfigError::InvalidValue {
                key: "hvac_mode".to_string(),
                reason: "heat_cool requires heat_cool_mode: true".to_string(),
            });
        }
        if self.heat_cool_mode && self.target_temp_low > self.target_temp_high {
            return Err(ConfigError::InvalidValue {
                key: "target_temp_low".to_string(),
                reason: format!(
                    "{} is above target_temp_high {}",
                    self.target_temp_low, self.target_temp_high
                ),
            });
        }
        validate_presets(&self.presets, engine)
    }
}

/// Reject reserved preset names and templates that do not compile
pub fn validate_presets(presets: &PresetMap, engine: &dyn ExpressionEngine) -> ConfigResult<()> {
    for (name, preset) in presets {
        if name == PRESET_NONE {
            return Err(ConfigError::InvalidValue {
                key: format!("presets.{name}"),
                reason: "'none' is reserved for running without a preset".to_string(),
            });
        }
        let Some(preset) = preset else { continue };
        if !preset.is_populated() {
            return Err(ConfigError::EmptyPreset {
                preset: name.clone(),
            });
        }

        for kind in FieldKind::ALL {
            if let Some(RawPresetValue::Template(template)) = preset.get(kind) {
                engine
                    .validate(template)
                    .map_err(|source| ConfigError::InvalidTemplate {
                        preset: name.clone(),
                        field: kind.as_str(),
                        source,
                    })?;
            }
        }
    }
    Ok(())
}

/// Parse a thermostat configuration from YAML
pub fn load_config_str(content: &str) -> ConfigResult<ThermostatConfig> {
    serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml { source })
}

/// Read and parse a thermostat configuration file
pub fn load_config_file(path: impl AsRef<Path>) -> ConfigResult<ThermostatConfig> {
    let path = path.as_ref();
    debug!("Loading thermostat configuration: {:?}", path);

    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    load_config_str(&content)
}
