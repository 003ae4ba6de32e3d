//! Working state shared by the thermostat and its control loop

use crate::preset::ResolvedTargets;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Operating mode of the thermostat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HvacMode {
    #[default]
    Off,
    Heat,
    Cool,
    HeatCool,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            HvacMode::Off => "off",
            HvacMode::Heat => "heat",
            HvacMode::Cool => "cool",
            HvacMode::HeatCool => "heat_cool",
        }
    }
}

impl fmt::Display for HvacMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HvacMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(HvacMode::Off),
            "heat" => Ok(HvacMode::Heat),
            "cool" => Ok(HvacMode::Cool),
            "heat_cool" => Ok(HvacMode::HeatCool),
            other => Err(format!("unknown hvac mode '{other}'")),
        }
    }
}

/// Target temperatures, either a single target or a low/high range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Targets {
    Single(f64),
    Range { low: f64, high: f64 },
}

/// Live thermostat state read by the control loop
#[derive(Debug, Clone, PartialEq)]
pub struct ThermostatEnvironment {
    pub hvac_mode: HvacMode,
    pub target_temp: f64,
    pub target_temp_low: f64,
    pub target_temp_high: f64,
    pub preset_mode: Option<String>,
    /// Whether range targets are supported at all
    pub range_supported: bool,
}

impl ThermostatEnvironment {
    /// Whether the low/high targets are the ones in effect
    pub fn is_range_mode(&self) -> bool {
        self.range_supported && self.hvac_mode == HvacMode::HeatCool
    }

    /// The targets in effect for the current mode
    pub fn targets(&self) -> Targets {
        if self.is_range_mode() {
            Targets::Range {
                low: self.target_temp_low,
                high: self.target_temp_high,
            }
        } else {
            Targets::Single(self.target_temp)
        }
    }

    /// Write resolved preset targets
    ///
    /// Only fields that resolved to a value are overwritten. Returns whether
    /// anything changed.
    pub fn apply(&mut self, resolved: &ResolvedTargets) -> bool {
        let before = (self.target_temp, self.target_temp_low, self.target_temp_high);
        if let Some(target) = resolved.target {
            self.target_temp = target;
        }
        if let Some(low) = resolved.target_low {
            self.target_temp_low = low;
        }
        if let Some(high) = resolved.target_high {
            self.target_temp_high = high;
        }
        before != (self.target_temp, self.target_temp_low, self.target_temp_high)
    }

    /// Overwrite targets directly
    pub fn set_targets(&mut self, targets: Targets) {
        match targets {
            Targets::Single(target) => self.target_temp = target,
            Targets::Range { low, high } => {
                self.target_temp_low = low;
                self.target_temp_high = high;
            }
        }
    }
}

/// Environment shared between the thermostat (writer) and control loop (reader)
pub type SharedEnvironment = Arc<RwLock<ThermostatEnvironment>>;
