//! Smart thermostat with template-driven presets
//!
//! Presets set the thermostat's target temperature(s) either to fixed
//! numbers or to Jinja templates evaluated against live host state:
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
//!
//! While a preset with templates is active the thermostat listens for state
//! changes of every entity the templates read, re-resolves its targets and
//! requests a forced control cycle. A template that fails to produce a
//! number keeps the last value it produced (or 20.0 if it never did).
//!
//! # Example
//!
//! ```ignore
//! use ha_smart_thermostat::{control_channel, load_config_file, ControlLoop, Host, SmartThermostat};
//!
//! let config = load_config_file("thermostat.yaml")?;
//! let (control, requests) = control_channel();
//! let thermostat = SmartThermostat::new(&config, Host::new(state_machine), control)?;
//! tokio::spawn(
//!     ControlLoop::new(requests, thermostat.environment(), heater, config.min_cycle_duration()).run(),
//! );
//!
//! thermostat.on_entity_added_to_host();
//! thermostat.set_preset_mode("eco")?;
//! ```

pub mod config;
pub mod control;
pub mod coordinator;
pub mod environment;
pub mod error;
pub mod expression;
pub mod preset;
pub mod subscription;
pub mod thermostat;

pub use config::{
    load_config_file, load_config_str, PresetConfig, PresetMap, RawPresetValue, ThermostatConfig,
};
pub use control::{control_channel, ControlCycleHandle, ControlLoop, CycleRequest, HvacController};
pub use coordinator::{PresetCoordinator, SavedTargets, PRESET_NONE};
pub use environment::{HvacMode, SharedEnvironment, Targets, ThermostatEnvironment};
pub use error::{ConfigError, ConfigResult, ThermostatError, ThermostatResult};
pub use expression::ExpressionEngine;
pub use preset::{
    FieldKind, PresetTemperatureSet, PresetValue, ResolvedTargets, DEFAULT_PRESET_TEMPERATURE,
};
pub use subscription::{ListenerState, SubscriptionSet};
pub use thermostat::{Host, SmartThermostat};
