//! Error types for the smart thermostat

use crate::environment::HvacMode;
use ha_core::EntityIdError;
use ha_template::TemplateError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for thermostat operations
pub type ThermostatResult<T> = Result<T, ThermostatError>;

/// Errors raised while loading or validating thermostat configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML
    #[error("failed to parse thermostat configuration: {source}")]
    ParseYaml {
        #[source]
        source: serde_yaml::Error,
    },

    /// A preset template does not compile
    #[error("invalid template for {field} of preset '{preset}': {source}")]
    InvalidTemplate {
        preset: String,
        field: &'static str,
        #[source]
        source: TemplateError,
    },

    /// A preset mapping sets none of its temperature fields
    #[error("preset '{preset}' does not set target, target_low or target_high")]
    EmptyPreset { preset: String },

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Errors returned by thermostat operations
#[derive(Debug, Error)]
pub enum ThermostatError {
    /// The requested preset is neither `none` nor configured
    #[error("unknown preset '{preset}', expected one of: {}", available.join(", "))]
    UnknownPreset {
        preset: String,
        available: Vec<String>,
    },

    /// Manual targets that cannot be applied
    #[error("invalid target temperatures: {0}")]
    InvalidTargets(String),

    /// `heat_cool` requested on a thermostat without range targets
    #[error("hvac mode {0} is not supported by this thermostat")]
    UnsupportedHvacMode(HvacMode),

    /// The configured name or unique_id does not form a valid entity id
    #[error("invalid thermostat entity id: {0}")]
    InvalidEntityId(#[from] EntityIdError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
