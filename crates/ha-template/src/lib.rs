//! Jinja template engine for the smart thermostat host
//!
//! Built on minijinja with the Home Assistant helpers temperature templates
//! use:
//!
//! # State Access
//!
//! - `states('entity_id')` - Entity state as string (`unknown` if missing)
//! - `states.sensor.outside` - State object
//! - `is_state('entity_id', 'on')` - Check if entity is in state
//! - `state_attr('entity_id', 'attr')` - Attribute value
//! - `has_value('entity_id')` - Entity exists and is not unknown/unavailable
//!
//! # Numbers
//!
//! - `| float` / `| int` - Strict conversion, with optional default
//! - `| round(1)`, `| abs`, `min([..])`, `max([..])`, `iif(cond, a, b)`
//!
//! # Example
//!
//! ```ignore
//! use ha_template::TemplateEngine;
//!
//! let engine = TemplateEngine::new(state_machine);
//! let target = engine.render("{{ states('sensor.outside')|float + 4 }}")?;
//! let watched = engine.extract_entities("{{ states('sensor.outside') }}")?;
//! ```

mod engine;
mod entities;
mod error;
mod filters;
mod states;

pub use engine::{is_runtime_error, TemplateEngine, DEFAULT_FUEL};
pub use entities::referenced_entities;
pub use error::{TemplateError, TemplateResult};
pub use states::{StateWrapper, StatesObject};

// Re-export minijinja Value for convenience
pub use minijinja::Value;
