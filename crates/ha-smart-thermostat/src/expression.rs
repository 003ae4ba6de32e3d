//! Expression engine adapter
//!
//! The thermostat never evaluates templates itself; it goes through this
//! trait so the host engine can be swapped for a scripted one in tests.

use ha_core::EntityId;
use ha_template::{TemplateEngine, TemplateResult};
use std::collections::BTreeSet;

/// The host facility that compiles and evaluates preset templates
pub trait ExpressionEngine: Send + Sync {
    /// Check that an expression compiles
    fn validate(&self, expression: &str) -> TemplateResult<()>;

    /// Entities the expression reads from
    fn extract_entities(&self, expression: &str) -> TemplateResult<BTreeSet<EntityId>>;

    /// Evaluate the expression against current host state
    fn evaluate(&self, expression: &str) -> TemplateResult<String>;
}

impl ExpressionEngine for TemplateEngine {
    fn validate(&self, expression: &str) -> TemplateResult<()> {
        TemplateEngine::validate(self, expression)
    }

    fn extract_entities(&self, expression: &str) -> TemplateResult<BTreeSet<EntityId>> {
        TemplateEngine::extract_entities(self, expression)
    }

    fn evaluate(&self, expression: &str) -> TemplateResult<String> {
        self.render(expression)
    }
}
