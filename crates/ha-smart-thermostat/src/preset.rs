//! Preset temperature values
//!
//! Each preset holds up to three temperature fields. A field is either a
//! fixed number or a template evaluated against live host state. Templates
//! that fail to produce a number fall back to the last value they did
//! produce, or to [`DEFAULT_PRESET_TEMPERATURE`] if they never succeeded.

use crate::config::{PresetConfig, RawPresetValue};
use crate::expression::ExpressionEngine;
use ha_core::EntityId;
use ha_template::TemplateError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Value used by a template field that has never evaluated successfully
pub const DEFAULT_PRESET_TEMPERATURE: f64 = 20.0;

/// The temperature a preset field overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    Target,
    TargetLow,
    TargetHigh,
}

impl FieldKind {
    pub const ALL: [FieldKind; 3] = [FieldKind::Target, FieldKind::TargetLow, FieldKind::TargetHigh];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Target => "target",
            FieldKind::TargetLow => "target_low",
            FieldKind::TargetHigh => "target_high",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A template field together with what it reads and what it last produced
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicValue {
    template: String,
    entities: BTreeSet<EntityId>,
    last_good: Option<f64>,
}

impl DynamicValue {
    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn entities(&self) -> &BTreeSet<EntityId> {
        &self.entities
    }

    pub fn last_good(&self) -> Option<f64> {
        self.last_good
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PresetValue {
    Static(f64),
    Dynamic(DynamicValue),
}

impl PresetValue {
    /// Most recent value this field resolved to
    pub fn last_good(&self) -> Option<f64> {
        match self {
            PresetValue::Static(value) => Some(*value),
            PresetValue::Dynamic(dynamic) => dynamic.last_good,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, PresetValue::Dynamic(_))
    }
}

/// Targets produced by resolving every field of a preset
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolvedTargets {
    pub target: Option<f64>,
    pub target_low: Option<f64>,
    pub target_high: Option<f64>,
}

impl ResolvedTargets {
    pub fn get(&self, kind: FieldKind) -> Option<f64> {
        match kind {
            FieldKind::Target => self.target,
            FieldKind::TargetLow => self.target_low,
            FieldKind::TargetHigh => self.target_high,
        }
    }

    fn set(&mut self, kind: FieldKind, value: Option<f64>) {
        match kind {
            FieldKind::Target => self.target = value,
            FieldKind::TargetLow => self.target_low = value,
            FieldKind::TargetHigh => self.target_high = value,
        }
    }
}

#[derive(Debug, Error)]
enum EvaluationError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("result '{0}' is not a number")]
    NotNumeric(String),
}

/// Temperature overrides of one preset
#[derive(Debug, Clone)]
pub struct PresetTemperatureSet {
    name: String,
    fields: BTreeMap<FieldKind, PresetValue>,
    referenced_entities: BTreeSet<EntityId>,
}

impl PresetTemperatureSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            referenced_entities: BTreeSet::new(),
        }
    }

    /// Build a preset from configuration
    ///
    /// Returns `None` when the configuration populates no field.
    pub fn from_config(
        name: impl Into<String>,
        config: &PresetConfig,
        engine: &dyn ExpressionEngine,
    ) -> Option<Self> {
        let mut preset = Self::new(name);
        for kind in FieldKind::ALL {
            preset.configure(kind, config.get(kind), engine);
        }
        (!preset.fields.is_empty()).then_some(preset)
    }

    /// Set a field from its configured value
    ///
    /// `None` and blank templates leave the field untouched.
    pub fn configure(
        &mut self,
        kind: FieldKind,
        raw: Option<&RawPresetValue>,
        engine: &dyn ExpressionEngine,
    ) {
        let value = match raw {
            None => return,
            Some(RawPresetValue::Number(number)) => PresetValue::Static(*number),
            Some(RawPresetValue::Template(template)) if template.trim().is_empty() => {
                debug!(preset = %self.name, field = %kind, "Ignoring blank preset template");
                return;
            }
            Some(RawPresetValue::Template(template)) => {
                let entities = engine.extract_entities(template).unwrap_or_else(|e| {
                    debug!(
                        preset = %self.name,
                        field = %kind,
                        template = %template,
                        error = %e,
                        "Could not extract entities from preset template"
                    );
                    BTreeSet::new()
                });
                PresetValue::Dynamic(DynamicValue {
                    template: template.clone(),
                    entities,
                    last_good: None,
                })
            }
        };

        self.fields.insert(kind, value);
        self.referenced_entities = self
            .fields
            .values()
            .filter_map(|value| match value {
                PresetValue::Dynamic(dynamic) => Some(dynamic.entities.iter().cloned()),
                PresetValue::Static(_) => None,
            })
            .flatten()
            .collect();
    }

    /// Current value of a field, or `None` if the preset does not set it
    ///
    /// Never fails: a template that does not evaluate to a number resolves
    /// to its last good value.
    pub fn resolve(&mut self, kind: FieldKind, engine: &dyn ExpressionEngine) -> Option<f64> {
        let dynamic = match self.fields.get_mut(&kind)? {
            PresetValue::Static(value) => return Some(*value),
            PresetValue::Dynamic(dynamic) => dynamic,
        };

        match evaluate_number(engine, &dynamic.template) {
            Ok(value) => {
                trace!(preset = %self.name, field = %kind, value, "Resolved preset template");
                dynamic.last_good = Some(value);
                Some(value)
            }
            Err(err) => {
                let fallback = dynamic.last_good.unwrap_or(DEFAULT_PRESET_TEMPERATURE);
                warn!(
                    preset = %self.name,
                    field = %kind,
                    template = %dynamic.template,
                    entities = %join_entities(&dynamic.entities),
                    error = %err,
                    fallback,
                    "Preset template did not produce a temperature, keeping {fallback}"
                );
                Some(fallback)
            }
        }
    }

    /// Resolve the given fields, leaving the others unset
    pub fn resolve_fields(
        &mut self,
        kinds: &[FieldKind],
        engine: &dyn ExpressionEngine,
    ) -> ResolvedTargets {
        let mut targets = ResolvedTargets::default();
        for kind in kinds {
            targets.set(*kind, self.resolve(*kind, engine));
        }
        targets
    }

    /// Resolve every populated field
    pub fn resolve_all(&mut self, engine: &dyn ExpressionEngine) -> ResolvedTargets {
        self.resolve_fields(&FieldKind::ALL, engine)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, kind: FieldKind) -> Option<&PresetValue> {
        self.fields.get(&kind)
    }

    /// Union of the entities read by all template fields
    pub fn referenced_entities(&self) -> &BTreeSet<EntityId> {
        &self.referenced_entities
    }

    pub fn is_dynamic(&self) -> bool {
        self.fields.values().any(PresetValue::is_dynamic)
    }
}

fn evaluate_number(engine: &dyn ExpressionEngine, template: &str) -> Result<f64, EvaluationError> {
    let rendered = engine.evaluate(template)?;
    let rendered = rendered.trim();
    rendered
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .ok_or_else(|| EvaluationError::NotNumeric(rendered.to_string()))
}

fn join_entities(entities: &BTreeSet<EntityId>) -> String {
    entities
        .iter()
        .map(EntityId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
