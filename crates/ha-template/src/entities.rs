//! Static extraction of the entities a template refers to
//!
//! Finds entity ids written as quoted string literals (`states('sensor.x')`,
//! `is_state("sensor.x", "on")`) and as attribute paths (`states.sensor.x`).
//! Entity ids built at render time from variables are not found.

use ha_core::EntityId;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn quoted_entity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"['"]([a-z][a-z0-9_]*\.[a-z0-9_]+)['"]"#).expect("valid entity literal regex")
    })
}

fn states_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\bstates\.([a-z][a-z0-9_]*)\.([a-z0-9_]+)").expect("valid states path regex")
    })
}

/// Collect every well-formed entity id referenced by the template source
pub fn referenced_entities(source: &str) -> BTreeSet<EntityId> {
    let literals = quoted_entity_pattern()
        .captures_iter(source)
        .filter_map(|cap| cap[1].parse::<EntityId>().ok());

    let paths = states_path_pattern()
        .captures_iter(source)
        .filter_map(|cap| EntityId::new(&cap[1], &cap[2]).ok());

    literals.chain(paths).collect()
}
