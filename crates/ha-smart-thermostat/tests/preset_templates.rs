//! Template presets against the real host: event bus, state machine and
//! template engine

mod common;

use common::{capture_logs, drain, TestHost};
use ha_core::EntityId;
use ha_smart_thermostat::{
    CycleRequest, FieldKind, HvacMode, PresetConfig, PresetMap, PresetTemperatureSet,
    RawPresetValue, Targets, DEFAULT_PRESET_TEMPERATURE,
};
use ha_template::TemplateEngine;
use std::sync::Arc;

const FORCED: CycleRequest = CycleRequest { force: true };

const SEASONAL: &str = r#"
name: Living Room
hvac_mode: heat
target_temp: 21
presets:
  away:
    target: 20.5
  seasonal:
    target: "{{ 16 if is_state('sensor.season','winter') else 26 }}"
  follow_x:
    target: "{{ states('sensor.x')|float }}"
"#;

const RANGE: &str = r#"
name: Living Room
hvac_mode: heat_cool
heat_cool_mode: true
target_temp_low: 19
target_temp_high: 25
presets:
  eco:
    target: "{{ states('sensor.out')|float }}"
    target_low: 18.0
    target_high: "{{ states('sensor.out')|float + 4 }}"
"#;

const SWITCHING: &str = r#"
name: Living Room
hvac_mode: heat
presets:
  a:
    target: "{{ states('sensor.a')|float }}"
  b:
    target: "{{ states('sensor.b')|float }}"
  fixed:
    target: 17
"#;

#[test]
fn test_seasonal_template_follows_sensor() {
    let host = TestHost::new();
    host.set_state("sensor.season", "winter");
    let (thermostat, mut requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();

    thermostat.set_preset_mode("seasonal").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(16.0));
    drain(&mut requests);

    host.set_state("sensor.season", "summer");
    assert_eq!(thermostat.targets(), Targets::Single(26.0));
    assert_eq!(drain(&mut requests), vec![FORCED]);

    let published = host.states.get("climate.living_room").unwrap();
    assert_eq!(published.attribute::<f64>("temperature"), Some(26.0));
}

#[test]
fn test_missing_sensor_uses_default_until_it_appears() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();

    thermostat.set_preset_mode("follow_x").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(DEFAULT_PRESET_TEMPERATURE));
    assert_eq!(host.listeners_for("sensor.x"), 1);

    host.set_state("sensor.x", "18");
    assert_eq!(thermostat.targets(), Targets::Single(18.0));
}

#[test]
fn test_static_preset_subscribes_nothing() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();

    thermostat.set_preset_mode("away").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(20.5));
    assert_eq!(host.bus.state_listener_count(), 0);

    host.set_state("sensor.x", "30");
    host.set_state("sensor.season", "summer");
    assert_eq!(thermostat.targets(), Targets::Single(20.5));
}

#[test]
fn test_static_field_ignores_host_state() {
    let host = TestHost::new();
    let engine = TemplateEngine::new(host.states.clone());
    let mut preset = PresetTemperatureSet::new("away");
    preset.configure(FieldKind::Target, Some(&RawPresetValue::Number(20.5)), &engine);

    for reading in ["winter", "unavailable", "12"] {
        host.set_state("sensor.season", reading);
        assert_eq!(preset.resolve(FieldKind::Target, &engine), Some(20.5));
    }
    assert!(preset.referenced_entities().is_empty());
}

#[test]
fn test_mixed_range_fields_are_independent() {
    let host = TestHost::new();
    host.set_state("sensor.out", "20");
    let (thermostat, mut requests) = host.thermostat(RANGE);
    thermostat.on_entity_added_to_host();

    thermostat.set_preset_mode("eco").unwrap();
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 24.0 });
    drain(&mut requests);

    host.set_state("sensor.out", "25");
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 29.0 });
    assert_eq!(drain(&mut requests), vec![FORCED]);

    // Every field is re-resolved on change, including the single target
    assert_eq!(thermostat.environment().read().unwrap().target_temp, 25.0);

    host.set_state("sensor.out", "unavailable");
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 29.0 });
}

#[test]
fn test_switching_presets_moves_listeners() {
    let host = TestHost::new();
    host.set_state("sensor.a", "18");
    host.set_state("sensor.b", "22");
    let (thermostat, mut requests) = host.thermostat(SWITCHING);
    thermostat.on_entity_added_to_host();

    thermostat.set_preset_mode("a").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(18.0));
    assert_eq!(host.listeners_for("sensor.a"), 1);

    thermostat.set_preset_mode("b").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(22.0));
    assert_eq!(host.listeners_for("sensor.a"), 0);
    assert_eq!(host.listeners_for("sensor.b"), 1);
    drain(&mut requests);

    host.set_state("sensor.a", "10");
    assert_eq!(thermostat.targets(), Targets::Single(22.0));
    assert!(drain(&mut requests).is_empty());

    host.set_state("sensor.b", "23");
    assert_eq!(thermostat.targets(), Targets::Single(23.0));
    assert_eq!(drain(&mut requests), vec![FORCED]);

    thermostat.set_preset_mode("fixed").unwrap();
    assert_eq!(host.bus.state_listener_count(), 0);

    thermostat.set_preset_mode("none").unwrap();
    assert_eq!(host.bus.state_listener_count(), 0);
    assert_eq!(thermostat.preset_mode(), "none");
}

#[test]
fn test_unavailable_sensor_keeps_last_good_and_warns() {
    let host = TestHost::new();
    host.set_state("sensor.out", "20");
    let (thermostat, _requests) = host.thermostat(RANGE);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("eco").unwrap();
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 24.0 });

    let (_, logs) = capture_logs(|| host.set_state("sensor.out", "unavailable"));
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 24.0 });

    let warnings = logs.warnings();
    let high = warnings
        .iter()
        .find(|event| event.field("field") == Some("target_high"))
        .expect("warning for target_high");
    assert!(high.field("template").unwrap().contains("states('sensor.out')|float + 4"));
    assert_eq!(high.field("entities"), Some("sensor.out"));
    assert_eq!(high.field("fallback"), Some("24.0"));
    assert!(high.field("error").is_some());
}

#[test]
fn test_repeated_failures_stay_pinned() {
    let host = TestHost::new();
    host.set_state("sensor.x", "19.5");
    let (thermostat, _requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("follow_x").unwrap();

    for reading in ["unavailable", "unknown", "warm", ""] {
        host.set_state("sensor.x", reading);
        assert_eq!(thermostat.targets(), Targets::Single(19.5));
    }

    host.set_state("sensor.x", "21");
    assert_eq!(thermostat.targets(), Targets::Single(21.0));
}

#[test]
fn test_removed_sensor_is_a_failure_not_an_unsubscribe() {
    let host = TestHost::new();
    host.set_state("sensor.x", "19");
    let (thermostat, mut requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("follow_x").unwrap();
    drain(&mut requests);

    host.remove_state("sensor.x");
    assert_eq!(thermostat.targets(), Targets::Single(19.0));
    assert_eq!(drain(&mut requests), vec![FORCED]);
    assert_eq!(host.listeners_for("sensor.x"), 1);

    host.set_state("sensor.x", "22");
    assert_eq!(thermostat.targets(), Targets::Single(22.0));
}

#[test]
fn test_removal_from_host_leaves_no_listeners() {
    let host = TestHost::new();
    host.set_state("sensor.a", "18");
    let (thermostat, mut requests) = host.thermostat(SWITCHING);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("a").unwrap();
    assert_eq!(host.bus.state_listener_count(), 1);

    thermostat.on_entity_removed_from_host();
    thermostat.on_entity_removed_from_host();
    assert_eq!(host.bus.state_listener_count(), 0);
    drain(&mut requests);

    host.set_state("sensor.a", "30");
    assert_eq!(thermostat.targets(), Targets::Single(18.0));
    assert!(drain(&mut requests).is_empty());

    // Adding it back restores the preset and its listeners
    thermostat.on_entity_added_to_host();
    assert_eq!(thermostat.preset_mode(), "a");
    assert_eq!(thermostat.targets(), Targets::Single(30.0));
    assert_eq!(host.listeners_for("sensor.a"), 1);
}

#[test]
fn test_none_after_restart_restores_pre_preset_target() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("away").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(20.5));

    let published = host.states.get("climate.living_room").unwrap();
    assert_eq!(published.attribute::<f64>("temperature"), Some(20.5));
    assert_eq!(published.attribute::<f64>("saved_target_temp"), Some(21.0));

    thermostat.on_entity_removed_from_host();
    drop(thermostat);

    let (restarted, _requests) = host.thermostat(SEASONAL);
    restarted.on_entity_added_to_host();
    assert_eq!(restarted.preset_mode(), "away");
    assert_eq!(restarted.targets(), Targets::Single(20.5));

    restarted.set_preset_mode("none").unwrap();
    assert_eq!(restarted.targets(), Targets::Single(21.0));

    let published = host.states.get("climate.living_room").unwrap();
    assert_eq!(published.attribute::<f64>("temperature"), Some(21.0));
    assert_eq!(published.attribute::<f64>("saved_target_temp"), None);
}

#[test]
fn test_state_write_is_caused_by_sensor_change() {
    let host = TestHost::new();
    host.set_state("sensor.season", "winter");
    let (thermostat, _requests) = host.thermostat(SEASONAL);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("seasonal").unwrap();

    let published = host.states.get("climate.living_room").unwrap();
    assert_eq!(published.context.parent_id, None);

    let sensor = host.set_state("sensor.season", "summer");
    let published = host.states.get("climate.living_room").unwrap();
    assert_eq!(published.attribute::<f64>("temperature"), Some(26.0));
    assert_eq!(published.context.parent_id.as_deref(), Some(sensor.context.id.as_str()));
}

#[test]
fn test_dropping_thermostat_leaves_no_listeners() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(SWITCHING);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("b").unwrap();
    assert_eq!(host.bus.state_listener_count(), 1);

    drop(thermostat);
    assert_eq!(host.bus.state_listener_count(), 0);
    host.set_state("sensor.b", "25");
}

#[test]
fn test_no_subscriptions_before_added() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(SWITCHING);

    thermostat.set_preset_mode("a").unwrap();
    assert_eq!(host.bus.state_listener_count(), 0);

    thermostat.on_entity_added_to_host();
    assert_eq!(host.listeners_for("sensor.a"), 1);
}

#[test]
fn test_hvac_mode_switch_reapplies_range_fields() {
    let host = TestHost::new();
    host.set_state("sensor.out", "20");
    let (thermostat, _requests) = host.thermostat(RANGE);
    thermostat.on_entity_added_to_host();

    thermostat.set_hvac_mode(HvacMode::Heat).unwrap();
    thermostat.set_preset_mode("eco").unwrap();
    assert_eq!(thermostat.targets(), Targets::Single(20.0));

    thermostat.set_hvac_mode(HvacMode::HeatCool).unwrap();
    assert_eq!(thermostat.targets(), Targets::Range { low: 18.0, high: 24.0 });
}

#[test]
fn test_reconfigure_moves_listeners() {
    let host = TestHost::new();
    host.set_state("sensor.a", "18");
    host.set_state("sensor.b", "22");
    let (thermostat, _requests) = host.thermostat(SWITCHING);
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("a").unwrap();

    let mut presets = PresetMap::new();
    presets.insert(
        "a".to_string(),
        Some(PresetConfig {
            target: Some("{{ states('sensor.b')|float - 1 }}".into()),
            ..Default::default()
        }),
    );
    thermostat.reconfigure(&presets).unwrap();
    assert_eq!(thermostat.preset_mode(), "a");
    assert_eq!(thermostat.targets(), Targets::Single(21.0));
    assert_eq!(host.listeners_for("sensor.a"), 0);
    assert_eq!(host.listeners_for("sensor.b"), 1);

    presets.clear();
    thermostat.reconfigure(&presets).unwrap();
    assert_eq!(thermostat.preset_mode(), "none");
    assert_eq!(host.bus.state_listener_count(), 0);

    presets.insert(
        "broken".to_string(),
        Some(PresetConfig {
            target: Some("{{ states('sensor.b' }}".into()),
            ..Default::default()
        }),
    );
    assert!(thermostat.reconfigure(&presets).is_err());
}

#[test]
fn test_own_entity_is_not_subscribed() {
    let host = TestHost::new();
    let (thermostat, _requests) = host.thermostat(
        r#"
name: Living Room
hvac_mode: heat
presets:
  echo:
    target: "{{ state_attr('climate.living_room', 'temperature')|float(19) + states('sensor.a')|float(0) }}"
"#,
    );
    thermostat.on_entity_added_to_host();
    thermostat.set_preset_mode("echo").unwrap();

    let subscribed = thermostat.subscribed_entities();
    assert!(!subscribed.contains(thermostat.entity_id()));
    assert!(subscribed.contains(&EntityId::new("sensor", "a").unwrap()));
    assert_eq!(host.listeners_for("climate.living_room"), 0);
}

#[test]
fn test_thermostat_following_another_thermostat() {
    let host = TestHost::new();
    let (leader, _leader_requests) = host.thermostat(
        r#"
name: Leader
hvac_mode: heat
target_temp: 20
presets:
  away:
    target: 15
"#,
    );
    let (follower, mut follower_requests) = host.thermostat(
        r#"
name: Follower
hvac_mode: heat
presets:
  follow:
    target: "{{ state_attr('climate.leader', 'temperature')|float + 1 }}"
"#,
    );
    leader.on_entity_added_to_host();
    follower.on_entity_added_to_host();
    follower.set_preset_mode("follow").unwrap();
    assert_eq!(follower.targets(), Targets::Single(21.0));
    drain(&mut follower_requests);

    leader.set_preset_mode("away").unwrap();
    assert_eq!(follower.targets(), Targets::Single(16.0));
    assert_eq!(drain(&mut follower_requests), vec![FORCED]);
}

#[test]
fn test_preset_store_with_host_engine() {
    let host = TestHost::new();
    let engine = Arc::new(TemplateEngine::new(host.states.clone()));
    let config = PresetConfig {
        target: Some("{{ 16 if is_state('sensor.season','winter') else 26 }}".into()),
        ..Default::default()
    };
    let mut preset = PresetTemperatureSet::from_config("seasonal", &config, engine.as_ref()).unwrap();

    host.set_state("sensor.season", "winter");
    assert_eq!(preset.resolve(FieldKind::Target, engine.as_ref()), Some(16.0));
    host.set_state("sensor.season", "summer");
    assert_eq!(preset.resolve(FieldKind::Target, engine.as_ref()), Some(26.0));

    let season = EntityId::new("sensor", "season").unwrap();
    assert!(preset.referenced_entities().contains(&season));
    assert_eq!(preset.referenced_entities().len(), 1);
}
