//! Command engine scenarios against a mock controller
//!
//! Covers relay polarity, toggling from the cached port state, multi-step
//! aborts, analog reads with and without a converter, and what happens when
//! the hardware write succeeds but the store does not.

#![allow(clippy::disallowed_methods)]

mod support;

use serde_json::json;
use std::sync::Arc;
use tracing_test::traced_test;

use hwsrv::core::conversion::{ConversionError, ConversionOutcome, ConversionParams};
use hwsrv::model::{Command, PinLevel, Response};
use hwsrv::storage::{InMemoryRepository, Inventory, Repositories};

use support::{bench, bench_with, wire_log, FlakyStore, BENCH, BENCH_INVENTORY};

fn cached_level(store: &InMemoryRepository, port: &str) -> Option<PinLevel> {
    store
        .controller(BENCH)
        .and_then(|c| c.port(port).and_then(|p| p.current_state))
}

#[tokio::test]
async fn test_relay_polarity_on_the_wire() {
    let bench = bench();

    let on = bench
        .engine
        .send_command(BENCH, Command::new("ACTIVATE_RELAY").for_device("pump"))
        .await;
    assert!(on.is_ok(), "{:?}", on);
    bench
        .engine
        .send_command(BENCH, Command::new("DEACTIVATE_RELAY").for_device("pump"))
        .await;
    bench
        .engine
        .send_command(BENCH, Command::new("ACTIVATE_RELAY").for_device("light"))
        .await;

    assert_eq!(
        wire_log(&bench.adapter),
        vec![
            json!({"cmd": "SET_PIN", "pin": 2, "state": 0}),
            json!({"cmd": "SET_PIN", "pin": 2, "state": 1}),
            json!({"cmd": "SET_PIN", "pin": 3, "state": 1}),
        ]
    );
    assert_eq!(cached_level(&bench.store, "D2"), Some(PinLevel::High));
    assert_eq!(cached_level(&bench.store, "D3"), Some(PinLevel::High));

    let data = on.data.unwrap();
    assert_eq!(data["logicalState"], "active");
    assert_eq!(data["hardwareState"], "LOW");
    assert_eq!(data["relayLogic"], "active_low");
}

#[tokio::test]
async fn test_toggle_pair_flips_from_cached_state() {
    let bench = bench();

    // Never-written port reads as HIGH, which is inactive for active_low
    for _ in 0..2 {
        let response = bench
            .engine
            .send_command(BENCH, Command::new("TOGGLE_RELAY").for_device("pump"))
            .await;
        assert!(response.is_ok());
    }

    let states: Vec<_> = bench.adapter.sent_commands().iter().map(|c| c.state).collect();
    assert_eq!(states, vec![Some(0), Some(1)]);
    assert_eq!(cached_level(&bench.store, "D2"), Some(PinLevel::High));
}

#[tokio::test]
async fn test_activate_then_toggle_matches_deactivate() {
    for device in ["pump", "light"] {
        let toggled = bench();
        toggled
            .engine
            .send_command(BENCH, Command::new("ACTIVATE_RELAY").for_device(device))
            .await;
        let after_toggle = toggled
            .engine
            .send_command(BENCH, Command::new("TOGGLE_RELAY").for_device(device))
            .await;

        let direct = bench();
        let deactivated = direct
            .engine
            .send_command(BENCH, Command::new("DEACTIVATE_RELAY").for_device(device))
            .await;

        assert!(after_toggle.is_ok() && deactivated.is_ok(), "{}", device);
        assert_eq!(wire_log(&toggled.adapter).last(), wire_log(&direct.adapter).last(), "{}", device);
        let port = if device == "pump" { "D2" } else { "D3" };
        assert_eq!(cached_level(&toggled.store, port), cached_level(&direct.store, port));
        assert_eq!(
            after_toggle.data.unwrap()["logicalState"],
            deactivated.data.unwrap()["logicalState"]
        );
    }
}

#[tokio::test]
async fn test_generic_intent_without_device_is_rejected() {
    let bench = bench();
    let response = bench.engine.send_command(BENCH, Command::new("ACTIVATE_RELAY")).await;

    assert_eq!(response.ok, 0);
    assert!(response.error_text().contains("Device reference required"));
    assert!(bench.adapter.sent_commands().is_empty());
}

#[tokio::test]
async fn test_multi_step_aborts_at_failing_step() {
    let bench = bench();
    bench.adapter.push_response(Response::success("ok"));
    bench.adapter.push_response(Response::failure("pin jammed"));

    let response = bench
        .engine
        .send_command(BENCH, Command::new("CONTROL_ACTUATOR").for_device("doser"))
        .await;

    assert_eq!(response.ok, 0);
    let error = response.error_text();
    assert!(error.contains("Multi-step execution failed at step SET_PIN"), "{}", error);
    assert!(error.contains("pin jammed"));
    // The trailing READ never went out
    assert_eq!(bench.adapter.sent_commands().len(), 2);
}

#[tokio::test]
async fn test_multi_step_reports_every_step() {
    let bench = bench();
    let response = bench
        .engine
        .send_command(BENCH, Command::new("CONTROL_ACTUATOR").for_device("doser"))
        .await;

    assert!(response.is_ok());
    assert_eq!(response.data.unwrap()["steps"], 3);
    let pins: Vec<_> = wire_log(&bench.adapter).iter().map(|c| c["pin"].clone()).collect();
    assert_eq!(pins, vec![json!(7), json!(7), json!(7)]);
}

#[tokio::test]
async fn test_analog_read_without_converter_returns_raw() {
    let bench = bench();
    bench.adapter.set_default_response(Response::success("ok").with_value(512));

    let response = bench
        .engine
        .send_command(BENCH, Command::new("READ_SENSOR").for_device("ph"))
        .await;

    assert_eq!(response.ok, 1);
    assert_eq!(response.numeric_value(), Some(512.0));
    let data = response.data.unwrap();
    assert_eq!(data["unit"], "raw");
    assert_eq!(data["conversionApplied"], false);
    assert_eq!(data["portKey"], "A0");

    assert_eq!(wire_log(&bench.adapter), vec![json!({"cmd": "ANALOG", "pin": "A0"})]);
    // Unconverted reads are not persisted
    assert_eq!(bench.store.device("ph").unwrap().last_reading, None);
}

#[tokio::test]
async fn test_analog_read_with_converter_persists_reading() {
    let bench = bench();
    bench.adapter.set_default_response(Response::success("ok").with_value(512));
    bench.converters.register(
        "ph",
        Arc::new(|raw: f64, params: &ConversionParams| -> Result<ConversionOutcome, ConversionError> {
            Ok(ConversionOutcome {
                value: (params.volt * 2.8 * 100.0).round() / 100.0,
                unit: "pH".to_string(),
                raw_value: raw,
                calibration_applied: false,
                calibration_points: 0,
                conversion_method: "linear".to_string(),
            })
        }),
    );

    let response = bench
        .engine
        .send_command(BENCH, Command::new("READ_SENSOR").for_device("ph"))
        .await;

    assert!(response.is_ok());
    assert_eq!(response.unit.as_deref(), Some("pH"));
    let value = response.numeric_value().unwrap();
    assert!((value - 7.0).abs() < 0.05, "{}", value);
    assert_eq!(response.data.unwrap()["conversionApplied"], true);
    assert_eq!(bench.store.device("ph").unwrap().last_reading, Some(value));
}

#[tokio::test]
#[traced_test]
async fn test_store_failure_after_hardware_write_is_state_drift() {
    let store = Arc::new(InMemoryRepository::from_inventory(
        Inventory::from_yaml_str(BENCH_INVENTORY).unwrap(),
    ));
    let flaky = FlakyStore::new(store.clone());
    let bench = bench_with(Repositories::shared(flaky), store);

    let response = bench
        .engine
        .send_command(BENCH, Command::new("ACTIVATE_RELAY").for_device("light"))
        .await;

    // The hardware changed, so the caller still sees success
    assert!(response.is_ok());
    assert_eq!(bench.adapter.sent_commands().len(), 1);
    assert_eq!(cached_level(&bench.store, "D3"), None);
    assert!(logs_contain("State drift"));
}
