//! Multi-step sequences (echo-ranging sensors and friends)
//!
//! Echo-ranging devices (type `HC-SR04`, or any device with two ports) get
//! their pins bound by position: port 0 triggers, port 1 echoes. The wire
//! protocol only exposes the echo pin's digital level, so completion yields a
//! placeholder instead of a distance; real ranging needs pulse-duration
//! measurement on the firmware side (`PULSE_MEASURE` via `arduino_native`).

use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{CommandEngine, Target};
use crate::error::{HwError, Result};
use crate::model::{parse_port_key, value_as_f64, Command, CommandStep, Device, Response};

const ECHO_RANGING_TYPE: &str = "HC-SR04";

/// Pins bound from the device ports
#[derive(Debug, Clone, Copy)]
struct StepPins {
    trigger: i64,
    echo: Option<i64>,
}

impl StepPins {
    fn from_device(device: &Device) -> Result<Self> {
        let first = device
            .primary_port()
            .ok_or_else(|| HwError::execution(format!("Device {} has no configured ports", device.id)))?;
        let trigger = parse_port_key(first)?;
        let echo = match device.ports.get(1) {
            Some(port) => Some(parse_port_key(port)?),
            None => None,
        };
        Ok(Self { trigger, echo })
    }
}

fn is_echo_ranging(device: &Device, pins: &StepPins) -> bool {
    device.device_type == ECHO_RANGING_TYPE || pins.echo.is_some()
}

/// What to do with one template step
enum StepPlan {
    Send(Command),
    /// Host-side pause, nothing goes on the wire
    Pause(Duration),
}

fn plan_step(step: &CommandStep, pins: &StepPins, echo_ranging: bool) -> StepPlan {
    let mut command = Command::new(step.command.as_str());
    for (key, value) in &step.parameters {
        if key != "role" {
            command.set_param(key.clone(), value.clone());
        }
    }

    if !echo_ranging {
        if command.pin.is_none() {
            command.pin = Some(pins.trigger.into());
        }
        return StepPlan::Send(command);
    }

    match step.command.as_str() {
        "SET_PIN" => {
            let role = step.parameters.get("role").and_then(Value::as_str);
            let pin = match role {
                Some("echo") => pins.echo.unwrap_or(pins.trigger),
                _ => pins.trigger,
            };
            command.pin = Some(pin.into());
        },
        "READ" => {
            command.pin = Some(pins.echo.unwrap_or(pins.trigger).into());
        },
        "DELAY" => {
            if let Some(us) = step.parameters.get("microseconds").and_then(value_as_f64) {
                let ms = ((us / 1000.0).round() as u64).max(1);
                return StepPlan::Pause(Duration::from_millis(ms));
            }
        },
        _ => {
            if command.pin.is_none() {
                command.pin = Some(pins.trigger.into());
            }
        },
    }
    StepPlan::Send(command)
}

impl CommandEngine {
    pub(super) async fn execute_multi_step(&self, target: &Target<'_>) -> Result<Response> {
        let sequence = &target.template.execution_config.command_sequence;
        if sequence.is_empty() {
            return Err(HwError::execution("No command sequence defined for multi-step strategy"));
        }

        let device = target.device;
        let pins = StepPins::from_device(device)?;
        let echo_ranging = is_echo_ranging(device, &pins);
        if echo_ranging {
            debug!(
                "Device {}: echo-ranging sequence, trigger {} echo {:?}",
                device.id, pins.trigger, pins.echo
            );
        }

        let mut responses: Vec<Response> = Vec::with_capacity(sequence.len());
        for (index, step) in sequence.iter().enumerate() {
            let command = match plan_step(step, &pins, echo_ranging) {
                StepPlan::Pause(pause) => {
                    debug!("Device {}: step {} pause {:?}", device.id, index + 1, pause);
                    tokio::time::sleep(pause).await;
                    continue;
                },
                StepPlan::Send(command) => command,
            };

            let response = target.adapter.send_command(&command).await;
            debug!(
                "Device {}: step {} {} → ok={}",
                device.id,
                index + 1,
                command.cmd,
                response.ok
            );

            if step.expect_response && !response.is_ok() {
                return Err(HwError::execution(format!(
                    "Multi-step execution failed at step {}: {}",
                    step.command,
                    response.error_text()
                )));
            }
            responses.push(response);

            if step.delay > 0 {
                tokio::time::sleep(Duration::from_millis(step.delay)).await;
            }
        }

        let steps = responses.len();
        let last = responses.last().cloned();
        let serialized: Vec<Value> = responses
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect();

        match last {
            Some(last) if echo_ranging && last.is_ok() => {
                let echo_state = last
                    .state
                    .as_ref()
                    .or_else(|| last.extra.get("pin_state"))
                    .and_then(value_as_f64)
                    .unwrap_or(0.0);
                Ok(Response {
                    value: Some(Value::Null),
                    ..Response::success("Echo-ranging completed; distance requires pulse-duration measurement")
                }
                .with_data(json!({
                    "steps": steps,
                    "responses": serialized,
                    "echoState": echo_state,
                    "distance": null,
                    "placeholder": true,
                    "triggerPin": pins.trigger,
                    "echoPin": pins.echo,
                })))
            },
            _ => Ok(Response::success("Multi-step command executed successfully").with_data(json!({
                "steps": steps,
                "responses": serialized,
            }))),
        }
    }
}
