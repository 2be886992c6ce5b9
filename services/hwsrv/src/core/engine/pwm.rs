//! PWM power control on the device's first port

use serde_json::{json, Value};
use tracing::debug;

use super::{CommandEngine, Target};
use crate::error::{HwError, Result};
use crate::model::{parse_port_key, Command, Response};

const DEFAULT_FADE_MS: f64 = 1000.0;

fn hardware_command(command: &Command, pin: i64) -> Result<Command> {
    let mut hardware = Command::new(command.cmd.as_str()).with_pin(pin);
    match command.cmd.as_str() {
        "SET_PWM" => {
            hardware.value = Some(command.power_level.unwrap_or(0.0));
        },
        "FADE_PWM" => {
            hardware.power_from = Some(command.power_from.unwrap_or(0.0));
            hardware.power_to = Some(command.power_to.unwrap_or(0.0));
            hardware.duration = Some(command.duration.filter(|d| *d > 0.0).unwrap_or(DEFAULT_FADE_MS));
            hardware.direction = Some(command.direction.clone().unwrap_or_else(|| "up".to_string()));
        },
        other => return Err(HwError::execution(format!("Unknown PWM command: {}", other))),
    }
    Ok(hardware)
}

impl CommandEngine {
    pub(super) async fn execute_pwm(&self, target: &Target<'_>, command: &Command) -> Result<Response> {
        let device = target.device;
        let port_key = device
            .primary_port()
            .ok_or_else(|| HwError::execution(format!("Device {} has no configured ports", device.id)))?;
        let pin = parse_port_key(port_key)?;

        let hardware = hardware_command(command, pin)?;
        debug!("Device {}: {} on {}", device.id, hardware.cmd, port_key);

        let response = target.adapter.send_command(&hardware).await;
        if !response.is_ok() {
            return Ok(response);
        }

        let mut data = json!({
            "command": command.cmd,
            "portNumber": pin,
        });
        if let (Value::Object(fields), Ok(Value::Object(wire))) = (&mut data, serde_json::to_value(&hardware)) {
            fields.extend(wire);
        }

        Ok(Response::success("PWM command executed successfully")
            .with_port(port_key)
            .with_data(data))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::engine::tests::fixture;
    use crate::core::engine::EngineSettings;

    #[tokio::test]
    async fn test_set_power_maps_to_set_pwm() {
        let (engine, adapter, _repo) = fixture(EngineSettings::default());

        let mut cmd = Command::new("CONTROL_ACTUATOR").for_device("fan").with_action("set_power");
        cmd.power_level = Some(180.0);
        let response = engine.send_command("ctrl-1", cmd).await;

        assert_eq!(response.message.as_deref(), Some("PWM command executed successfully"));
        assert_eq!(response.port.as_deref(), Some("D5"));
        assert_eq!(response.data.as_ref().unwrap()["portNumber"], json!(5));
        assert_eq!(
            serde_json::to_value(&adapter.sent_commands()[0]).unwrap(),
            json!({"cmd": "SET_PWM", "pin": 5, "value": 180})
        );
    }

    #[tokio::test]
    async fn test_fade_defaults() {
        let (engine, adapter, _repo) = fixture(EngineSettings::default());

        let mut cmd = Command::new("CONTROL_ACTUATOR").for_device("fan").with_action("fade_down");
        cmd.power_from = Some(255.0);
        engine.send_command("ctrl-1", cmd).await;

        assert_eq!(
            serde_json::to_value(&adapter.sent_commands()[0]).unwrap(),
            json!({
                "cmd": "FADE_PWM", "pin": 5, "duration": 1000,
                "powerFrom": 255, "powerTo": 0, "direction": "down"
            })
        );
    }

    #[test]
    fn test_unknown_pwm_command() {
        let err = hardware_command(&Command::new("BLINK"), 3).unwrap_err();
        assert_eq!(err.to_string(), "Unknown PWM command: BLINK");
    }
}
