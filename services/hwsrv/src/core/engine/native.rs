//! Protocol-native commands assembled by the command builder

use serde_json::{json, Map, Value};
use tracing::debug;

use super::analog::conversion_params;
use super::{CommandEngine, Target};
use crate::error::Result;
use crate::model::{value_as_f64, Command, Response};

/// Raw reading for the converter, depending on which native command ran
fn raw_reading(command: &Command, response: &Response) -> Option<Value> {
    match command.cmd.as_str() {
        "SINGLE_WIRE_ONEWIRE" if response.data.is_some() => response.data.clone(),
        "PULSE_MEASURE" if response.duration.is_some() => response.duration.clone(),
        _ => response
            .value
            .clone()
            .or_else(|| response.numeric_value().map(Value::from)),
    }
}

impl CommandEngine {
    pub(super) async fn execute_native(&self, target: &Target<'_>) -> Result<Response> {
        let device = target.device;
        let command = self.inner.builder.build(device, target.template)?;
        debug!(
            "Device {}: built {}",
            device.id,
            command.to_wire().unwrap_or_else(|_| command.cmd.clone())
        );

        let response = target.adapter.send_command(&command).await;
        if !response.is_ok() {
            return Ok(response);
        }

        let raw = raw_reading(&command, &response);
        let raw_response = serde_json::to_value(&response)?;
        let command_value = serde_json::to_value(&command)?;

        let Some(physical_type) = device.physical_type.as_deref() else {
            return Ok(Response {
                value: raw,
                ..Response::success(format!("{} command executed successfully", command.cmd))
            }
            .with_data(json!({
                "rawResponse": raw_response,
                "command": command_value,
                "deviceType": device.device_type,
            })));
        };

        let mut extra = Map::new();
        extra.insert("rawResponse".into(), raw_response);
        extra.insert("command".into(), command_value);

        let Some(raw_number) = raw.as_ref().and_then(value_as_f64) else {
            return Ok(Response {
                value: raw,
                ..Response::success("Sensor reading completed (no conversion applied)")
            }
            .with_data(json!({
                "unit": "raw",
                "conversionApplied": false,
                "conversionError": "Raw reading is not numeric",
                "deviceType": device.device_type,
                "physicalType": physical_type,
                "rawResponse": extra.remove("rawResponse"),
                "command": extra.remove("command"),
            })));
        };

        let volt = response.volt.unwrap_or(0.0);
        let params = conversion_params(device, physical_type, volt);
        let message = format!("{} sensor reading with conversion completed successfully", command.cmd);
        Ok(self
            .convert_and_record(device, physical_type, raw_number, params, extra, &message)
            .await)
    }
}
