//! Analog reads and the shared conversion step
//!
//! Conversion never fails a read: without a converter, or when the converter
//! errors, the raw value is returned with `conversionApplied: false`.

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, warn};

use super::{CommandEngine, Target};
use crate::core::conversion::ConversionParams;
use crate::error::{HwError, Result};
use crate::model::{Command, Device, DeviceUpdate, Response};

const DEFAULT_REFERENCE_VOLTAGE: f64 = 5.0;
const ADC_MAX: f64 = 1023.0;

fn first_present(point: &Map<String, Value>, keys: &[&str]) -> Value {
    keys.iter()
        .filter_map(|k| point.get(*k))
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

/// Reshape stored calibration points into the fields the converter family expects
pub(crate) fn reshape_points(physical_type: &str, points: &[Map<String, Value>]) -> Vec<Map<String, Value>> {
    let family: &[(&str, &[&str])] = match physical_type {
        "ultrasonic" | "distance" => &[
            ("targetDistance", &["targetDistance"]),
            ("pulseDuration", &["pulseDuration"]),
            ("measuredDistance", &["measuredDistance"]),
            ("timestamp", &["timestamp"]),
        ],
        "soil_moisture" => &[
            ("targetMoisture", &["targetMoisture"]),
            ("measuredMoisture", &["measuredMoisture"]),
            ("adcValue", &["adcValue"]),
            ("timestamp", &["timestamp"]),
        ],
        _ => &[
            ("targetValue", &["solutionPH", "solutionEC", "targetValue"]),
            ("measuredValue", &["measuredADC", "measuredValue", "adc"]),
            ("voltage", &["voltage"]),
            ("timestamp", &["timestamp"]),
        ],
    };

    points
        .iter()
        .map(|point| {
            family
                .iter()
                .map(|(field, sources)| (field.to_string(), first_present(point, sources)))
                .filter(|(_, v)| !v.is_null())
                .collect()
        })
        .collect()
}

/// Conversion inputs for a device reading
pub(crate) fn conversion_params(device: &Device, physical_type: &str, volt: f64) -> ConversionParams {
    let calibration = device.calibration.as_ref();
    ConversionParams {
        calibration_data: calibration
            .map(|c| reshape_points(physical_type, &c.points))
            .unwrap_or_default(),
        reference_voltage: calibration
            .and_then(|c| c.reference_voltage)
            .unwrap_or(DEFAULT_REFERENCE_VOLTAGE),
        recorded_voltage: calibration
            .and_then(|c| c.recorded_voltage)
            .unwrap_or(DEFAULT_REFERENCE_VOLTAGE),
        volt,
        device_id: device.id.clone(),
        physical_type: physical_type.to_string(),
    }
}

fn merge(target: &mut Map<String, Value>, extra: Map<String, Value>) {
    for (k, v) in extra {
        target.entry(k).or_insert(v);
    }
}

impl CommandEngine {
    pub(super) async fn execute_analog(&self, target: &Target<'_>) -> Result<Response> {
        let device = target.device;
        let port_key = device
            .primary_port()
            .ok_or_else(|| HwError::execution(format!("Device {} has no configured ports", device.id)))?;

        let command = Command::new("ANALOG").with_pin(port_key);
        let raw_response = target.adapter.send_command(&command).await;
        debug!(
            "Device {}: ANALOG {} → ok={} value={:?}",
            device.id, port_key, raw_response.ok, raw_response.value
        );
        if !raw_response.is_ok() {
            return Ok(raw_response);
        }

        let Some(physical_type) = device.physical_type.as_deref() else {
            return Ok(raw_response);
        };

        let raw = raw_response
            .value
            .as_ref()
            .and_then(crate::model::value_as_f64)
            .or(raw_response.volt)
            .unwrap_or(0.0);
        let volt = raw_response.volt.unwrap_or(raw / ADC_MAX * DEFAULT_REFERENCE_VOLTAGE);

        let mut extra = Map::new();
        extra.insert("rawValue".into(), json!(raw));
        extra.insert("volt".into(), json!(volt));
        extra.insert("adc".into(), json!(raw));
        extra.insert("portKey".into(), json!(port_key));
        extra.insert("rawResponse".into(), serde_json::to_value(&raw_response)?);

        let params = conversion_params(device, physical_type, volt);
        Ok(self
            .convert_and_record(
                device,
                physical_type,
                raw,
                params,
                extra,
                "Analog sensor reading with conversion completed successfully",
            )
            .await)
    }

    /// Run the converter for `physical_type` and persist the converted reading
    pub(super) async fn convert_and_record(
        &self,
        device: &Device,
        physical_type: &str,
        raw: f64,
        params: ConversionParams,
        extra: Map<String, Value>,
        success_message: &str,
    ) -> Response {
        let mut data = Map::new();
        data.insert("deviceType".into(), json!(device.device_type));
        data.insert("physicalType".into(), json!(physical_type));

        let Some(converter) = self.inner.converters.get(physical_type) else {
            warn!(
                "Device {}: no converter available for physicalType {}",
                device.id, physical_type
            );
            data.insert("unit".into(), json!("raw"));
            data.insert("conversionApplied".into(), json!(false));
            merge(&mut data, extra);
            return Response::success("Sensor reading completed (no converter available)")
                .with_value(raw)
                .with_data(Value::Object(data));
        };

        let outcome = match converter.convert(raw, &params) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Device {}: conversion failed for physicalType {}: {}",
                    device.id, physical_type, e
                );
                data.insert("unit".into(), json!("raw"));
                data.insert("conversionApplied".into(), json!(false));
                data.insert("conversionError".into(), json!(e.to_string()));
                merge(&mut data, extra);
                return Response::success("Sensor reading completed (conversion failed)")
                    .with_value(raw)
                    .with_data(Value::Object(data));
            },
        };

        debug!(
            "Device {}: {} raw {} → {}{}",
            device.id, physical_type, raw, outcome.value, outcome.unit
        );

        if let Err(e) = self
            .inner
            .repos
            .devices
            .update_device(&device.id, &DeviceUpdate::reading(outcome.value, Utc::now()))
            .await
        {
            error!(
                "State drift: device {} read {} but lastReading was not updated: {}",
                device.id, outcome.value, e
            );
        }

        data.insert("value".into(), json!(outcome.value));
        data.insert("unit".into(), json!(outcome.unit));
        data.insert("calibrationApplied".into(), json!(outcome.calibration_applied));
        data.insert("calibrationPoints".into(), json!(outcome.calibration_points));
        data.insert("conversionMethod".into(), json!(outcome.conversion_method));
        data.insert("conversionApplied".into(), json!(true));
        merge(&mut data, extra);

        Response::success(success_message)
            .with_value(outcome.value)
            .with_unit(outcome.unit)
            .with_data(Value::Object(data))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn point(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_reshape_ph_points() {
        let points = vec![
            point(json!({"solutionPH": 7.0, "measuredADC": 512, "voltage": 2.5})),
            point(json!({"targetValue": 4.0, "adc": 300})),
        ];
        let shaped = reshape_points("ph", &points);
        assert_eq!(Value::Object(shaped[0].clone()), json!({"targetValue": 7.0, "measuredValue": 512, "voltage": 2.5}));
        assert_eq!(Value::Object(shaped[1].clone()), json!({"targetValue": 4.0, "measuredValue": 300}));
    }

    #[test]
    fn test_reshape_distance_points() {
        let points = vec![point(json!({"targetDistance": 20, "pulseDuration": 1160, "solutionPH": 7}))];
        let shaped = reshape_points("ultrasonic", &points);
        assert_eq!(Value::Object(shaped[0].clone()), json!({"targetDistance": 20, "pulseDuration": 1160}));
    }

    #[test]
    fn test_params_default_voltages() {
        let device: Device = serde_json::from_value(json!({
            "id": "ph-1", "controllerId": "c", "type": "dfrobot_ph_sensor", "category": "sensor",
            "calibration": {"points": [], "recordedVoltage": 4.9}
        }))
        .unwrap();
        let params = conversion_params(&device, "ph", 2.5);
        assert_eq!(params.reference_voltage, 5.0);
        assert_eq!(params.recorded_voltage, 4.9);
        assert_eq!(params.volt, 2.5);
    }
}
