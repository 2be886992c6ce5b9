//! Device records as read from (and written back to) the persistence layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Sensor,
    Actuator,
}

/// Which digital level means "active" for a relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayLogic {
    #[default]
    ActiveHigh,
    ActiveLow,
}

impl RelayLogic {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayLogic::ActiveHigh => "active_high",
            RelayLogic::ActiveLow => "active_low",
        }
    }
}

/// Persisted health label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    #[default]
    Unknown,
}

/// Range and pattern limits for the sensor health validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    pub expected_min: f64,
    pub expected_max: f64,
    pub physical_min: f64,
    pub physical_max: f64,
    /// Units per minute
    pub max_change_rate: f64,
    /// Hours
    pub history_window: u32,
    /// Minutes
    pub stuck_value_threshold: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            expected_min: 0.0,
            expected_max: 100.0,
            physical_min: 0.0,
            physical_max: 1023.0,
            max_change_rate: 10.0,
            history_window: 24,
            stuck_value_threshold: 30,
        }
    }
}

/// Stored calibration as captured by the calibration workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationData {
    #[serde(default)]
    pub points: Vec<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_voltage: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub controller_id: String,
    /// Device type key, matched against `DeviceTemplate::device_type`
    #[serde(rename = "type")]
    pub device_type: String,
    pub category: DeviceCategory,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_type: Option<String>,
    #[serde(default)]
    pub relay_logic: RelayLogic,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
    #[serde(default = "default_true")]
    pub checking_enabled: bool,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reading_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub validation_config: ValidationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration: Option<CalibrationData>,
}

impl Device {
    pub fn is_sensor(&self) -> bool {
        self.category == DeviceCategory::Sensor
    }

    pub fn primary_port(&self) -> Option<&str> {
        self.ports.first().map(String::as_str)
    }
}

/// Partial update of the fields the core is allowed to write back
///
/// `last_error: Some(None)` clears the stored error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpdate {
    pub last_reading: Option<f64>,
    pub last_reading_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
    pub health_status: Option<HealthStatus>,
    pub checking_enabled: Option<bool>,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl DeviceUpdate {
    pub fn reading(value: f64, at: DateTime<Utc>) -> Self {
        Self {
            last_reading: Some(value),
            last_reading_timestamp: Some(at),
            last_error: Some(None),
            ..Default::default()
        }
    }

    pub fn apply(&self, device: &mut Device) {
        if let Some(value) = self.last_reading {
            device.last_reading = Some(value);
        }
        if let Some(at) = self.last_reading_timestamp {
            device.last_reading_timestamp = Some(at);
        }
        if let Some(err) = &self.last_error {
            device.last_error = err.clone();
        }
        if let Some(status) = self.health_status {
            device.health_status = status;
        }
        if let Some(enabled) = self.checking_enabled {
            device.checking_enabled = enabled;
        }
        if let Some(at) = self.last_health_check {
            device.last_health_check = Some(at);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_device_defaults_from_minimal_record() {
        let device: Device = serde_json::from_value(json!({
            "id": "ph-1",
            "controllerId": "ctrl-1",
            "type": "dfrobot_ph_sensor",
            "category": "sensor",
            "ports": ["A0"]
        }))
        .unwrap();

        assert!(device.is_sensor());
        assert_eq!(device.relay_logic, RelayLogic::ActiveHigh);
        assert!(device.health_check_enabled && device.checking_enabled);
        assert_eq!(device.validation_config.physical_max, 1023.0);
        assert_eq!(device.validation_config.stuck_value_threshold, 30);
        assert_eq!(device.primary_port(), Some("A0"));
    }

    #[test]
    fn test_partial_validation_config_keeps_defaults() {
        let cfg: ValidationConfig = serde_json::from_value(json!({"expectedMax": 14})).unwrap();
        assert_eq!(cfg.expected_max, 14.0);
        assert_eq!(cfg.max_change_rate, 10.0);
    }

    #[test]
    fn test_update_clears_error() {
        let mut device: Device = serde_json::from_value(json!({
            "id": "d", "controllerId": "c", "type": "relay", "category": "actuator",
            "lastError": "old"
        }))
        .unwrap();
        DeviceUpdate::reading(7.1, Utc::now()).apply(&mut device);
        assert_eq!(device.last_reading, Some(7.1));
        assert!(device.last_error.is_none());
    }
}
