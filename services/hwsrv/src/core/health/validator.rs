//! Three-layer sensor validation
//!
//! Range and historical checks run against cached data. The live variant
//! reads through the command engine first, which adds the communication
//! layer. Precedence: any hard failure is `UNHEALTHY`, any soft failure is
//! `WARNING`, anything else is `HEALTHY`.

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::engine::CommandEngine;
use crate::error::Result;
use crate::model::{Command, Device, ValidationConfig};
use crate::storage::{Reading, ReadingHistory};

/// Samples looked at by the historical layer
pub const DEFAULT_HISTORY_LIMIT: usize = 100;
/// Nominal sampling cadence behind the stuck-value limit
const SAMPLE_INTERVAL_MINUTES: f64 = 5.0;
const STUCK_TOLERANCE: f64 = 0.01;
const DEFAULT_HISTORY_WINDOW_HOURS: u32 = 24;
/// Duration hint sent with live reads
const LIVE_READ_DURATION_MS: f64 = 1000.0;

const ISSUE_PHYSICAL: &str = "value exceeds physical limits (critical)";
const ISSUE_EXPECTED: &str = "value outside expected range (needs attention)";
const ISSUE_PATTERN: &str = "anomalous behavior pattern";
const ISSUE_COMMUNICATION: &str = "communication failure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorHealth {
    Healthy,
    Warning,
    Unhealthy,
}

impl SensorHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorHealth::Healthy => "HEALTHY",
            SensorHealth::Warning => "WARNING",
            SensorHealth::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for SensorHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthValidation {
    pub status: SensorHealth,
    pub range_health: bool,
    pub historical_health: bool,
    pub communication_health: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub message: String,
    pub issues: Vec<String>,
}

impl HealthValidation {
    fn skipped() -> Self {
        Self {
            status: SensorHealth::Healthy,
            range_health: true,
            historical_health: true,
            communication_health: true,
            value: None,
            message: "Validation skipped - not a sensor".to_string(),
            issues: Vec::new(),
        }
    }
}

// ============================================================================
// Pure checks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeCheck {
    pub physical_valid: bool,
    pub expected_valid: bool,
}

/// A missing value passes; NaN fails both ranges
pub fn check_range(value: Option<f64>, config: &ValidationConfig) -> RangeCheck {
    match value {
        None => RangeCheck {
            physical_valid: true,
            expected_valid: true,
        },
        Some(v) if v.is_nan() => RangeCheck {
            physical_valid: false,
            expected_valid: false,
        },
        Some(v) => RangeCheck {
            physical_valid: v >= config.physical_min && v <= config.physical_max,
            expected_valid: v >= config.expected_min && v <= config.expected_max,
        },
    }
}

/// Longest plausible run of identical samples for a threshold in minutes
pub fn stuck_run_limit(threshold_minutes: u32) -> usize {
    (f64::from(threshold_minutes) / SAMPLE_INTERVAL_MINUTES).ceil() as usize
}

/// `readings` newest first
pub fn is_stuck(readings: &[Reading], threshold_minutes: u32) -> bool {
    let Some(latest) = readings.first() else {
        return false;
    };
    if readings.len() < 2 {
        return false;
    }
    let run = readings
        .iter()
        .take_while(|r| (r.value - latest.value).abs() < STUCK_TOLERANCE)
        .count();
    run > stuck_run_limit(threshold_minutes)
}

/// `readings` newest first; rate in units per minute
pub fn exceeds_change_rate(readings: &[Reading], max_change_rate: f64) -> bool {
    readings.windows(2).any(|pair| {
        let minutes = (pair[0].timestamp - pair[1].timestamp).num_milliseconds() as f64 / 60_000.0;
        minutes > 0.0 && (pair[0].value - pair[1].value).abs() / minutes > max_change_rate
    })
}

/// Wire command for a live read of this device type
pub fn live_read_command(device_type: &str) -> &'static str {
    match device_type {
        "DHT22" => "SINGLE_WIRE_PULSE",
        "DS18B20" => "SINGLE_WIRE_ONEWIRE",
        "SEN0551" => "PULSE_COUNT",
        _ => "ANALOG",
    }
}

struct Layers {
    range: RangeCheck,
    historical: bool,
    communication: bool,
}

impl Layers {
    fn status(&self) -> SensorHealth {
        if !self.communication || !self.range.physical_valid {
            SensorHealth::Unhealthy
        } else if !self.range.expected_valid || !self.historical {
            SensorHealth::Warning
        } else {
            SensorHealth::Healthy
        }
    }

    fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if !self.communication {
            issues.push(ISSUE_COMMUNICATION.to_string());
        }
        if !self.range.physical_valid {
            issues.push(ISSUE_PHYSICAL.to_string());
        } else if !self.range.expected_valid {
            issues.push(ISSUE_EXPECTED.to_string());
        }
        if !self.historical {
            issues.push(ISSUE_PATTERN.to_string());
        }
        issues
    }
}

// ============================================================================
// Validator
// ============================================================================

pub struct SensorHealthValidator {
    history: Arc<dyn ReadingHistory>,
    history_limit: usize,
}

impl fmt::Debug for SensorHealthValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorHealthValidator")
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl SensorHealthValidator {
    pub fn new(history: Arc<dyn ReadingHistory>) -> Self {
        Self {
            history,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(2);
        self
    }

    /// Validate from the cached `lastReading`
    pub async fn validate(&self, device: &Device) -> Result<HealthValidation> {
        if !device.is_sensor() {
            return Ok(HealthValidation::skipped());
        }

        let value = device.last_reading;
        let layers = Layers {
            range: check_range(value, &device.validation_config),
            historical: self.historical_health(device).await?,
            communication: true,
        };
        Ok(self.finish(device, value, layers, "cached"))
    }

    /// Validate from a fresh read through the engine
    pub async fn validate_live(&self, engine: &CommandEngine, device: &Device) -> Result<HealthValidation> {
        if !device.is_sensor() {
            return Ok(HealthValidation::skipped());
        }

        let command = Command::new(live_read_command(&device.device_type))
            .for_device(device.id.as_str())
            .with_duration(LIVE_READ_DURATION_MS);
        let response = engine.send_command(&device.controller_id, command).await;

        let value = if response.is_ok() {
            response.numeric_value()
        } else {
            None
        };
        if value.is_none() {
            warn!(
                "Device {}: live read failed on controller {}: {}",
                device.id,
                device.controller_id,
                response.error_text()
            );
        }

        let layers = Layers {
            range: check_range(value, &device.validation_config),
            historical: self.historical_health(device).await?,
            communication: value.is_some(),
        };
        Ok(self.finish(device, value, layers, "live"))
    }

    async fn historical_health(&self, device: &Device) -> Result<bool> {
        let config = &device.validation_config;
        let hours = match config.history_window {
            0 => DEFAULT_HISTORY_WINDOW_HOURS,
            h => h,
        };
        let since = Utc::now() - ChronoDuration::hours(i64::from(hours));
        let readings = self
            .history
            .recent_readings(&device.id, since, self.history_limit)
            .await?;

        if readings.len() < 2 {
            return Ok(true);
        }
        if is_stuck(&readings, config.stuck_value_threshold) {
            debug!(
                "Device {}: stuck at {} over {} samples",
                device.id,
                readings[0].value,
                readings.len()
            );
            return Ok(false);
        }
        if exceeds_change_rate(&readings, config.max_change_rate) {
            debug!(
                "Device {}: change rate above {}/min",
                device.id, config.max_change_rate
            );
            return Ok(false);
        }
        Ok(true)
    }

    fn finish(&self, device: &Device, value: Option<f64>, layers: Layers, source: &str) -> HealthValidation {
        let status = layers.status();
        let issues = layers.issues();
        let message = match status {
            SensorHealth::Healthy => format!("Sensor data is within acceptable ranges - {} validation passed", source),
            _ => format!(
                "Sensor health {} ({} data): {}",
                status.as_str().to_lowercase(),
                source,
                issues.join(", ")
            ),
        };

        match status {
            SensorHealth::Healthy => info!("Device {}: {}", device.id, message),
            SensorHealth::Warning => warn!("Device {}: {} (value {:?})", device.id, message, value),
            SensorHealth::Unhealthy => error!("Device {}: {} (value {:?})", device.id, message, value),
        }

        HealthValidation {
            status,
            range_health: layers.range.physical_valid && layers.range.expected_valid,
            historical_health: layers.historical,
            communication_health: layers.communication,
            value,
            message,
            issues,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::storage::InMemoryRepository;
    use chrono::{DateTime, Duration};
    use serde_json::json;

    fn series(start: DateTime<Utc>, step_minutes: i64, values: &[f64]) -> Vec<Reading> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Reading {
                value: *v,
                timestamp: start - Duration::minutes(step_minutes * i as i64),
            })
            .collect()
    }

    fn sensor(last_reading: Option<f64>) -> Device {
        let mut device: Device = serde_json::from_value(json!({
            "id": "ph-1", "controllerId": "c", "type": "dfrobot_ph_sensor", "category": "sensor",
            "ports": ["A0"],
            "validationConfig": {"expectedMin": 5.5, "expectedMax": 7.5, "physicalMin": 0, "physicalMax": 14}
        }))
        .unwrap();
        device.last_reading = last_reading;
        device
    }

    #[test]
    fn test_range_layers() {
        let cfg = sensor(None).validation_config;
        assert_eq!(
            check_range(Some(6.5), &cfg),
            RangeCheck { physical_valid: true, expected_valid: true }
        );
        assert_eq!(
            check_range(Some(9.0), &cfg),
            RangeCheck { physical_valid: true, expected_valid: false }
        );
        assert!(!check_range(Some(15.0), &cfg).physical_valid);
        assert!(!check_range(Some(f64::NAN), &cfg).physical_valid);
        assert!(check_range(None, &cfg).physical_valid);
    }

    #[test]
    fn test_stuck_run_limit_rounds_up() {
        assert_eq!(stuck_run_limit(30), 6);
        assert_eq!(stuck_run_limit(31), 7);
        assert_eq!(stuck_run_limit(0), 0);
    }

    #[test]
    fn test_stuck_detection_resets_on_differing_value() {
        let now = Utc::now();
        let stuck = series(now, 5, &[7.0; 7]);
        assert!(is_stuck(&stuck, 30));

        let mut values = [7.0; 7];
        values[3] = 7.4;
        assert!(!is_stuck(&series(now, 5, &values), 30));

        assert!(!is_stuck(&series(now, 5, &[7.0; 6]), 30));
    }

    #[test]
    fn test_change_rate_skips_zero_interval() {
        let now = Utc::now();
        assert!(exceeds_change_rate(&series(now, 1, &[50.0, 10.0]), 10.0));
        assert!(!exceeds_change_rate(&series(now, 10, &[50.0, 10.0]), 10.0));
        assert!(!exceeds_change_rate(&series(now, 0, &[50.0, 10.0]), 10.0));
    }

    #[test]
    fn test_live_read_command_per_type() {
        assert_eq!(live_read_command("DHT22"), "SINGLE_WIRE_PULSE");
        assert_eq!(live_read_command("DS18B20"), "SINGLE_WIRE_ONEWIRE");
        assert_eq!(live_read_command("SEN0551"), "PULSE_COUNT");
        assert_eq!(live_read_command("dfrobot_ph_sensor"), "ANALOG");
    }

    #[tokio::test]
    async fn test_cached_verdicts() {
        let validator = SensorHealthValidator::new(Arc::new(InMemoryRepository::new()));

        let healthy = validator.validate(&sensor(Some(6.8))).await.unwrap();
        assert_eq!(healthy.status, SensorHealth::Healthy);
        assert_eq!(
            healthy.message,
            "Sensor data is within acceptable ranges - cached validation passed"
        );

        let warning = validator.validate(&sensor(Some(8.2))).await.unwrap();
        assert_eq!(warning.status, SensorHealth::Warning);
        assert_eq!(
            warning.message,
            "Sensor health warning (cached data): value outside expected range (needs attention)"
        );

        let unhealthy = validator.validate(&sensor(Some(20.0))).await.unwrap();
        assert_eq!(unhealthy.status, SensorHealth::Unhealthy);
        assert!(!unhealthy.range_health);
    }

    #[tokio::test]
    async fn test_missing_reading_is_not_judged() {
        let validator = SensorHealthValidator::new(Arc::new(InMemoryRepository::new()));
        let verdict = validator.validate(&sensor(None)).await.unwrap();
        assert_eq!(verdict.status, SensorHealth::Healthy);
        assert!(verdict.value.is_none());
    }

    #[tokio::test]
    async fn test_actuators_are_skipped() {
        let validator = SensorHealthValidator::new(Arc::new(InMemoryRepository::new()));
        let mut device = sensor(Some(999.0));
        device.category = crate::model::DeviceCategory::Actuator;
        let verdict = validator.validate(&device).await.unwrap();
        assert_eq!(verdict.status, SensorHealth::Healthy);
        assert_eq!(verdict.message, "Validation skipped - not a sensor");
    }

    #[tokio::test]
    async fn test_history_pattern_is_soft_failure() {
        let repo = Arc::new(InMemoryRepository::new());
        let now = Utc::now();
        for reading in series(now, 5, &[6.5; 8]).into_iter().rev() {
            repo.record_reading("ph-1", reading);
        }
        let validator = SensorHealthValidator::new(repo);

        let verdict = validator.validate(&sensor(Some(6.5))).await.unwrap();
        assert_eq!(verdict.status, SensorHealth::Warning);
        assert!(!verdict.historical_health);
        assert_eq!(verdict.issues, vec!["anomalous behavior pattern".to_string()]);
    }
}
