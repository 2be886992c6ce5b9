//! Batch health checks over every health-checkable device
//!
//! Devices are grouped by controller. Offline (or unknown) controllers force
//! their devices to `error` without touching the validator; online actuators
//! and paused sensors are auto-healthy; the rest go through the validator.
//! Every outcome is written back to the device record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::validator::{HealthValidation, SensorHealth, SensorHealthValidator};
use crate::core::engine::CommandEngine;
use crate::error::{HwError, Result};
use crate::model::{Controller, Device, DeviceUpdate, HealthStatus};
use crate::storage::{DeviceQuery, Repositories};

const CONTROLLER_OFFLINE: &str = "Controller offline";
const ACTUATOR_HEALTHY: &str = "Controller online, actuator auto-healthy";
const CHECKING_DISABLED: &str = "Health checking disabled";

/// Outcome for one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealthResult {
    pub device_id: String,
    pub device_name: String,
    pub controller_id: String,
    pub status: HealthStatus,
    pub checking_enabled: bool,
    pub message: String,
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_health: Option<HealthValidation>,
}

impl DeviceHealthResult {
    fn new(device: &Device, status: HealthStatus, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            controller_id: device.controller_id.clone(),
            status,
            checking_enabled: checking_enabled(device),
            last_error: (status == HealthStatus::Error).then(|| message.clone()),
            message,
            sensor_health: None,
        }
    }

    fn label(&self) -> &str {
        if self.device_name.is_empty() {
            &self.device_id
        } else {
            &self.device_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub total_devices: usize,
    pub online_devices: usize,
    pub critical_issues: Vec<String>,
    pub warnings: Vec<String>,
    pub devices: Vec<DeviceHealthResult>,
}

impl HealthReport {
    fn from_results(devices: Vec<DeviceHealthResult>) -> Self {
        let mut critical_issues = Vec::new();
        let mut warnings = Vec::new();

        for result in &devices {
            match result.sensor_health.as_ref().map(|h| h.status) {
                Some(SensorHealth::Unhealthy) => {
                    critical_issues.push(format!("Sensor {}: {}", result.label(), result.message));
                },
                Some(SensorHealth::Warning) => {
                    warnings.push(format!("Sensor {}: {}", result.label(), result.message));
                },
                _ if result.status == HealthStatus::Error => {
                    warnings.push(format!("Sensor {} is in error: {}", result.label(), result.message));
                },
                _ => {},
            }
        }

        Self {
            timestamp: Utc::now(),
            total_devices: devices.len(),
            online_devices: devices.iter().filter(|d| d.status != HealthStatus::Error).count(),
            critical_issues,
            warnings,
            devices,
        }
    }
}

fn checking_enabled(device: &Device) -> bool {
    device.is_active && device.health_check_enabled && device.checking_enabled
}

// ============================================================================
// Checker
// ============================================================================

#[derive(Debug, Clone)]
pub struct SensorHealthChecker {
    repos: Repositories,
    validator: Arc<SensorHealthValidator>,
    /// Present when sensors are read live instead of from the cache
    live_engine: Option<CommandEngine>,
}

impl SensorHealthChecker {
    pub fn new(repos: Repositories, validator: Arc<SensorHealthValidator>) -> Self {
        Self {
            repos,
            validator,
            live_engine: None,
        }
    }

    /// Validate sensors from fresh reads through `engine`
    pub fn with_live_reads(mut self, engine: CommandEngine) -> Self {
        self.live_engine = Some(engine);
        self
    }

    /// Check every active, health-check-enabled device
    pub async fn check_all(&self) -> Result<HealthReport> {
        let started = Instant::now();
        let devices = self
            .repos
            .devices
            .find_devices(&DeviceQuery::health_checkable())
            .await?;
        info!("Health check started: {} devices", devices.len());

        let mut groups: BTreeMap<String, Vec<Device>> = BTreeMap::new();
        for device in devices {
            groups.entry(device.controller_id.clone()).or_default().push(device);
        }

        let mut results = Vec::new();
        for (controller_id, devices) in groups {
            let controller = self.load_controller(&controller_id).await;
            for device in devices {
                let result = self.evaluate(&device, controller.as_ref()).await;
                self.persist(&result).await;
                results.push(result);
            }
        }

        let report = HealthReport::from_results(results);
        info!(
            "Health check completed in {:?}: {}/{} online, {} critical, {} warnings",
            started.elapsed(),
            report.online_devices,
            report.total_devices,
            report.critical_issues.len(),
            report.warnings.len()
        );
        Ok(report)
    }

    /// Check one device by id
    pub async fn check_single_sensor(&self, device_id: &str) -> Result<DeviceHealthResult> {
        let device = self
            .repos
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| HwError::DeviceNotFound(device_id.to_string()))?;

        let controller = self.load_controller(&device.controller_id).await;
        let result = self.evaluate(&device, controller.as_ref()).await;
        self.persist(&result).await;
        Ok(result)
    }

    /// Run `check_all` every `interval` until `shutdown` fires
    pub async fn run_periodic(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!("Health checks every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_all().await {
                        error!("Health check failed: {}", e);
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Health check loop received cancellation signal, shutting down");
                    break;
                }
            }
        }
    }

    /// `None` for unknown controllers and lookup failures alike
    async fn load_controller(&self, controller_id: &str) -> Option<Controller> {
        match self.repos.controllers.find_controller(controller_id).await {
            Ok(Some(controller)) => Some(controller),
            Ok(None) => {
                warn!("Controller {} not found, treating its devices as offline", controller_id);
                None
            },
            Err(e) => {
                warn!(
                    "Controller {} lookup failed, treating its devices as offline: {}",
                    controller_id, e
                );
                None
            },
        }
    }

    async fn evaluate(&self, device: &Device, controller: Option<&Controller>) -> DeviceHealthResult {
        if !controller.is_some_and(Controller::is_online) {
            return DeviceHealthResult::new(device, HealthStatus::Error, CONTROLLER_OFFLINE);
        }
        if !device.is_sensor() {
            return DeviceHealthResult::new(device, HealthStatus::Healthy, ACTUATOR_HEALTHY);
        }
        if !checking_enabled(device) {
            return DeviceHealthResult::new(device, HealthStatus::Healthy, CHECKING_DISABLED);
        }

        let verdict = match &self.live_engine {
            Some(engine) => self.validator.validate_live(engine, device).await,
            None => self.validator.validate(device).await,
        };
        let validation = match verdict {
            Ok(validation) => validation,
            Err(e) => {
                return DeviceHealthResult::new(device, HealthStatus::Error, format!("Sensor check failed: {}", e));
            },
        };

        let mut result = match validation.status {
            SensorHealth::Unhealthy => {
                let mut result = DeviceHealthResult::new(device, HealthStatus::Error, validation.message.clone());
                result.last_error = Some(format!("Sensor validation failed: {}", validation.message));
                result
            },
            SensorHealth::Warning => DeviceHealthResult::new(device, HealthStatus::Warning, validation.message.clone()),
            SensorHealth::Healthy => DeviceHealthResult::new(device, HealthStatus::Healthy, validation.message.clone()),
        };
        result.sensor_health = Some(validation);
        result
    }

    async fn persist(&self, result: &DeviceHealthResult) {
        let update = DeviceUpdate {
            health_status: Some(result.status),
            checking_enabled: Some(result.checking_enabled),
            last_health_check: Some(Utc::now()),
            last_error: Some(result.last_error.clone()),
            ..Default::default()
        };
        match self.repos.devices.update_device(&result.device_id, &update).await {
            Ok(()) => debug!("Device {}: health {:?} stored", result.device_id, result.status),
            Err(e) => error!(
                "Device {}: health result {:?} was not stored: {}",
                result.device_id, result.status, e
            ),
        }
    }
}
