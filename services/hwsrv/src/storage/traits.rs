use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::model::{Controller, ControllerStatus, Device, DeviceCategory, DeviceTemplate, DeviceUpdate, PinLevel};

/// Filter for `find_devices`; `None` fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceQuery {
    pub controller_id: Option<String>,
    pub category: Option<DeviceCategory>,
    pub is_active: Option<bool>,
    pub health_check_enabled: Option<bool>,
}

impl DeviceQuery {
    /// Active devices that opted into health checks
    pub fn health_checkable() -> Self {
        Self {
            is_active: Some(true),
            health_check_enabled: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, device: &Device) -> bool {
        self.controller_id
            .as_ref()
            .map_or(true, |id| *id == device.controller_id)
            && self.category.map_or(true, |c| c == device.category)
            && self.is_active.map_or(true, |a| a == device.is_active)
            && self
                .health_check_enabled
                .map_or(true, |h| h == device.health_check_enabled)
    }
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn find_device(&self, id: &str) -> Result<Option<Device>>;

    async fn find_devices(&self, query: &DeviceQuery) -> Result<Vec<Device>>;

    async fn update_device(&self, id: &str, update: &DeviceUpdate) -> Result<()>;
}

#[async_trait]
pub trait ControllerRepository: Send + Sync {
    async fn find_controller(&self, id: &str) -> Result<Option<Controller>>;

    async fn list_controllers(&self) -> Result<Vec<Controller>>;

    /// Mirror the live connection state onto the record
    async fn update_controller_status(&self, controller_id: &str, status: ControllerStatus) -> Result<()>;

    /// Update the cached level of one port; `None` clears it
    async fn update_port_state(&self, controller_id: &str, port_key: &str, state: Option<PinLevel>) -> Result<()>;
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Active template whose `type` equals the device type
    async fn find_template(&self, device_type: &str) -> Result<Option<DeviceTemplate>>;
}

/// One stored sensor sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ReadingHistory: Send + Sync {
    /// Samples newer than `since`, newest first, at most `limit`
    async fn recent_readings(&self, device_id: &str, since: DateTime<Utc>, limit: usize) -> Result<Vec<Reading>>;
}

/// The repository handles the engine and the health layer need
#[derive(Clone)]
pub struct Repositories {
    pub devices: Arc<dyn DeviceRepository>,
    pub controllers: Arc<dyn ControllerRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub history: Arc<dyn ReadingHistory>,
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

impl Repositories {
    /// All four roles served by one store
    pub fn shared<R>(store: Arc<R>) -> Self
    where
        R: DeviceRepository + ControllerRepository + TemplateRepository + ReadingHistory + 'static,
    {
        Self {
            devices: store.clone(),
            controllers: store.clone(),
            templates: store.clone(),
            history: store,
        }
    }
}
