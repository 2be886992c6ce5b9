//! In-memory repositories seeded from an inventory file

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, info};

use super::traits::{
    ControllerRepository, DeviceQuery, DeviceRepository, Reading, ReadingHistory, TemplateRepository,
};
use crate::error::{HwError, Result};
use crate::model::{Controller, ControllerStatus, Device, DeviceTemplate, DeviceUpdate, PinLevel};

/// Samples kept per device
const HISTORY_CAPACITY: usize = 2048;

/// Controllers, devices and templates as written in the inventory YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub controllers: Vec<Controller>,
    pub devices: Vec<Device>,
    pub templates: Vec<DeviceTemplate>,
}

impl Inventory {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| HwError::config(format!("Invalid inventory: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HwError::config(format!("Cannot read inventory {}: {}", path.display(), e)))?;
        let inventory = Self::from_yaml_str(&text)?;
        info!(
            "Loaded inventory {}: {} controllers, {} devices, {} templates",
            path.display(),
            inventory.controllers.len(),
            inventory.devices.len(),
            inventory.templates.len()
        );
        Ok(inventory)
    }

    /// Devices pointing at controllers that are not in the file
    pub fn dangling_devices(&self) -> Vec<&Device> {
        self.devices
            .iter()
            .filter(|d| !self.controllers.iter().any(|c| c.id == d.controller_id))
            .collect()
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    controllers: RwLock<AHashMap<String, Controller>>,
    devices: RwLock<AHashMap<String, Device>>,
    /// Keyed by device type
    templates: RwLock<AHashMap<String, DeviceTemplate>>,
    history: RwLock<AHashMap<String, VecDeque<Reading>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_inventory(inventory: Inventory) -> Self {
        let repo = Self::new();
        for controller in inventory.controllers {
            repo.insert_controller(controller);
        }
        for device in inventory.devices {
            repo.insert_device(device);
        }
        for template in inventory.templates {
            repo.insert_template(template);
        }
        repo
    }

    pub fn insert_controller(&self, controller: Controller) {
        self.controllers.write().insert(controller.id.clone(), controller);
    }

    pub fn insert_device(&self, device: Device) {
        self.devices.write().insert(device.id.clone(), device);
    }

    /// Inactive templates are stored but never returned by lookups
    pub fn insert_template(&self, template: DeviceTemplate) {
        let mut templates = self.templates.write();
        let keep_existing = templates
            .get(&template.device_type)
            .is_some_and(|existing| existing.is_active && !template.is_active);
        if !keep_existing {
            templates.insert(template.device_type.clone(), template);
        }
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.devices.read().get(id).cloned()
    }

    pub fn controller(&self, id: &str) -> Option<Controller> {
        self.controllers.read().get(id).cloned()
    }

    pub fn record_reading(&self, device_id: &str, reading: Reading) {
        let mut history = self.history.write();
        let samples = history.entry(device_id.to_string()).or_default();
        samples.push_back(reading);
        while samples.len() > HISTORY_CAPACITY {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> Inventory {
        Inventory {
            controllers: self.controllers.read().values().cloned().collect(),
            devices: self.devices.read().values().cloned().collect(),
            templates: self.templates.read().values().cloned().collect(),
        }
    }
}

#[async_trait]
impl DeviceRepository for InMemoryRepository {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        Ok(self.device(id))
    }

    async fn find_devices(&self, query: &DeviceQuery) -> Result<Vec<Device>> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(devices)
    }

    async fn update_device(&self, id: &str, update: &DeviceUpdate) -> Result<()> {
        let reading = {
            let mut devices = self.devices.write();
            let device = devices
                .get_mut(id)
                .ok_or_else(|| HwError::DeviceNotFound(id.to_string()))?;
            update.apply(device);
            update.last_reading.map(|value| Reading {
                value,
                timestamp: update.last_reading_timestamp.unwrap_or_else(Utc::now),
            })
        };
        if let Some(reading) = reading {
            self.record_reading(id, reading);
        }
        debug!("Device {} updated", id);
        Ok(())
    }
}

#[async_trait]
impl ControllerRepository for InMemoryRepository {
    async fn find_controller(&self, id: &str) -> Result<Option<Controller>> {
        Ok(self.controller(id))
    }

    async fn list_controllers(&self) -> Result<Vec<Controller>> {
        let mut controllers: Vec<Controller> = self.controllers.read().values().cloned().collect();
        controllers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(controllers)
    }

    async fn update_controller_status(&self, controller_id: &str, status: ControllerStatus) -> Result<()> {
        let mut controllers = self.controllers.write();
        let controller = controllers
            .get_mut(controller_id)
            .ok_or_else(|| HwError::repository(format!("Controller {} not found", controller_id)))?;
        controller.status = status;
        Ok(())
    }

    async fn update_port_state(&self, controller_id: &str, port_key: &str, state: Option<PinLevel>) -> Result<()> {
        let mut controllers = self.controllers.write();
        let controller = controllers
            .get_mut(controller_id)
            .ok_or_else(|| HwError::repository(format!("Controller {} not found", controller_id)))?;
        let port = controller
            .available_ports
            .iter_mut()
            .find(|p| p.key == port_key)
            .ok_or_else(|| {
                HwError::repository(format!(
                    "Port {} not found on controller {}",
                    port_key, controller_id
                ))
            })?;
        port.current_state = state;
        Ok(())
    }
}

#[async_trait]
impl TemplateRepository for InMemoryRepository {
    async fn find_template(&self, device_type: &str) -> Result<Option<DeviceTemplate>> {
        Ok(self
            .templates
            .read()
            .get(device_type)
            .filter(|t| t.is_active)
            .cloned())
    }
}

#[async_trait]
impl ReadingHistory for InMemoryRepository {
    async fn recent_readings(&self, device_id: &str, since: DateTime<Utc>, limit: usize) -> Result<Vec<Reading>> {
        let history = self.history.read();
        Ok(history
            .get(device_id)
            .map(|samples| {
                samples
                    .iter()
                    .rev()
                    .filter(|r| r.timestamp >= since)
                    .take(limit)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}
