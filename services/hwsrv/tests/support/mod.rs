//! Shared fixtures for hwsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hwsrv::core::adapter::MockAdapter;
use hwsrv::core::builder::CatalogCommandBuilder;
use hwsrv::core::conversion::ConverterRegistry;
use hwsrv::core::engine::{CommandEngine, EngineSettings};
use hwsrv::core::registry::StaticRegistry;
use hwsrv::error::{HwError, Result};
use hwsrv::model::{Controller, ControllerStatus, Device, DeviceTemplate, DeviceUpdate, PinLevel};
use hwsrv::storage::{
    ControllerRepository, DeviceQuery, DeviceRepository, InMemoryRepository, Inventory, Reading, ReadingHistory,
    Repositories, TemplateRepository,
};

pub const BENCH: &str = "bench";

/// One serial bench controller with the device mix the engine scenarios use
pub const BENCH_INVENTORY: &str = r#"
controllers:
  - id: bench
    name: Bench Uno
    communicationType: raw_serial
    status: online
    availablePorts:
      - { key: D2, type: digital, isActive: true }
      - { key: D3, type: digital, isActive: true }
      - { key: D7, type: digital, isActive: true }
      - { key: A0, type: analog, isActive: true }
devices:
  - { id: pump, controllerId: bench, type: relay, category: actuator, ports: [D2], relayLogic: active_low }
  - { id: light, controllerId: bench, type: relay, category: actuator, ports: [D3] }
  - { id: ph, controllerId: bench, type: ph_probe, category: sensor, ports: [A0], physicalType: ph }
  - { id: doser, controllerId: bench, type: dosing_pump, category: actuator, ports: [D7] }
templates:
  - type: relay
    executionConfig: { strategy: single_command, commandType: ACTIVATE_RELAY }
  - type: ph_probe
    executionConfig: { strategy: single_command, commandType: ANALOG }
  - type: dosing_pump
    executionConfig:
      strategy: multi_step
      commandSequence:
        - { command: SET_PIN, parameters: { state: 1 } }
        - { command: SET_PIN, parameters: { state: 0 } }
        - { command: READ }
"#;

pub struct Bench {
    pub engine: CommandEngine,
    pub adapter: Arc<MockAdapter>,
    pub store: Arc<InMemoryRepository>,
    pub converters: Arc<ConverterRegistry>,
}

/// Engine over a connected mock adapter and the given repositories
pub fn bench_with(repos: Repositories, store: Arc<InMemoryRepository>) -> Bench {
    let adapter = Arc::new(MockAdapter::connected(BENCH));
    let registry = StaticRegistry::new();
    registry.insert(adapter.clone());

    let converters = Arc::new(ConverterRegistry::new());
    let engine = CommandEngine::new(
        Arc::new(registry),
        repos,
        converters.clone(),
        Arc::new(CatalogCommandBuilder::new()),
        EngineSettings::default(),
    );
    Bench {
        engine,
        adapter,
        store,
        converters,
    }
}

pub fn bench() -> Bench {
    let store = Arc::new(InMemoryRepository::from_inventory(
        Inventory::from_yaml_str(BENCH_INVENTORY).unwrap(),
    ));
    bench_with(Repositories::shared(store.clone()), store)
}

/// Serialized wire form of every command the adapter saw
pub fn wire_log(adapter: &MockAdapter) -> Vec<serde_json::Value> {
    adapter
        .sent_commands()
        .iter()
        .map(|c| serde_json::to_value(c).unwrap())
        .collect()
}

// ============================================================================
// Failing store
// ============================================================================

/// Reads pass through; writes fail while `fail_writes` is set
pub struct FlakyStore {
    pub inner: Arc<InMemoryRepository>,
    pub fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            fail_writes: AtomicBool::new(true),
        })
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(HwError::repository("database is locked"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeviceRepository for FlakyStore {
    async fn find_device(&self, id: &str) -> Result<Option<Device>> {
        self.inner.find_device(id).await
    }

    async fn find_devices(&self, query: &DeviceQuery) -> Result<Vec<Device>> {
        self.inner.find_devices(query).await
    }

    async fn update_device(&self, id: &str, update: &DeviceUpdate) -> Result<()> {
        self.check_write()?;
        self.inner.update_device(id, update).await
    }
}

#[async_trait]
impl ControllerRepository for FlakyStore {
    async fn find_controller(&self, id: &str) -> Result<Option<Controller>> {
        self.inner.find_controller(id).await
    }

    async fn list_controllers(&self) -> Result<Vec<Controller>> {
        self.inner.list_controllers().await
    }

    async fn update_controller_status(&self, controller_id: &str, status: ControllerStatus) -> Result<()> {
        self.check_write()?;
        self.inner.update_controller_status(controller_id, status).await
    }

    async fn update_port_state(&self, controller_id: &str, port_key: &str, state: Option<PinLevel>) -> Result<()> {
        self.check_write()?;
        self.inner.update_port_state(controller_id, port_key, state).await
    }
}

#[async_trait]
impl TemplateRepository for FlakyStore {
    async fn find_template(&self, device_type: &str) -> Result<Option<DeviceTemplate>> {
        self.inner.find_template(device_type).await
    }
}

#[async_trait]
impl ReadingHistory for FlakyStore {
    async fn recent_readings(&self, device_id: &str, since: DateTime<Utc>, limit: usize) -> Result<Vec<Reading>> {
        self.inner.recent_readings(device_id, since, limit).await
    }
}
