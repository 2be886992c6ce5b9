//! Runtime Orchestration Layer
//!
//! Builds the service graph once at startup and passes handles around:
//!
//! ```text
//! inventory ─► InMemoryRepository ─┬─► ConnectionManager ◄─ AdapterFactory
//!                                  ├─► CommandEngine
//!                                  └─► SensorHealthChecker ─► SensorHealthValidator
//! ```

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::adapter::AdapterFactory;
use crate::core::builder::CatalogCommandBuilder;
use crate::core::config::HwsrvConfig;
use crate::core::conversion::ConverterRegistry;
use crate::core::engine::CommandEngine;
use crate::core::health::{HealthReport, SensorHealthChecker, SensorHealthValidator};
use crate::core::notify::{BroadcastSink, FanoutSink, LifecycleEvent, TracingSink};
use crate::core::registry::ConnectionManager;
use crate::error::Result;
use crate::model::{Controller, ControllerStatus};
use crate::storage::{InMemoryRepository, Inventory, Repositories};

/// Lifecycle events buffered per subscriber
const LIFECYCLE_CAPACITY: usize = 64;

pub struct HwsrvRuntime {
    config: HwsrvConfig,
    store: Arc<InMemoryRepository>,
    repos: Repositories,
    connections: Arc<ConnectionManager>,
    converters: Arc<ConverterRegistry>,
    engine: CommandEngine,
    checker: SensorHealthChecker,
    lifecycle: BroadcastSink,
}

impl std::fmt::Debug for HwsrvRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwsrvRuntime")
            .field("service", &self.config.service.name)
            .field("connections", &self.connections)
            .field("engine", &self.engine)
            .finish()
    }
}

impl HwsrvRuntime {
    /// Runtime with the real serial and HTTP transports
    pub fn new(config: HwsrvConfig, inventory: Inventory) -> Self {
        let factory = AdapterFactory::new(config.serial.timings(), config.http.timings());
        Self::with_factory(config, inventory, factory)
    }

    pub fn with_factory(config: HwsrvConfig, inventory: Inventory, factory: AdapterFactory) -> Self {
        let store = Arc::new(InMemoryRepository::from_inventory(inventory));
        let repos = Repositories::shared(store.clone());

        let lifecycle = BroadcastSink::new(LIFECYCLE_CAPACITY);
        let sink = FanoutSink::new().with(TracingSink).with(lifecycle.clone());
        let connections = Arc::new(ConnectionManager::new(Arc::new(factory), Arc::new(sink)));

        let converters = Arc::new(ConverterRegistry::new());
        let engine = CommandEngine::new(
            connections.clone(),
            repos.clone(),
            converters.clone(),
            Arc::new(CatalogCommandBuilder::new()),
            config.engine,
        );

        let validator = Arc::new(
            SensorHealthValidator::new(repos.history.clone()).with_history_limit(config.validation.history_limit),
        );
        let mut checker = SensorHealthChecker::new(repos.clone(), validator);
        if config.validation.live_reads {
            checker = checker.with_live_reads(engine.clone());
        }

        Self {
            config,
            store,
            repos,
            connections,
            converters,
            engine,
            checker,
            lifecycle,
        }
    }

    pub fn config(&self) -> &HwsrvConfig {
        &self.config
    }

    pub fn engine(&self) -> &CommandEngine {
        &self.engine
    }

    pub fn checker(&self) -> &SensorHealthChecker {
        &self.checker
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn store(&self) -> &Arc<InMemoryRepository> {
        &self.store
    }

    /// Register converters here before commands start flowing
    pub fn converters(&self) -> &Arc<ConverterRegistry> {
        &self.converters
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Connect every active controller and mirror its liveness onto the record
    ///
    /// Returns how many controllers answered the follow-up ping.
    pub async fn connect_all(&self) -> Result<usize> {
        let controllers = self.repos.controllers.list_controllers().await?;
        self.connections.connect_all(&controllers).await;
        Ok(self.sync_controller_status(&controllers, false).await)
    }

    /// Ping every controller, reopen dropped links, persist online/offline
    ///
    /// Runs before each health batch so device checks see current status.
    pub async fn refresh_controllers(&self) -> Result<usize> {
        let controllers = self.repos.controllers.list_controllers().await?;
        Ok(self
            .sync_controller_status(&controllers, self.config.service.reconnect_offline)
            .await)
    }

    async fn sync_controller_status(&self, controllers: &[Controller], reconnect: bool) -> usize {
        let timeout = self.config.ping_timeout();
        let mut online = 0;

        for controller in controllers {
            if reconnect && controller.is_active && !self.connections.is_connected(&controller.id) {
                debug!("Controller {}: link down, reconnecting", controller.id);
                self.connections.connect(controller).await;
            }

            let status = if controller.is_active && self.connections.ping(&controller.id, timeout).await {
                online += 1;
                ControllerStatus::Online
            } else {
                ControllerStatus::Offline
            };
            if controller.status != status {
                info!(
                    "Controller {}: status {:?} -> {:?}",
                    controller.id, controller.status, status
                );
            }

            if let Err(e) = self
                .repos
                .controllers
                .update_controller_status(&controller.id, status)
                .await
            {
                error!(
                    "State drift: controller {} is {:?} but the stored status was not updated: {}",
                    controller.id, status, e
                );
            }
        }
        online
    }

    /// Refresh controller status, then run one device batch
    pub async fn check_health(&self) -> Result<HealthReport> {
        self.refresh_controllers().await?;
        self.checker.check_all().await
    }

    /// Connect, run one batch health check, disconnect
    pub async fn check_once(&self) -> Result<HealthReport> {
        self.connect_all().await?;
        let report = self.checker.check_all().await;
        self.shutdown().await;
        report
    }

    /// Connect and run periodic health checks until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let connected = self.connect_all().await?;
        if connected == 0 {
            warn!("No controllers online; offline ones are retried every health check");
        }

        let interval = self.config.health_check_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("{} running, health checks every {:?}", self.config.service.name, interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_health().await {
                        error!("Health check failed: {}", e);
                    }
                }
                () = shutdown.cancelled() => {
                    info!("Runtime received cancellation signal, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Disconnect every controller; pending reversals die with the engine
    pub async fn shutdown(&self) {
        let pending = self.engine.pending_reversals();
        if !pending.is_empty() {
            warn!("Shutting down with pending reversals: {}", pending.join(", "));
        }
        for id in self.connections.connected_controllers() {
            if let Err(e) = self
                .repos
                .controllers
                .update_controller_status(&id, ControllerStatus::Offline)
                .await
            {
                warn!("Controller {}: status not updated on shutdown: {}", id, e);
            }
        }
        self.connections.disconnect_all().await;
    }
}
