//! Connection registry
//!
//! Owns the live adapter of each controller. At most one adapter exists per
//! controller: connecting again tears the old one down first.

use ahash::RandomState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::adapter::{AdapterFactory, AdapterStats, ConnectionResult, ControllerAdapter, Protocol};
use super::notify::{LifecycleEvent, LifecycleKind, LifecycleSink};
use crate::error::Result;
use crate::model::Controller;

/// Lookup side used by the command engine
pub trait ConnectionRegistry: Send + Sync {
    fn get_adapter(&self, controller_id: &str) -> Option<Arc<dyn ControllerAdapter>>;
}

#[derive(Clone)]
struct ConnectionEntry {
    adapter: Arc<dyn ControllerAdapter>,
    controller_name: String,
    connected_at: DateTime<Utc>,
}

/// Per-controller connection summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub controller_id: String,
    pub controller_name: String,
    pub protocol: Protocol,
    pub is_connected: bool,
    pub connected_at: DateTime<Utc>,
    pub stats: AdapterStats,
}

pub struct ConnectionManager {
    factory: Arc<AdapterFactory>,
    sink: Arc<dyn LifecycleSink>,
    connections: DashMap<String, ConnectionEntry, RandomState>,
    /// Serializes connect/disconnect so two callers cannot race on one controller
    lifecycle: Mutex<()>,
    restore_on_connect: bool,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connections.len())
            .field("restore_on_connect", &self.restore_on_connect)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(factory: Arc<AdapterFactory>, sink: Arc<dyn LifecycleSink>) -> Self {
        Self {
            factory,
            sink,
            connections: DashMap::with_hasher(RandomState::new()),
            lifecycle: Mutex::new(()),
            restore_on_connect: true,
        }
    }

    pub fn with_restore_on_connect(mut self, enabled: bool) -> Self {
        self.restore_on_connect = enabled;
        self
    }

    /// Open (or reopen) the connection for a controller
    ///
    /// Factory errors come back as a failed `ConnectionResult`; nothing is
    /// registered unless `initialize` succeeded.
    pub async fn connect(&self, controller: &Controller) -> ConnectionResult {
        let _guard = self.lifecycle.lock().await;

        if let Some((_, previous)) = self.connections.remove(&controller.id) {
            debug!("Controller {}: replacing existing adapter", controller.id);
            if let Err(e) = previous.adapter.disconnect().await {
                warn!(
                    "Controller {}: error closing previous adapter: {}",
                    controller.id, e
                );
            }
        }

        let adapter = match self.factory.create(controller) {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Controller {}: {}", controller.id, e);
                self.sink.notify(
                    LifecycleEvent::new(LifecycleKind::ConnectionFailed, controller, None)
                        .with_detail(json!({
                            "error": e.to_string(),
                            "communicationType": controller.communication_type,
                        })),
                );
                return ConnectionResult::rejected(&controller.id, e.to_string());
            },
        };

        let result = adapter.initialize(controller).await;
        if !result.success {
            warn!(
                "Controller {}: connection failed: {}",
                controller.id,
                result.error.as_deref().unwrap_or("unknown error")
            );
            self.sink.notify(
                LifecycleEvent::new(LifecycleKind::ConnectionFailed, controller, Some(adapter.protocol()))
                    .with_detail(json!({"error": result.error})),
            );
            return result;
        }

        self.connections.insert(
            controller.id.clone(),
            ConnectionEntry {
                adapter: adapter.clone(),
                controller_name: controller.label().to_string(),
                connected_at: Utc::now(),
            },
        );
        info!(
            "Controller {}: connected via {}",
            controller.id,
            adapter.protocol()
        );

        let restored = if self.restore_on_connect {
            Some(adapter.restore_pin_states(controller).await)
        } else {
            None
        };

        self.sink.notify(
            LifecycleEvent::new(LifecycleKind::ControllerReconnect, controller, Some(adapter.protocol()))
                .with_detail(json!({
                    "connectionInfo": result.connection_info,
                    "restored": restored,
                })),
        );
        result
    }

    /// Drop and close the adapter; returns whether one was registered
    pub async fn disconnect(&self, controller_id: &str) -> Result<bool> {
        let _guard = self.lifecycle.lock().await;

        let Some((_, entry)) = self.connections.remove(controller_id) else {
            debug!("Controller {}: nothing to disconnect", controller_id);
            return Ok(false);
        };

        entry.adapter.disconnect().await?;
        info!("Controller {}: disconnected", controller_id);

        self.sink.notify(LifecycleEvent {
            kind: LifecycleKind::ControllerDisconnect,
            controller_id: controller_id.to_string(),
            controller_name: entry.controller_name,
            protocol: Some(entry.adapter.protocol()),
            timestamp: Utc::now(),
            detail: None,
        });
        Ok(true)
    }

    pub async fn disconnect_all(&self) {
        for controller_id in self.connected_controllers() {
            if let Err(e) = self.disconnect(&controller_id).await {
                error!("Controller {}: disconnect failed: {}", controller_id, e);
            }
        }
    }

    /// Ids with a registered adapter, sorted
    pub fn connected_controllers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn connection_status(&self) -> Vec<ConnectionStatus> {
        let mut status: Vec<ConnectionStatus> = self
            .connections
            .iter()
            .map(|entry| ConnectionStatus {
                controller_id: entry.key().clone(),
                controller_name: entry.controller_name.clone(),
                protocol: entry.adapter.protocol(),
                is_connected: entry.adapter.is_connected(),
                connected_at: entry.connected_at,
                stats: entry.adapter.stats(),
            })
            .collect();
        status.sort_by(|a, b| a.controller_id.cmp(&b.controller_id));
        status
    }

    pub fn factory(&self) -> &AdapterFactory {
        &self.factory
    }

    /// Registered and still reporting a live link
    pub fn is_connected(&self, controller_id: &str) -> bool {
        self.connections
            .get(controller_id)
            .is_some_and(|e| e.adapter.is_connected())
    }

    /// Liveness check; unregistered controllers and slow answers count as down
    pub async fn ping(&self, controller_id: &str, timeout: Duration) -> bool {
        let Some(adapter) = self.get_adapter(controller_id) else {
            return false;
        };
        if !adapter.is_connected() {
            return false;
        }
        match tokio::time::timeout(timeout, adapter.ping()).await {
            Ok(alive) => alive,
            Err(_) => {
                warn!("Controller {}: ping timed out after {:?}", controller_id, timeout);
                false
            },
        }
    }
}

impl ConnectionRegistry for ConnectionManager {
    fn get_adapter(&self, controller_id: &str) -> Option<Arc<dyn ControllerAdapter>> {
        self.connections.get(controller_id).map(|e| e.adapter.clone())
    }
}

/// Fixed adapter map, for tools and tests that bypass the factory
#[derive(Default)]
pub struct StaticRegistry {
    adapters: DashMap<String, Arc<dyn ControllerAdapter>, RandomState>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, adapter: Arc<dyn ControllerAdapter>) {
        self.adapters.insert(adapter.controller_id().to_string(), adapter);
    }

    pub fn remove(&self, controller_id: &str) -> Option<Arc<dyn ControllerAdapter>> {
        self.adapters.remove(controller_id).map(|(_, a)| a)
    }
}

impl ConnectionRegistry for StaticRegistry {
    fn get_adapter(&self, controller_id: &str) -> Option<Arc<dyn ControllerAdapter>> {
        self.adapters.get(controller_id).map(|a| a.clone())
    }
}

impl ConnectionManager {
    /// Connect every active controller, one result per attempt
    pub async fn connect_all(&self, controllers: &[Controller]) -> Vec<ConnectionResult> {
        let mut results = Vec::new();
        for controller in controllers.iter().filter(|c| c.is_active) {
            results.push(self.connect(controller).await);
        }
        info!(
            "Connected {}/{} active controllers",
            results.iter().filter(|r| r.success).count(),
            results.len()
        );
        results
    }
}
