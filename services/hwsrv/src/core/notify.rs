//! Controller lifecycle notifications
//!
//! Best-effort: sinks never fail the operation that triggered them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::adapter::Protocol;
use crate::model::Controller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    ControllerReconnect,
    ControllerDisconnect,
    ConnectionFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub controller_id: String,
    pub controller_name: String,
    pub protocol: Option<Protocol>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl LifecycleEvent {
    pub fn new(kind: LifecycleKind, controller: &Controller, protocol: Option<Protocol>) -> Self {
        Self {
            kind,
            controller_id: controller.id.clone(),
            controller_name: controller.label().to_string(),
            protocol,
            timestamp: Utc::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

pub trait LifecycleSink: Send + Sync {
    fn notify(&self, event: LifecycleEvent);
}

/// Writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LifecycleSink for TracingSink {
    fn notify(&self, event: LifecycleEvent) {
        match event.kind {
            LifecycleKind::ConnectionFailed => warn!(
                "Controller {} ({}): connection failed {:?}",
                event.controller_id, event.controller_name, event.detail
            ),
            kind => info!(
                "Controller {} ({}): {:?}",
                event.controller_id, event.controller_name, kind
            ),
        }
    }
}

/// Fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl LifecycleSink for BroadcastSink {
    fn notify(&self, event: LifecycleEvent) {
        // No subscribers is not an error
        if let Err(e) = self.tx.send(event) {
            debug!("Lifecycle event dropped: {}", e);
        }
    }
}

/// Several sinks behind one handle
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn LifecycleSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl LifecycleSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl LifecycleSink for FanoutSink {
    fn notify(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            sink.notify(event.clone());
        }
    }
}
