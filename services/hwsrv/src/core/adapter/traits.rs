//! Controller Adapter Traits
//!
//! Defines the uniform contract every controller transport implements, plus
//! the state and statistics types shared by the implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::{HwError, Result};
use crate::model::{parse_port_key, Command, Controller, PortInfo, Response};

/// Adapter connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No physical connection
    Disconnected,
    /// Port/socket is being opened
    Opening,
    /// Opened, waiting for the device's ready line
    AwaitingHandshake,
    /// Ready for commands
    Connected,
}

/// Wire protocol implemented by an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    RawSerial,
    Http,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::RawSerial => "raw_serial",
            Protocol::Http => "http",
        }
    }

    /// Implemented protocol for a controller's `communicationType`
    pub fn from_communication_type(kind: &str) -> Option<Self> {
        match kind {
            "raw_serial" => Some(Protocol::RawSerial),
            "http" => Some(Protocol::Http),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of `initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub success: bool,
    pub controller_id: String,
    /// `None` when no adapter exists for the controller's communication type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionResult {
    pub fn connected(controller_id: impl Into<String>, protocol: Protocol, info: Value) -> Self {
        Self {
            success: true,
            controller_id: controller_id.into(),
            protocol: Some(protocol),
            connection_info: Some(info),
            error: None,
        }
    }

    pub fn failed(controller_id: impl Into<String>, protocol: Protocol, error: impl Into<String>) -> Self {
        Self {
            success: false,
            controller_id: controller_id.into(),
            protocol: Some(protocol),
            connection_info: None,
            error: Some(error.into()),
        }
    }

    /// Failure before any adapter was built (unsupported communication type)
    pub fn rejected(controller_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            controller_id: controller_id.into(),
            protocol: None,
            connection_info: None,
            error: Some(error.into()),
        }
    }
}

/// Per-adapter command statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterStats {
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub timeouts: u64,
    /// Lines that arrived with no command waiting for them
    pub late_responses: u64,
    pub last_activity: Option<DateTime<Utc>>,
}

impl AdapterStats {
    pub fn record_sent(&mut self) {
        self.commands_sent += 1;
        self.last_activity = Some(Utc::now());
    }

    pub fn record_failure(&mut self, err: &HwError) {
        self.commands_failed += 1;
        if matches!(err, HwError::TimeoutError(_)) {
            self.timeouts += 1;
        }
    }

    pub fn record_late_response(&mut self) {
        self.late_responses += 1;
    }
}

/// Result of a pin-state restoration sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub checked: usize,
    pub restored: usize,
    pub skipped: usize,
}

/// Live transport bound to exactly one controller
///
/// `send_command` never fails: transport problems come back as
/// `Response { ok: 0, error }`.
#[async_trait]
pub trait ControllerAdapter: Send + Sync + fmt::Debug {
    fn protocol(&self) -> Protocol;

    fn controller_id(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn connection_state(&self) -> ConnectionState;

    /// Open the connection described by the controller record
    async fn initialize(&self, controller: &Controller) -> ConnectionResult;

    async fn send_command(&self, command: &Command) -> Response;

    async fn disconnect(&self) -> Result<()>;

    async fn is_healthy(&self) -> bool;

    async fn ping(&self) -> bool;

    fn connection_info(&self) -> Option<Value> {
        None
    }

    /// Merge new protocol settings into the live adapter
    ///
    /// Returns whether the controller answered after the change.
    async fn update_config(&self, _settings: &Map<String, Value>) -> Result<bool> {
        Err(HwError::config(format!(
            "{} adapter does not support configuration updates",
            self.protocol()
        )))
    }

    fn stats(&self) -> AdapterStats {
        AdapterStats::default()
    }

    /// Whether a restoration sweep may write to this port
    fn can_restore_port(&self, _port: &PortInfo) -> bool {
        true
    }

    async fn restore_pin_states(&self, controller: &Controller) -> RestoreSummary {
        restore_pin_states(self, controller).await
    }
}

/// Bring digital outputs back to their cached levels after a reconnect
///
/// Only ports whose live level differs from the cached one are written.
/// Unreadable or invalid ports are skipped.
pub async fn restore_pin_states<A>(adapter: &A, controller: &Controller) -> RestoreSummary
where
    A: ControllerAdapter + ?Sized,
{
    let mut summary = RestoreSummary::default();

    let candidates = controller
        .available_ports
        .iter()
        .filter(|p| p.is_active && p.is_digital() && p.current_state.is_some());

    for port in candidates {
        summary.checked += 1;

        let Some(desired) = port.current_state.map(|s| s.as_bit()) else {
            continue;
        };

        if !adapter.can_restore_port(port) {
            warn!(
                "Controller {}: port {} cannot be restored on this board, skipping",
                controller.id, port.key
            );
            summary.skipped += 1;
            continue;
        }

        let pin = match parse_port_key(&port.key) {
            Ok(pin) => pin,
            Err(e) => {
                warn!("Controller {}: {}", controller.id, e);
                summary.skipped += 1;
                continue;
            },
        };

        let read = adapter.send_command(&Command::new("READ").with_pin(pin)).await;
        if !read.is_ok() {
            warn!(
                "Controller {}: cannot read state of port {}: {}",
                controller.id,
                port.key,
                read.error_text()
            );
            summary.skipped += 1;
            continue;
        }

        let current = read.numeric_value().unwrap_or(0.0).round() as i64;
        if current == i64::from(desired) {
            debug!(
                "Controller {}: port {} already {}",
                controller.id,
                port.key,
                desired
            );
            continue;
        }

        let write = adapter
            .send_command(&Command::new("SET_PIN").with_pin(pin).with_state(desired))
            .await;
        if write.is_ok() {
            summary.restored += 1;
            info!(
                "Controller {}: port {} restored to {}",
                controller.id, port.key, desired
            );
        } else {
            warn!(
                "Controller {}: failed to restore port {}: {}",
                controller.id,
                port.key,
                write.error_text()
            );
            summary.skipped += 1;
        }
    }

    info!(
        "Controller {}: pin state restoration {} checked, {} restored, {} skipped",
        controller.id, summary.checked, summary.restored, summary.skipped
    );
    summary
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::adapter::mock::MockAdapter;
    use crate::model::{ControllerStatus, PinLevel, PortType};
    use serde_json::json;

    fn port(key: &str, state: Option<PinLevel>, active: bool) -> PortInfo {
        PortInfo {
            key: key.to_string(),
            label: key.to_string(),
            port_type: Some(PortType::Digital),
            is_active: active,
            is_occupied: true,
            current_state: state,
        }
    }

    fn controller(ports: Vec<PortInfo>) -> Controller {
        Controller {
            id: "ctrl-1".into(),
            name: "bench".into(),
            board: None,
            communication_type: "raw_serial".into(),
            communication_config: Map::new(),
            status: ControllerStatus::Online,
            is_active: true,
            available_ports: ports,
        }
    }

    #[tokio::test]
    async fn test_restore_writes_only_drifted_ports() {
        let adapter = MockAdapter::connected("ctrl-1");
        // D2 reads HIGH (matches), D3 reads LOW (should be HIGH)
        adapter.set_handler(|cmd| match (cmd.cmd.as_str(), cmd.pin.as_ref().and_then(|p| p.number())) {
            ("READ", Some(2)) => Response::success("read").with_value(1),
            ("READ", Some(3)) => Response::success("read").with_value(0),
            _ => Response::success("ok"),
        });

        let ctrl = controller(vec![
            port("D2", Some(PinLevel::High), true),
            port("D3", Some(PinLevel::High), true),
            port("D4", None, true),
            port("D5", Some(PinLevel::Low), false),
        ]);

        let summary = adapter.restore_pin_states(&ctrl).await;
        assert_eq!(summary, RestoreSummary { checked: 2, restored: 1, skipped: 0 });

        let writes: Vec<_> = adapter
            .sent_commands()
            .into_iter()
            .filter(|c| c.cmd == "SET_PIN")
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(serde_json::to_value(&writes[0]).unwrap(), json!({"cmd": "SET_PIN", "pin": 3, "state": 1}));
    }

    #[tokio::test]
    async fn test_restore_skips_unreadable_ports() {
        let adapter = MockAdapter::connected("ctrl-1");
        adapter.set_default_response(Response::failure("no such pin"));

        let ctrl = controller(vec![port("D7", Some(PinLevel::Low), true)]);
        let summary = adapter.restore_pin_states(&ctrl).await;

        assert_eq!(summary.skipped, 1);
        assert!(adapter.sent_commands().iter().all(|c| c.cmd == "READ"));
    }

    #[test]
    fn test_connection_result_serialization() {
        let ok = ConnectionResult::connected("c1", Protocol::Http, json!({"baseUrl": "http://x:80"}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["protocol"], json!("http"));
        assert_eq!(value["controllerId"], json!("c1"));
        assert!(value.get("error").is_none());

        let rejected = ConnectionResult::rejected("c2", "MQTT adapter not yet implemented");
        let value = serde_json::to_value(&rejected).unwrap();
        assert!(value.get("protocol").is_none());
        assert_eq!(value["success"], json!(false));
    }
}
