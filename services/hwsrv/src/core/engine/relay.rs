//! Semantic relay commands
//!
//! ACTIVATE/DEACTIVATE/TOGGLE are logical; the wire level depends on the
//! device's relay polarity. After a successful write the controller's cached
//! port state is updated. A failed cache update is reported as state drift
//! and never retried against the hardware.

use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::{CommandEngine, Target};
use crate::core::adapter::ControllerAdapter;
use crate::error::{HwError, Result};
use crate::model::{parse_port_key, Command, PinLevel, RelayLogic, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayAction {
    Activate,
    Deactivate,
    Toggle,
}

impl RelayAction {
    pub fn from_command(cmd: &str) -> Option<Self> {
        match cmd {
            "ACTIVATE_RELAY" => Some(RelayAction::Activate),
            "DEACTIVATE_RELAY" => Some(RelayAction::Deactivate),
            "TOGGLE_RELAY" => Some(RelayAction::Toggle),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalState {
    Active,
    Inactive,
}

impl LogicalState {
    pub fn as_str(self) -> &'static str {
        match self {
            LogicalState::Active => "active",
            LogicalState::Inactive => "inactive",
        }
    }

    /// Logical state a hardware level represents under a polarity
    pub fn from_level(level: PinLevel, logic: RelayLogic) -> Self {
        let active_level = LogicalState::Active.level(logic);
        if level == active_level {
            LogicalState::Active
        } else {
            LogicalState::Inactive
        }
    }

    /// Hardware level that represents this state under a polarity
    pub fn level(self, logic: RelayLogic) -> PinLevel {
        match (self, logic) {
            (LogicalState::Active, RelayLogic::ActiveHigh) => PinLevel::High,
            (LogicalState::Active, RelayLogic::ActiveLow) => PinLevel::Low,
            (LogicalState::Inactive, RelayLogic::ActiveHigh) => PinLevel::Low,
            (LogicalState::Inactive, RelayLogic::ActiveLow) => PinLevel::High,
        }
    }

    fn toggled(self) -> Self {
        match self {
            LogicalState::Active => LogicalState::Inactive,
            LogicalState::Inactive => LogicalState::Active,
        }
    }
}

/// Resolved relay write
struct RelayWrite<'a> {
    controller_id: &'a str,
    device_id: &'a str,
    port_key: String,
    pin: i64,
    logic: RelayLogic,
    /// Restoration writes leave the cached port state alone
    update_cache: bool,
    stop_on_disconnect: Option<bool>,
}

impl CommandEngine {
    pub(super) async fn execute_device_relay(
        &self,
        target: &Target<'_>,
        action: RelayAction,
        stop_on_disconnect: Option<bool>,
    ) -> Result<Response> {
        let device = target.device;
        let port_key = device
            .primary_port()
            .ok_or_else(|| HwError::execution(format!("Device {} has no configured ports", device.id)))?
            .to_string();
        let pin = parse_port_key(&port_key)?;

        let write = RelayWrite {
            controller_id: target.controller_id,
            device_id: &device.id,
            port_key,
            pin,
            logic: device.relay_logic,
            update_cache: true,
            stop_on_disconnect,
        };
        self.write_relay(target.adapter.clone(), write, action).await
    }

    /// Relay command carrying its own `port` and `relayLogic`
    pub(super) async fn execute_restoration_relay(
        &self,
        controller_id: &str,
        adapter: Arc<dyn ControllerAdapter>,
        command: &Command,
    ) -> Result<Response> {
        let action = RelayAction::from_command(&command.cmd)
            .ok_or_else(|| HwError::execution(format!("Unknown relay command: {}", command.cmd)))?;
        let raw_port = command.port.as_deref().unwrap_or_default();
        let pin = parse_port_key(raw_port)?;
        let device_id = command.device_id.as_deref().unwrap_or("restoration");

        debug!(
            "Controller {}: restoring relay {} on D{} ({})",
            controller_id,
            device_id,
            pin,
            command.relay_logic.unwrap_or_default().as_str()
        );

        let write = RelayWrite {
            controller_id,
            device_id,
            port_key: format!("D{}", pin),
            pin,
            logic: command.relay_logic.unwrap_or_default(),
            update_cache: false,
            stop_on_disconnect: command.stop_on_disconnect,
        };
        self.write_relay(adapter, write, action).await
    }

    async fn current_logical_state(&self, write: &RelayWrite<'_>) -> Result<LogicalState> {
        let controller = self
            .inner
            .repos
            .controllers
            .find_controller(write.controller_id)
            .await?
            .ok_or_else(|| HwError::execution(format!("Controller not found: {}", write.controller_id)))?;
        let port = controller
            .port(&write.port_key)
            .ok_or_else(|| HwError::execution(format!("Port {} not found on controller", write.port_key)))?;

        // Never-written ports count as HIGH
        let level = port.current_state.unwrap_or(PinLevel::High);
        Ok(LogicalState::from_level(level, write.logic))
    }

    async fn write_relay(
        &self,
        adapter: Arc<dyn ControllerAdapter>,
        write: RelayWrite<'_>,
        action: RelayAction,
    ) -> Result<Response> {
        let logical = match action {
            RelayAction::Activate => LogicalState::Active,
            RelayAction::Deactivate => LogicalState::Inactive,
            RelayAction::Toggle => self.current_logical_state(&write).await?.toggled(),
        };
        let level = logical.level(write.logic);

        let mut hardware = Command::new("SET_PIN")
            .with_pin(write.pin)
            .with_state(level.as_bit());
        hardware.stop_on_disconnect = write.stop_on_disconnect;

        debug!(
            "Device {}: relay {} ({}) → {} on {}",
            write.device_id,
            logical.as_str(),
            write.logic.as_str(),
            level.as_str(),
            write.port_key
        );

        let response = adapter.send_command(&hardware).await;
        if !response.is_ok() {
            return Ok(response);
        }

        if write.update_cache {
            if let Err(e) = self
                .inner
                .repos
                .controllers
                .update_port_state(write.controller_id, &write.port_key, Some(level))
                .await
            {
                error!(
                    "State drift: controller {} port {} is {} on hardware but the cached state was not updated: {}",
                    write.controller_id,
                    write.port_key,
                    level.as_str(),
                    e
                );
            }
        }

        info!(
            "Device {}: relay {} on {}",
            write.device_id,
            logical.as_str(),
            write.port_key
        );

        Ok(Response::success(format!("Relay {} successfully", logical.as_str()))
            .with_port(write.port_key)
            .with_data(json!({
                "logicalState": logical.as_str(),
                "hardwareState": level.as_str(),
                "relayLogic": write.logic.as_str(),
            })))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::engine::tests::fixture;
    use crate::core::engine::EngineSettings;

    #[test]
    fn test_polarity_table() {
        assert_eq!(LogicalState::Active.level(RelayLogic::ActiveHigh), PinLevel::High);
        assert_eq!(LogicalState::Active.level(RelayLogic::ActiveLow), PinLevel::Low);
        assert_eq!(
            LogicalState::from_level(PinLevel::Low, RelayLogic::ActiveLow),
            LogicalState::Active
        );
        assert_eq!(
            LogicalState::from_level(PinLevel::Low, RelayLogic::ActiveHigh),
            LogicalState::Inactive
        );
    }

    #[tokio::test]
    async fn test_activate_updates_cached_port_state() {
        let (engine, adapter, repo) = fixture(EngineSettings::default());

        let response = engine
            .send_command("ctrl-1", Command::new("ACTIVATE_RELAY").for_device("pump"))
            .await;
        assert!(response.is_ok());
        assert_eq!(response.message.as_deref(), Some("Relay active successfully"));
        assert_eq!(response.port.as_deref(), Some("D4"));
        let data = response.data.unwrap();
        assert_eq!(data["hardwareState"], "LOW");
        assert_eq!(data["relayLogic"], "active_low");

        assert_eq!(adapter.sent_commands()[0].state, Some(0));
        assert_eq!(
            repo.controller("ctrl-1").unwrap().port("D4").unwrap().current_state,
            Some(PinLevel::Low)
        );
    }

    #[tokio::test]
    async fn test_toggle_of_unknown_state_treats_port_as_high() {
        let (engine, adapter, _repo) = fixture(EngineSettings::default());

        // D4 has no cached state: HIGH on an active_low relay is inactive, so toggle activates
        let response = engine
            .send_command("ctrl-1", Command::new("TOGGLE_RELAY").for_device("pump"))
            .await;
        assert_eq!(response.message.as_deref(), Some("Relay active successfully"));
        assert_eq!(adapter.sent_commands()[0].state, Some(0));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_cache_untouched() {
        let (engine, adapter, repo) = fixture(EngineSettings::default());
        adapter.set_default_response(Response::failure("pin busy"));

        let response = engine
            .send_command("ctrl-1", Command::new("ACTIVATE_RELAY").for_device("pump"))
            .await;
        assert_eq!(response.error.as_deref(), Some("pin busy"));
        assert!(repo.controller("ctrl-1").unwrap().port("D4").unwrap().current_state.is_none());
    }

    #[tokio::test]
    async fn test_restoration_variant_skips_lookup_and_cache() {
        let (engine, adapter, repo) = fixture(EngineSettings::default());

        let mut cmd = Command::new("ACTIVATE_RELAY");
        cmd.port = Some("5".into());
        cmd.relay_logic = Some(RelayLogic::ActiveHigh);
        cmd.stop_on_disconnect = Some(false);

        let response = engine.send_command("ctrl-1", cmd).await;
        assert_eq!(response.port.as_deref(), Some("D5"));

        let sent = &adapter.sent_commands()[0];
        assert_eq!(
            serde_json::to_value(sent).unwrap(),
            json!({"cmd": "SET_PIN", "pin": 5, "state": 1, "stopOnDisconnect": false})
        );
        assert!(repo.controller("ctrl-1").unwrap().port("D5").unwrap().current_state.is_none());
    }
}
