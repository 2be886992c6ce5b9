//! Command Execution Engine
//!
//! Single entry point for every hardware command. Resolves the controller's
//! live adapter, picks an execution strategy from the device template and
//! turns every failure into a `Response { ok: 0, error }`.
//!
//! ```text
//! send_command(controller, cmd)
//!   ├─ no deviceId ─────────────► legacy passthrough / restoration relay
//!   └─ deviceId ─► template ─┬─► single_command ─► relay | pwm | analog | raw
//!                            ├─► multi_step
//!                            └─► arduino_native ─► builder ─► conversion
//! ```

mod analog;
mod multi_step;
mod native;
mod pwm;
mod relay;
mod reversal;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::adapter::ControllerAdapter;
use super::builder::CommandBuilder;
use super::conversion::ConverterRegistry;
use super::registry::ConnectionRegistry;
use crate::error::{HwError, Result};
use crate::model::{Command, Device, DeviceTemplate, ExecutionStrategy, Response};
use crate::storage::Repositories;

pub use relay::{LogicalState, RelayAction};
use reversal::ReversalScheduler;

const RELAY_COMMANDS: &[&str] = &["ACTIVATE_RELAY", "DEACTIVATE_RELAY", "TOGGLE_RELAY"];
const PWM_COMMANDS: &[&str] = &["SET_PWM", "FADE_PWM"];
/// Generic intents that take their wire command from the template
const GENERIC_COMMANDS: &[&str] = &["CONTROL_ACTUATOR", "READ_SENSOR"];

fn is_relay_command(cmd: &str) -> bool {
    RELAY_COMMANDS.contains(&cmd)
}

fn is_pwm_command(cmd: &str) -> bool {
    PWM_COMMANDS.contains(&cmd)
}

/// Engine tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Schedule the opposite action after timed actuator commands
    pub reversal_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reversal_enabled: true,
        }
    }
}

struct EngineInner {
    registry: Arc<dyn ConnectionRegistry>,
    repos: Repositories,
    converters: Arc<ConverterRegistry>,
    builder: Arc<dyn CommandBuilder>,
    settings: EngineSettings,
    reversals: ReversalScheduler,
}

/// Everything a strategy needs about the command's target
struct Target<'a> {
    controller_id: &'a str,
    adapter: Arc<dyn ControllerAdapter>,
    device: &'a Device,
    template: &'a DeviceTemplate,
}

/// Cheap to clone; clones share adapters, repositories and pending reversals
#[derive(Clone)]
pub struct CommandEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for CommandEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEngine")
            .field("settings", &self.inner.settings)
            .field("pending_reversals", &self.inner.reversals.len())
            .finish()
    }
}

impl CommandEngine {
    pub fn new(
        registry: Arc<dyn ConnectionRegistry>,
        repos: Repositories,
        converters: Arc<ConverterRegistry>,
        builder: Arc<dyn CommandBuilder>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                repos,
                converters,
                builder,
                settings,
                reversals: ReversalScheduler::new(),
            }),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    /// Execute one command against a controller
    ///
    /// Never fails: errors come back as `ok: 0` responses.
    pub async fn send_command(&self, controller_id: &str, command: Command) -> Response {
        let cmd = command.cmd.clone();
        match self.execute(controller_id, command).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Controller {}: {} failed: {}", controller_id, cmd, e);
                Response::failure(e.to_string())
            },
        }
    }

    /// Boxed entry point for tasks that re-enter the engine
    fn send_detached(&self, controller_id: String, command: Command) -> BoxFuture<'static, Response> {
        let engine = self.clone();
        Box::pin(async move { engine.send_command(&controller_id, command).await })
    }

    /// Abort the scheduled reversal of a device, if any
    pub fn cancel_pending_reversal(&self, device_id: &str) -> bool {
        let cancelled = self.inner.reversals.cancel(device_id);
        if cancelled {
            info!("Device {}: pending timed reversal cancelled", device_id);
        }
        cancelled
    }

    /// Devices with a reversal still waiting to fire
    pub fn pending_reversals(&self) -> Vec<String> {
        self.inner.reversals.pending()
    }

    fn adapter_for(&self, controller_id: &str) -> Result<Arc<dyn ControllerAdapter>> {
        match self.inner.registry.get_adapter(controller_id) {
            Some(adapter) if adapter.is_connected() => Ok(adapter),
            _ => Err(HwError::not_connected(controller_id)),
        }
    }

    async fn execute(&self, controller_id: &str, command: Command) -> Result<Response> {
        let adapter = self.adapter_for(controller_id)?;

        if is_relay_command(&command.cmd) && command.port.is_some() && command.relay_logic.is_some() {
            return self.execute_restoration_relay(controller_id, adapter, &command).await;
        }

        match command.device_id.clone() {
            Some(device_id) => {
                self.cancel_pending_reversal(&device_id);
                self.execute_for_device(controller_id, adapter, &device_id, command)
                    .await
            },
            None => self.execute_legacy(controller_id, adapter, command).await,
        }
    }

    /// Commands without a device: straight to the adapter
    async fn execute_legacy(
        &self,
        controller_id: &str,
        adapter: Arc<dyn ControllerAdapter>,
        command: Command,
    ) -> Result<Response> {
        let cmd = command.cmd.as_str();
        if GENERIC_COMMANDS.contains(&cmd) || is_relay_command(cmd) || is_pwm_command(cmd) {
            return Err(HwError::execution(format!("Device reference required for {}", cmd)));
        }

        debug!(
            "Controller {}: legacy command {} (pin {:?})",
            controller_id, command.cmd, command.pin
        );
        Ok(adapter.send_command(&command).await)
    }

    async fn execute_for_device(
        &self,
        controller_id: &str,
        adapter: Arc<dyn ControllerAdapter>,
        device_id: &str,
        command: Command,
    ) -> Result<Response> {
        let device = self
            .inner
            .repos
            .devices
            .find_device(device_id)
            .await?
            .ok_or_else(|| HwError::DeviceNotFound(device_id.to_string()))?;

        let template = self
            .inner
            .repos
            .templates
            .find_template(&device.device_type)
            .await?
            .ok_or_else(|| HwError::TemplateNotFound(device.device_type.clone()))?;

        let target = Target {
            controller_id,
            adapter,
            device: &device,
            template: &template,
        };

        debug!(
            "Device {}: {} via {} strategy",
            device.id, command.cmd, template.execution_config.strategy
        );

        match &template.execution_config.strategy {
            ExecutionStrategy::SingleCommand => self.execute_single(&target, command).await,
            ExecutionStrategy::MultiStep => self.execute_multi_step(&target).await,
            ExecutionStrategy::ArduinoNative => self.execute_native(&target).await,
            ExecutionStrategy::Unknown(name) => Err(HwError::UnknownStrategy(name.clone())),
        }
    }

    /// Wire command type: the caller's own command unless it is a generic intent
    fn effective_command_type(command: &Command, template: &DeviceTemplate) -> String {
        if GENERIC_COMMANDS.contains(&command.cmd.as_str()) {
            template
                .execution_config
                .command_type
                .clone()
                .unwrap_or_else(|| command.cmd.clone())
        } else {
            command.cmd.clone()
        }
    }

    async fn execute_single(&self, target: &Target<'_>, command: Command) -> Result<Response> {
        if command.cmd == "CONTROL_ACTUATOR" && command.action_type.is_some() {
            return self.execute_actuator_action(target, command).await;
        }

        let command_type = Self::effective_command_type(&command, target.template);
        self.dispatch_single(target, &command_type, command).await
    }

    async fn dispatch_single(&self, target: &Target<'_>, command_type: &str, command: Command) -> Result<Response> {
        if let Some(action) = RelayAction::from_command(command_type) {
            return self
                .execute_device_relay(target, action, command.stop_on_disconnect)
                .await;
        }
        if is_pwm_command(command_type) {
            let mut pwm = command;
            pwm.cmd = command_type.to_string();
            return self.execute_pwm(target, &pwm).await;
        }
        if command_type == "ANALOG" {
            return self.execute_analog(target).await;
        }

        let mut wire = command;
        wire.cmd = command_type.to_string();
        Ok(target.adapter.send_command(&wire).await)
    }

    /// `CONTROL_ACTUATOR` with an `actionType`, plus the timed reversal
    async fn execute_actuator_action(&self, target: &Target<'_>, command: Command) -> Result<Response> {
        let action = command.action_type.clone().unwrap_or_default();
        let command_type = match action.as_str() {
            "on_off_timed" | "on" => "ACTIVATE_RELAY".to_string(),
            "off_on_timed" | "off" => "DEACTIVATE_RELAY".to_string(),
            "set_power" => "SET_PWM".to_string(),
            "fade_up" | "fade_down" => "FADE_PWM".to_string(),
            _ => target
                .template
                .execution_config
                .command_type
                .clone()
                .unwrap_or_else(|| "ACTIVATE_RELAY".to_string()),
        };

        let mut mapped = command.clone();
        mapped.cmd = command_type.clone();
        if mapped.direction.is_none() {
            mapped.direction = Some(if action == "fade_up" { "up" } else { "down" }.to_string());
        }

        // Rejected before dispatch so the actuator never switches without its reversal
        let duration = command.duration.unwrap_or(0.0);
        let reversal = match action.as_str() {
            "on_off_timed" if duration > 0.0 => Some(("off", reversal_delay(duration)?)),
            "off_on_timed" if duration > 0.0 => Some(("on", reversal_delay(duration)?)),
            _ => None,
        };

        let response = self.dispatch_single(target, &command_type, mapped).await?;

        if let Some((opposite, delay)) = reversal {
            if response.is_ok() {
                self.schedule_reversal(target, command, opposite, delay);
            }
        }

        Ok(response)
    }

    fn schedule_reversal(&self, target: &Target<'_>, command: Command, opposite: &str, delay: Duration) {
        if !self.inner.settings.reversal_enabled {
            debug!(
                "Device {}: timed reversal disabled, {} not scheduled",
                target.device.id, opposite
            );
            return;
        }

        let mut reverse = command;
        reverse.action_type = Some(opposite.to_string());
        reverse.duration = Some(0.0);

        let device_id = target.device.id.clone();
        let controller_id = target.controller_id.to_string();
        let engine = self.clone();

        info!(
            "Device {}: scheduling {} in {:.1}s",
            device_id,
            opposite,
            delay.as_secs_f64()
        );

        let task_device = device_id.clone();
        self.inner.reversals.schedule(&device_id, delay, move |generation| {
            Box::pin(async move {
                engine.inner.reversals.finish(&task_device, generation);
                let response = engine.send_detached(controller_id.clone(), reverse).await;
                if response.is_ok() {
                    info!("Controller {}: timed reversal executed", controller_id);
                } else {
                    warn!(
                        "Controller {}: timed reversal failed: {}",
                        controller_id,
                        response.error_text()
                    );
                }
            })
        });
    }
}

/// Seconds to a timer delay; out-of-range values are an execution error
fn reversal_delay(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| HwError::execution(format!("Invalid reversal duration: {}s", seconds)))
}
