//! Device templates: how commands are executed for a device type

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::controller::PortType;

/// Execution strategy; unknown strings are preserved for error reporting
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExecutionStrategy {
    #[default]
    SingleCommand,
    MultiStep,
    ArduinoNative,
    Unknown(String),
}

impl From<String> for ExecutionStrategy {
    fn from(value: String) -> Self {
        match value.as_str() {
            "single_command" => ExecutionStrategy::SingleCommand,
            "multi_step" => ExecutionStrategy::MultiStep,
            "arduino_native" => ExecutionStrategy::ArduinoNative,
            _ => ExecutionStrategy::Unknown(value),
        }
    }
}

impl From<ExecutionStrategy> for String {
    fn from(value: ExecutionStrategy) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::SingleCommand => f.write_str("single_command"),
            ExecutionStrategy::MultiStep => f.write_str("multi_step"),
            ExecutionStrategy::ArduinoNative => f.write_str("arduino_native"),
            ExecutionStrategy::Unknown(s) => f.write_str(s),
        }
    }
}

fn default_true() -> bool {
    true
}

/// One step of a multi-step sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStep {
    pub command: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Pause after the step, in milliseconds
    #[serde(default)]
    pub delay: u64,
    #[serde(default = "default_true")]
    pub expect_response: bool,
}

impl CommandStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            parameters: Map::new(),
            delay: 0,
            expect_response: true,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn fire_and_forget(mut self) -> Self {
        self.expect_response = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,
    #[serde(default)]
    pub command_sequence: Vec<CommandStep>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mapping: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRequirement {
    pub role: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<PortType>,
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTemplate {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_command: Option<String>,
    #[serde(default)]
    pub port_requirements: Vec<PortRequirement>,
    #[serde(default)]
    pub execution_config: ExecutionConfig,
}
