//! Protocol-native command builder
//!
//! Turns a device plus its template into one firmware command: the command
//! name comes from the template, pins come from the device ports by role,
//! the rest from catalog defaults and template parameters.

use serde_json::Value;

use crate::error::{HwError, Result};
use crate::model::{parse_port_key, Command, Device, DeviceTemplate};

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    Int(i64),
    Text(&'static str),
}

impl ParamDefault {
    fn to_value(self) -> Value {
        match self {
            ParamDefault::Int(n) => Value::from(n),
            ParamDefault::Text(s) => Value::from(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<ParamDefault>,
}

const fn required(name: &'static str, kind: ParamKind) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: true,
        default: None,
    }
}

const fn optional(name: &'static str, kind: ParamKind, default: Option<ParamDefault>) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required: false,
        default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
}

impl CommandSpec {
    fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

use ParamKind::{Number, Text};

/// Commands understood by the controller firmware
pub const COMMAND_CATALOG: &[CommandSpec] = &[
    CommandSpec {
        name: "ANALOG",
        params: &[required("pin", Text)],
    },
    CommandSpec {
        name: "READ",
        params: &[required("pin", Number)],
    },
    CommandSpec {
        name: "SET_PIN",
        params: &[required("pin", Number), required("state", Number)],
    },
    CommandSpec {
        name: "SET_PWM",
        params: &[required("pin", Number), required("value", Number)],
    },
    CommandSpec {
        name: "PULSE_MEASURE",
        params: &[
            required("triggerPin", Number),
            required("echoPin", Number),
            optional("timeout", Number, Some(ParamDefault::Int(30000))),
        ],
    },
    CommandSpec {
        name: "SINGLE_WIRE_ONEWIRE",
        params: &[required("pin", Number)],
    },
    CommandSpec {
        name: "SINGLE_WIRE_PULSE",
        params: &[
            required("pin", Number),
            optional("model", Text, Some(ParamDefault::Text("dht22"))),
        ],
    },
    CommandSpec {
        name: "PULSE_COUNT",
        params: &[
            required("pin", Number),
            optional("duration", Number, Some(ParamDefault::Int(1000))),
        ],
    },
    CommandSpec {
        name: "UART_READ_DISTANCE",
        params: &[
            required("rxPin", Number),
            required("txPin", Number),
            optional("baud", Number, Some(ParamDefault::Int(9600))),
        ],
    },
    CommandSpec {
        name: "I2C_READ",
        params: &[optional("dataPin", Number, None), required("address", Number)],
    },
];

// ============================================================================
// Builder
// ============================================================================

pub trait CommandBuilder: Send + Sync {
    fn build(&self, device: &Device, template: &DeviceTemplate) -> Result<Command>;
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogCommandBuilder {
    catalog: &'static [CommandSpec],
}

impl Default for CatalogCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_error(msg: String) -> HwError {
    HwError::CommandBuild(msg)
}

fn device_label(device: &Device) -> &str {
    if device.name.is_empty() {
        &device.id
    } else {
        &device.name
    }
}

impl CatalogCommandBuilder {
    pub fn new() -> Self {
        Self {
            catalog: COMMAND_CATALOG,
        }
    }

    pub fn with_catalog(catalog: &'static [CommandSpec]) -> Self {
        Self { catalog }
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandSpec> {
        self.catalog.iter().find(|c| c.name == name)
    }

    /// Command parameter a port role feeds; `None` for roles that carry no pin
    fn parameter_for_role(role: &str, spec: &CommandSpec) -> Option<&'static str> {
        match role.to_lowercase().as_str() {
            "trigger" => Some("triggerPin"),
            "echo" => Some("echoPin"),
            "control" => Some("pin"),
            "rx" => Some("rxPin"),
            "tx" => Some("txPin"),
            "data" => {
                if spec.param("dataPin").is_some() {
                    Some("dataPin")
                } else if spec.param("pin").is_some() {
                    Some("pin")
                } else {
                    None
                }
            },
            _ => None,
        }
    }

    fn port_value(port: &str, param: &ParamSpec) -> Result<Value> {
        match param.kind {
            ParamKind::Number => Ok(Value::from(parse_port_key(port)?)),
            ParamKind::Text => Ok(Value::from(port)),
        }
    }
}

impl CommandBuilder for CatalogCommandBuilder {
    fn build(&self, device: &Device, template: &DeviceTemplate) -> Result<Command> {
        let label = device_label(device);

        let name = template
            .required_command
            .as_deref()
            .or(template.execution_config.command_type.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                build_error(format!(
                    "No requiredCommand or commandType found in template for device {}",
                    label
                ))
            })?;

        let spec = self
            .lookup(name)
            .ok_or_else(|| build_error(format!("Command \"{}\" not found in command catalog", name)))?;

        if device.ports.is_empty() {
            return Err(build_error(format!("Device {} has no ports configured", label)));
        }

        let mut command = Command::new(spec.name);

        for (index, requirement) in template.port_requirements.iter().enumerate() {
            if !requirement.required {
                continue;
            }
            let Some(port) = device.ports.get(index) else {
                return Err(build_error(format!(
                    "Device {} missing required port at index {} (role: {})",
                    label, index, requirement.role
                )));
            };
            let Some(param_name) = Self::parameter_for_role(&requirement.role, spec) else {
                continue;
            };
            if let Some(param) = spec.param(param_name) {
                let value = Self::port_value(port, param)?;
                command.set_param(param_name, value);
            }
        }

        for param in spec.params {
            if let Some(default) = param.default {
                if !command.has_param(param.name) {
                    command.set_param(param.name, default.to_value());
                }
            }
        }

        for (key, value) in &template.execution_config.parameters {
            command.set_param(key.clone(), value.clone());
        }

        let missing: Vec<&str> = spec
            .params
            .iter()
            .filter(|p| p.required && !command.has_param(p.name))
            .map(|p| p.name)
            .collect();
        if !missing.is_empty() {
            return Err(build_error(format!(
                "Device {}: Missing required parameters for command {}: {}",
                label,
                spec.name,
                missing.join(", ")
            )));
        }

        Ok(command)
    }
}
