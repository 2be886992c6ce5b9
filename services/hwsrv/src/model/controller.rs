//! Controller records: protocol selector, protocol settings and port map

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    Online,
    #[default]
    Offline,
    Error,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortType {
    Digital,
    Analog,
}

/// Digital level as cached on the controller record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinLevel {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "LOW")]
    Low,
}

impl PinLevel {
    pub fn as_bit(self) -> u8 {
        match self {
            PinLevel::High => 1,
            PinLevel::Low => 0,
        }
    }

    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            PinLevel::Low
        } else {
            PinLevel::High
        }
    }

    pub fn inverted(self) -> Self {
        match self {
            PinLevel::High => PinLevel::Low,
            PinLevel::Low => PinLevel::High,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PinLevel::High => "HIGH",
            PinLevel::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub port_type: Option<PortType>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_occupied: bool,
    #[serde(default)]
    pub current_state: Option<PinLevel>,
}

impl PortInfo {
    pub fn is_digital(&self) -> bool {
        self.port_type == Some(PortType::Digital)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Controller {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Board model, e.g. `WeMos_D1_R2`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    /// `raw_serial`, `http`, `mqtt`, `websocket`; kept raw so unknown values reach the factory
    pub communication_type: String,
    /// Protocol-specific settings, parsed by each adapter
    #[serde(default)]
    pub communication_config: Map<String, Value>,
    #[serde(default)]
    pub status: ControllerStatus,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub available_ports: Vec<PortInfo>,
}

impl Controller {
    pub fn is_online(&self) -> bool {
        self.status == ControllerStatus::Online
    }

    pub fn port(&self, key: &str) -> Option<&PortInfo> {
        self.available_ports.iter().find(|p| p.key == key)
    }

    /// Display name, falling back to the id
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}
