//! Wire command and response records
//!
//! Both types serialize to the compact JSON understood by the controller
//! firmware: camelCase keys, absent fields omitted, integral numbers written
//! without a fractional part.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use super::device::RelayLogic;
use crate::error::{HwError, Result};

// ============================================================================
// Pin identifiers
// ============================================================================

/// A pin is either a bare number or a port key such as `D2` / `A0`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PinRef {
    Number(i64),
    Key(String),
}

impl PinRef {
    /// Numeric pin, parsing port keys (`D2` → 2, `A0` → 0)
    pub fn number(&self) -> Option<i64> {
        match self {
            PinRef::Number(n) => Some(*n),
            PinRef::Key(key) => parse_port_key(key).ok(),
        }
    }

    pub fn is_analog_key(&self) -> bool {
        matches!(self, PinRef::Key(key) if key.starts_with('A'))
    }
}

impl From<i64> for PinRef {
    fn from(value: i64) -> Self {
        PinRef::Number(value)
    }
}

impl From<&str> for PinRef {
    fn from(value: &str) -> Self {
        PinRef::Key(value.to_string())
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinRef::Number(n) => write!(f, "{}", n),
            PinRef::Key(key) => f.write_str(key),
        }
    }
}

/// Parse a port key into its pin number
///
/// `D<n>` and `A<n>` strip the prefix, anything else must be a plain number.
pub fn parse_port_key(key: &str) -> Result<i64> {
    let trimmed = key.trim();
    let digits = trimmed
        .strip_prefix('D')
        .or_else(|| trimmed.strip_prefix('A'))
        .unwrap_or(trimmed);
    digits
        .parse::<i64>()
        .map_err(|_| HwError::InvalidPort(key.to_string()))
}

// ============================================================================
// Serde helpers
// ============================================================================

mod compact {
    use super::*;

    // 1000.0 goes on the wire as 1000
    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15 => {
                serializer.serialize_i64(*v as i64)
            },
            Some(v) => serializer.serialize_f64(*v),
            None => serializer.serialize_none(),
        }
    }
}

mod flag {
    use super::*;

    // Firmware variants answer with 1/0, true/false or "1"
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u8, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Bool(b) => u8::from(b),
            Value::Number(n) => u8::from(n.as_f64().map(|v| v != 0.0).unwrap_or(false)),
            Value::String(s) => u8::from(matches!(s.trim(), "1" | "true" | "ok" | "OK")),
            _ => 0,
        })
    }
}

mod lenient_timestamp {
    use super::*;

    // Boards sometimes send millis-since-boot; only RFC 3339 strings are kept
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(deserializer)?;
        Ok(value
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

/// Interpret a JSON value as a number (numbers, numeric strings, booleans)
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

// ============================================================================
// Command
// ============================================================================

/// One logical operation for a controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<u8>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact::serialize"
    )]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Seconds for timed actuator actions, milliseconds on FADE_PWM wire commands
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact::serialize"
    )]
    pub duration: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact::serialize"
    )]
    pub power_level: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact::serialize"
    )]
    pub power_from: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "compact::serialize"
    )]
    pub power_to: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_pin: Option<PinRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo_pin: Option<PinRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_disconnect: Option<bool>,
    /// Explicit port key, used when restoring relays without a device lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_logic: Option<RelayLogic>,
    /// Builder and template parameters not covered by the named fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ..Default::default()
        }
    }

    pub fn with_pin(mut self, pin: impl Into<PinRef>) -> Self {
        self.pin = Some(pin.into());
        self
    }

    pub fn with_state(mut self, state: u8) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn with_action(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_param(key, value.into());
        self
    }

    /// Set a parameter by wire name, routing known keys to their typed field
    ///
    /// Values that do not fit the typed field land in `extra` unchanged.
    pub fn set_param(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let mut probe = Map::new();
        probe.insert("cmd".to_string(), Value::String(self.cmd.clone()));
        probe.insert(key.clone(), value.clone());
        match serde_json::from_value::<Command>(Value::Object(probe)) {
            Ok(parsed) if parsed.extra.is_empty() => self.merge_from(parsed),
            _ => {
                self.extra.insert(key, value);
            },
        }
    }

    /// Read a parameter by wire name
    pub fn param(&self, key: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.get(key).cloned(),
            _ => None,
        }
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.param(key).is_some()
    }

    fn merge_from(&mut self, other: Command) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            pin,
            state,
            value,
            device_id,
            duration,
            power_level,
            power_from,
            power_to,
            direction,
            action_type,
            trigger_pin,
            echo_pin,
            timeout,
            stop_on_disconnect,
            port,
            relay_logic
        );
    }

    /// Compact single-line JSON as written to the serial link
    pub fn to_wire(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Response
// ============================================================================

/// Normalized controller response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, deserialize_with = "flag::deserialize")]
    pub ok: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volt: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp::deserialize"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: 1,
            message: Some(message.into()),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: 0,
            error: Some(error.into()),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Wrap a line that is not JSON: the text is both message and value
    pub fn from_text(line: &str) -> Self {
        Self {
            ok: 1,
            message: Some(line.to_string()),
            value: Some(Value::String(line.to_string())),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ok == 1
    }

    /// Error text, or a generic fallback for failures without one
    pub fn error_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "Unknown error".to_string())
    }

    /// Numeric reading: value, then state, then volt
    pub fn numeric_value(&self) -> Option<f64> {
        self.value
            .as_ref()
            .and_then(value_as_f64)
            .or_else(|| self.state.as_ref().and_then(value_as_f64))
            .or(self.volt)
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Add a server-side timestamp if the controller did not send one
    pub fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        self
    }

    /// Parse one line from the wire
    pub fn parse_line(line: &str) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => serde_json::from_value(Value::Object(map))
                .unwrap_or_else(|_| Self::from_text(line)),
            _ => Self::from_text(line),
        }
    }
}
