//! HTTP adapter for WiFi boards
//!
//! Stateless transport: `initialize` validates settings and derives the base
//! URL, liveness goes through `GET /health`, commands through `POST /command`.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::pins::GpioMap;
use super::traits::{AdapterStats, ConnectionResult, ConnectionState, ControllerAdapter, Protocol};
use crate::error::{HwError, Result};
use crate::model::{parse_port_key, Command, Controller, PortInfo, Response};

// ============================================================================
// Settings
// ============================================================================

fn default_http_port() -> u16 {
    80
}

// Port arrives as 80 or "80" depending on who wrote the record
fn lenient_port<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(default_http_port()),
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| serde::de::Error::custom(format!("invalid port {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(default_http_port()),
        Value::String(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|_| serde::de::Error::custom(format!("invalid port {}", s))),
        other => Err(serde::de::Error::custom(format!("invalid port {}", other))),
    }
}

/// HTTP settings taken from `communicationConfig` (snake_case keys)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub ip_address: String,
    #[serde(default = "default_http_port", deserialize_with = "lenient_port")]
    pub port: u16,
    #[serde(default)]
    pub base_path: String,
    /// Request timeout in milliseconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl HttpSettings {
    fn from_map(config: &Map<String, Value>, controller_label: &str) -> Result<Self> {
        let has_ip = config
            .get("ip_address")
            .and_then(Value::as_str)
            .map(|ip| !ip.trim().is_empty())
            .unwrap_or(false);
        if !has_ip {
            return Err(HwError::config(format!(
                "HTTP controller {} missing ip_address",
                controller_label
            )));
        }
        serde_json::from_value(Value::Object(config.clone())).map_err(|e| {
            HwError::config(format!(
                "Invalid HTTP configuration for controller {}: {}",
                controller_label, e
            ))
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}{}", self.ip_address, self.port, self.base_path)
    }
}

/// Request budgets for HTTP controllers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimings {
    /// Used when the controller record carries no `timeout`
    pub default_timeout: Duration,
    pub health_timeout: Duration,
}

impl Default for HttpTimings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(5000),
            health_timeout: Duration::from_millis(5000),
        }
    }
}

/// Raw map plus its parsed form, kept together so partial updates can merge
#[derive(Debug, Clone)]
struct LiveSettings {
    raw: Map<String, Value>,
    parsed: HttpSettings,
    base_url: String,
}

// ============================================================================
// Adapter
// ============================================================================

pub struct HttpAdapter {
    controller_id: String,
    controller_label: RwLock<String>,
    client: reqwest::Client,
    timings: HttpTimings,
    gpio: GpioMap,
    settings: RwLock<Option<LiveSettings>>,
    state: RwLock<ConnectionState>,
    stats: RwLock<AdapterStats>,
}

impl fmt::Debug for HttpAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAdapter")
            .field("controller_id", &self.controller_id)
            .field("board", &self.gpio.board)
            .field("state", &*self.state.read())
            .field("base_url", &self.base_url())
            .finish()
    }
}

impl HttpAdapter {
    pub fn new(controller_id: impl Into<String>, client: reqwest::Client, timings: HttpTimings) -> Self {
        let controller_id = controller_id.into();
        Self {
            controller_label: RwLock::new(controller_id.clone()),
            controller_id,
            client,
            timings,
            gpio: GpioMap::WEMOS_D1_R2,
            settings: RwLock::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
            stats: RwLock::new(AdapterStats::default()),
        }
    }

    pub fn base_url(&self) -> Option<String> {
        self.settings.read().as_ref().map(|s| s.base_url.clone())
    }

    fn request_timeout(&self) -> Duration {
        self.settings
            .read()
            .as_ref()
            .and_then(|s| s.parsed.timeout)
            .map(Duration::from_millis)
            .unwrap_or(self.timings.default_timeout)
    }

    fn set_connected(&self, connected: bool) {
        *self.state.write() = if connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
    }

    fn apply_settings(&self, raw: Map<String, Value>) -> Result<HttpSettings> {
        let parsed = HttpSettings::from_map(&raw, &self.controller_label.read())?;
        let base_url = parsed.base_url();
        *self.settings.write() = Some(LiveSettings {
            raw,
            parsed: parsed.clone(),
            base_url,
        });
        Ok(parsed)
    }

    async fn post_command(&self, base_url: &str, command: &Command) -> Result<Response> {
        let wire = self.gpio.transform_command(command);
        let url = format!("{}/command", base_url);
        debug!("Controller {}: POST {} {:?}", self.controller_id, url, wire.to_wire());

        let response = self
            .client
            .post(&url)
            .timeout(self.request_timeout())
            .json(&wire)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Response::failure(format!("HTTP error: {}", status)));
        }

        let text = response.text().await?;
        let body: Value = serde_json::from_str(text.trim())
            .map_err(|e| HwError::protocol(format!("Invalid JSON from controller: {}", e)))?;
        Ok(normalize_body(body))
    }
}

/// Map the three body shapes a board may answer with onto `Response`
fn normalize_body(body: Value) -> Response {
    let success = body.get("success").and_then(Value::as_bool);
    match (success, body.get("data")) {
        (Some(true), Some(data)) if !data.is_null() => {
            let field = |key: &str| data.get(key).filter(|v| !v.is_null()).cloned();
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("Success")
                .to_string();
            Response {
                ok: 1,
                message: Some(message),
                value: field("value").or_else(|| field("duration")).or_else(|| field("volt")),
                duration: field("duration"),
                unit: data.get("unit").and_then(Value::as_str).map(str::to_string),
                data: Some(data.clone()),
                ..Default::default()
            }
            .stamped()
        },
        (Some(false), _) => {
            let error = body.get("error").and_then(Value::as_str);
            Response {
                ok: 0,
                error: Some(error.unwrap_or("HTTP command failed").to_string()),
                message: error.map(str::to_string),
                ..Default::default()
            }
        },
        _ => {
            let parsed = match body {
                Value::Object(map) => serde_json::from_value::<Response>(Value::Object(map.clone()))
                    .unwrap_or_else(|_| Response {
                        extra: map,
                        ..Default::default()
                    }),
                other => Response::from_text(&other.to_string()),
            };
            Response {
                timestamp: None,
                ..parsed
            }
            .stamped()
        },
    }
}

/// Liveness from a `/health` body: JSON status or a plain-text marker
fn health_body_says_online(text: &str) -> bool {
    match serde_json::from_str::<Value>(text) {
        Ok(data) => {
            data.get("status").and_then(Value::as_str) == Some("online")
                || data.get("success").and_then(Value::as_bool) == Some(true)
        },
        Err(_) => text.contains("online") || text.contains("OK"),
    }
}

#[async_trait]
impl ControllerAdapter for HttpAdapter {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn controller_id(&self) -> &str {
        &self.controller_id
    }

    fn is_connected(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.read()
    }

    async fn initialize(&self, controller: &Controller) -> ConnectionResult {
        *self.controller_label.write() = controller.label().to_string();
        *self.state.write() = ConnectionState::Opening;

        match self.apply_settings(controller.communication_config.clone()) {
            Ok(settings) => {
                let base_url = settings.base_url();
                self.set_connected(true);
                info!(
                    "Controller {}: HTTP controller ready at {}",
                    self.controller_id, base_url
                );
                ConnectionResult::connected(
                    &self.controller_id,
                    Protocol::Http,
                    json!({
                        "baseUrl": base_url,
                        "ipAddress": settings.ip_address,
                        "port": settings.port,
                    }),
                )
            },
            Err(e) => {
                self.set_connected(false);
                error!(
                    "Controller {}: HTTP initialization failed: {}",
                    self.controller_id, e
                );
                ConnectionResult::failed(&self.controller_id, Protocol::Http, e.to_string())
            },
        }
    }

    async fn send_command(&self, command: &Command) -> Response {
        let base_url = match self.base_url() {
            Some(url) if self.is_connected() => url,
            _ => {
                return Response::failure(format!(
                    "HTTP controller {} not connected",
                    self.controller_id
                ))
            },
        };

        self.stats.write().record_sent();
        match self.post_command(&base_url, command).await {
            Ok(response) => {
                if !response.is_ok() {
                    self.stats.write().commands_failed += 1;
                }
                response
            },
            Err(e) => {
                self.stats.write().record_failure(&e);
                error!(
                    "Controller {}: HTTP command {} failed: {}",
                    self.controller_id, command.cmd, e
                );
                Response::failure(e.to_string())
            },
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.set_connected(false);
        debug!("Controller {}: HTTP adapter disconnected", self.controller_id);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.is_connected() && self.ping().await
    }

    async fn ping(&self) -> bool {
        let Some(base_url) = self.base_url() else {
            return false;
        };

        let result = self
            .client
            .get(format!("{}/health", base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.timings.health_timeout)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(text) => health_body_says_online(&text),
                Err(e) => {
                    warn!("Controller {}: unreadable health body: {}", self.controller_id, e);
                    false
                },
            },
            Ok(resp) => {
                warn!(
                    "Controller {}: health endpoint answered {}",
                    self.controller_id,
                    resp.status()
                );
                false
            },
            Err(e) => {
                error!("Controller {}: HTTP ping failed: {}", self.controller_id, e);
                false
            },
        }
    }

    fn connection_info(&self) -> Option<Value> {
        let settings = self.settings.read();
        settings.as_ref().map(|s| {
            json!({
                "baseUrl": s.base_url,
                "ipAddress": s.parsed.ip_address,
                "port": s.parsed.port,
                "basePath": s.parsed.base_path,
                "isConnected": self.is_connected(),
                "protocol": Protocol::Http.as_str(),
            })
        })
    }

    async fn update_config(&self, partial: &Map<String, Value>) -> Result<bool> {
        let mut merged = self
            .settings
            .read()
            .as_ref()
            .map(|s| s.raw.clone())
            .unwrap_or_default();
        for (key, value) in partial {
            merged.insert(key.clone(), value.clone());
        }

        let settings = self.apply_settings(merged)?;
        let address_changed = ["ip_address", "port", "base_path"]
            .iter()
            .any(|key| partial.contains_key(*key));
        if !address_changed {
            return Ok(self.is_connected());
        }

        let reachable = self.ping().await;
        self.set_connected(reachable);
        info!(
            "Controller {}: HTTP configuration updated, base URL {} ({})",
            self.controller_id,
            settings.base_url(),
            if reachable { "OK" } else { "FAILED" }
        );
        Ok(reachable)
    }

    fn stats(&self) -> AdapterStats {
        self.stats.read().clone()
    }

    fn can_restore_port(&self, port: &PortInfo) -> bool {
        // Analog keys never reach here; only digital ports are restored
        parse_port_key(&port.key).is_ok() && self.gpio.accepts_port(&port.key)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::model::ControllerStatus;

    fn http_controller(config: Value) -> Controller {
        Controller {
            id: "wemos-1".into(),
            name: "Greenhouse WeMos".into(),
            board: Some("WeMos_D1_R2".into()),
            communication_type: "http".into(),
            communication_config: config.as_object().cloned().unwrap_or_default(),
            status: ControllerStatus::Online,
            is_active: true,
            available_ports: vec![],
        }
    }

    fn adapter() -> HttpAdapter {
        HttpAdapter::new("wemos-1", reqwest::Client::new(), HttpTimings::default())
    }

    #[tokio::test]
    async fn test_initialize_derives_base_url() {
        let adapter = adapter();
        let result = adapter
            .initialize(&http_controller(json!({"ip_address": "192.168.1.50", "port": "8080", "base_path": "/api"})))
            .await;

        assert!(result.success);
        assert_eq!(adapter.base_url().as_deref(), Some("http://192.168.1.50:8080/api"));
        let info = adapter.connection_info().unwrap();
        assert_eq!(info["port"], json!(8080));
        assert_eq!(info["basePath"], json!("/api"));
        assert_eq!(info["isConnected"], json!(true));
    }

    #[tokio::test]
    async fn test_initialize_requires_ip_address() {
        let adapter = adapter();
        let result = adapter.initialize(&http_controller(json!({"port": 80}))).await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Configuration error: HTTP controller Greenhouse WeMos missing ip_address")
        );
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_initialize_is_not_connected() {
        let resp = adapter().send_command(&Command::new("PING")).await;
        assert_eq!(resp.ok, 0);
        assert_eq!(resp.error.as_deref(), Some("HTTP controller wemos-1 not connected"));
    }

    #[test]
    fn test_normalize_success_envelope() {
        let resp = normalize_body(json!({
            "success": true,
            "data": {"message": "measured", "duration": 1180, "unit": "us"}
        }));
        assert!(resp.is_ok());
        assert_eq!(resp.value, Some(json!(1180)));
        assert_eq!(resp.duration, Some(json!(1180)));
        assert_eq!(resp.unit.as_deref(), Some("us"));
        assert!(resp.timestamp.is_some());
    }

    #[test]
    fn test_normalize_failure_envelope() {
        let resp = normalize_body(json!({"success": false, "error": "pin busy"}));
        assert_eq!(resp.ok, 0);
        assert_eq!(resp.error_text(), "pin busy");

        let bare = normalize_body(json!({"success": false}));
        assert_eq!(bare.error_text(), "HTTP command failed");
    }

    #[test]
    fn test_normalize_passthrough_keeps_fields() {
        let resp = normalize_body(json!({"ok": 1, "ver": "2.0", "up": 1234}));
        assert!(resp.is_ok());
        assert_eq!(resp.extra.get("ver"), Some(&json!("2.0")));
        assert!(resp.timestamp.is_some());
    }

    #[test]
    fn test_health_body_variants() {
        assert!(health_body_says_online(r#"{"status":"online"}"#));
        assert!(health_body_says_online(r#"{"success":true}"#));
        assert!(!health_body_says_online(r#"{"status":"booting"}"#));
        assert!(health_body_says_online("OK"));
        assert!(!health_body_says_online("down"));
    }

    #[test]
    fn test_restore_skips_flash_ports() {
        let adapter = adapter();
        let port = |key: &str| PortInfo {
            key: key.into(),
            label: key.into(),
            port_type: None,
            is_active: true,
            is_occupied: false,
            current_state: None,
        };
        assert!(adapter.can_restore_port(&port("D2")));
        assert!(!adapter.can_restore_port(&port("D11")));
        assert!(!adapter.can_restore_port(&port("Dx")));
    }
}
