//! Service configuration
//!
//! Layering, lowest to highest: built-in defaults, the config file (YAML,
//! TOML or JSON by extension), then `HWSRV_` environment variables with `__`
//! between sections (`HWSRV_SERIAL__RESPONSE_TIMEOUT_MS=3000`).

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::adapter::{HttpTimings, SerialTimings};
use super::engine::EngineSettings;
use super::health::DEFAULT_HISTORY_LIMIT;
use crate::error::{HwError, Result};

pub const ENV_PREFIX: &str = "HWSRV_";

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    pub name: String,
    /// Seconds between batch health checks
    pub health_check_interval_secs: u64,
    /// Liveness ping budget per controller before each batch
    pub ping_timeout_ms: u64,
    /// Reopen dropped or never-opened controllers on each batch
    pub reconnect_offline: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "hwsrv".to_string(),
            health_check_interval_secs: 300,
            ping_timeout_ms: 3000,
            reconnect_offline: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// Log root; `HYDRO_LOG_DIR` still wins when set
    pub dir: Option<String>,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSection {
    pub handshake_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub response_timeout_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 5000,
            settle_delay_ms: 2000,
            response_timeout_ms: 5000,
        }
    }
}

impl SerialSection {
    pub fn timings(&self) -> SerialTimings {
        SerialTimings {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            response_timeout: Duration::from_millis(self.response_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Used when a controller record carries no `timeout`
    pub default_timeout_ms: u64,
    pub health_timeout_ms: u64,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            health_timeout_ms: 5000,
        }
    }
}

impl HttpSection {
    pub fn timings(&self) -> HttpTimings {
        HttpTimings {
            default_timeout: Duration::from_millis(self.default_timeout_ms),
            health_timeout: Duration::from_millis(self.health_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    /// Samples read per device by the historical layer
    pub history_limit: usize,
    /// Read sensors through the engine instead of trusting `lastReading`
    pub live_reads: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            live_reads: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySection {
    /// Relative paths resolve against the config file's directory
    pub path: PathBuf,
}

impl Default for InventorySection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inventory.yaml"),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HwsrvConfig {
    pub service: ServiceSection,
    pub logging: LoggingSection,
    pub serial: SerialSection,
    pub http: HttpSection,
    pub engine: EngineSettings,
    pub validation: ValidationSection,
    pub inventory: InventorySection,
    /// Directory of the loaded file, for resolving relative paths
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl HwsrvConfig {
    /// Defaults, then `path` when given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(HwsrvConfig::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(HwError::config(format!("Config file not found: {}", path.display())));
            }
            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .ok_or_else(|| HwError::config(format!("Invalid file extension: {}", path.display())))?;

            figment = match extension {
                "json" => figment.merge(Json::file(path)),
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                other => {
                    return Err(HwError::config(format!("Unsupported config format: {}", other)));
                },
            };
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: HwsrvConfig = figment
            .extract()
            .map_err(|e| HwError::config(format!("Failed to parse config: {}", e)))?;
        config.base_dir = path.and_then(Path::parent).map(Path::to_path_buf);
        config.validate()?;

        debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(HwError::config("service.name cannot be empty"));
        }
        if self.service.health_check_interval_secs == 0 {
            return Err(HwError::config("service.health_check_interval_secs must be positive"));
        }
        if self.service.ping_timeout_ms == 0 {
            return Err(HwError::config("service.ping_timeout_ms must be positive"));
        }
        if self.serial.response_timeout_ms == 0 || self.serial.handshake_timeout_ms == 0 {
            return Err(HwError::config("serial timeouts must be positive"));
        }
        if self.http.default_timeout_ms == 0 || self.http.health_timeout_ms == 0 {
            return Err(HwError::config("http timeouts must be positive"));
        }
        if self.validation.history_limit < 2 {
            return Err(HwError::config("validation.history_limit must be at least 2"));
        }
        Ok(())
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.service.health_check_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.service.ping_timeout_ms)
    }

    /// Inventory path with relative paths anchored at the config file
    pub fn inventory_path(&self) -> PathBuf {
        let path = &self.inventory.path;
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = HwsrvConfig::default();
        assert_eq!(config.service.name, "hwsrv");
        assert_eq!(config.serial.timings(), SerialTimings::default());
        assert_eq!(config.http.timings().default_timeout, Duration::from_secs(5));
        assert!(config.engine.reversal_enabled);
        assert!(config.service.reconnect_offline);
        assert_eq!(config.ping_timeout(), Duration::from_secs(3));
        assert_eq!(config.validation.history_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_keeps_defaults() {
        let file = write_config(
            ".yaml",
            "serial:\n  response_timeout_ms: 1500\nengine:\n  reversal_enabled: false\ninventory:\n  path: devices.yaml\n",
        );
        let config = HwsrvConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.serial.response_timeout_ms, 1500);
        assert_eq!(config.serial.handshake_timeout_ms, 5000);
        assert!(!config.engine.reversal_enabled);
        assert_eq!(
            config.inventory_path(),
            file.path().parent().unwrap().join("devices.yaml")
        );
    }

    #[test]
    fn test_toml_and_json() {
        let toml = write_config(".toml", "[service]\nhealth_check_interval_secs = 60\n");
        assert_eq!(
            HwsrvConfig::load(Some(toml.path())).unwrap().health_check_interval(),
            Duration::from_secs(60)
        );

        let json = write_config(".json", r#"{"logging": {"level": "debug", "json": true}}"#);
        let config = HwsrvConfig::load(Some(json.path())).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let ini = write_config(".ini", "service=hwsrv");
        assert!(HwsrvConfig::load(Some(ini.path())).is_err());

        assert!(HwsrvConfig::load(Some(Path::new("/nonexistent/hwsrv.yaml"))).is_err());

        let zero = write_config(".yaml", "validation:\n  history_limit: 1\n");
        let err = HwsrvConfig::load(Some(zero.path())).unwrap_err();
        assert!(err.to_string().contains("history_limit"));
    }

    #[test]
    fn test_environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("hwsrv.yaml", "http:\n  default_timeout_ms: 4000\n")?;
            jail.set_env("HWSRV_HTTP__DEFAULT_TIMEOUT_MS", "2500");
            jail.set_env("HWSRV_VALIDATION__LIVE_READS", "true");

            let config = HwsrvConfig::load(Some(Path::new("hwsrv.yaml"))).unwrap();
            assert_eq!(config.http.default_timeout_ms, 2500);
            assert!(config.validation.live_reads);
            Ok(())
        });
    }
}
