//! Service Bootstrap and Initialization
//!
//! Command-line arguments, logging setup and the `--validate` checks.

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};

use common::service_bootstrap::ServiceInfo;
use errors::HydroResult;

use super::adapter::AdapterFactory;
use super::config::HwsrvConfig;
use crate::error::{HwError, Result};
use crate::model::ExecutionStrategy;
use crate::storage::Inventory;

/// Command-line arguments for hwsrv
#[derive(Parser, Clone, Debug)]
#[command(
    name = "hwsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Hydroponics Hardware Communication Service",
    long_about = None
)]
pub struct Args {
    /// Config file (YAML, TOML or JSON)
    #[arg(short = 'c', long, env = "HWSRV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides logging.level
    #[arg(short = 'l', long, env = "HWSRV_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Validation mode - load config and inventory, then exit
    #[arg(long)]
    pub validate: bool,

    /// Connect, run one health check, print the JSON report and exit
    #[arg(long, conflicts_with = "validate")]
    pub check_once: bool,
}

impl Args {
    pub fn effective_log_level<'a>(&'a self, config: &'a HwsrvConfig) -> &'a str {
        self.log_level.as_deref().unwrap_or(&config.logging.level)
    }
}

/// Initialize logging from arguments and config
///
/// Log root directory priority:
/// 1. HYDRO_LOG_DIR environment variable
/// 2. logging.dir from the config file
/// 3. Default "logs"
pub fn initialize_logging(args: &Args, service_info: &ServiceInfo, config: &HwsrvConfig) -> HydroResult<()> {
    common::service_bootstrap::init_logging(
        service_info,
        args.effective_log_level(config),
        config.logging.dir.as_deref(),
        config.logging.json,
        !args.no_color,
    )
}

/// Load the inventory and check it against the adapter factory
///
/// Hard errors: unreadable inventory, devices pointing at unknown
/// controllers. Everything else is logged as a warning.
pub fn validate_configuration(config: &HwsrvConfig) -> Result<Inventory> {
    let path = config.inventory_path();
    info!("Validating inventory {}", path.display());
    let inventory = Inventory::load(&path)?;

    let dangling = inventory.dangling_devices();
    if !dangling.is_empty() {
        let ids: Vec<&str> = dangling.iter().map(|d| d.id.as_str()).collect();
        return Err(HwError::config(format!(
            "Devices reference unknown controllers: {}",
            ids.join(", ")
        )));
    }

    let factory = AdapterFactory::new(config.serial.timings(), config.http.timings());
    for controller in &inventory.controllers {
        if factory.is_protocol_supported(&controller.communication_type) {
            info!(
                "  Controller {}: {} ({}, {} ports)",
                controller.id,
                controller.label(),
                controller.communication_type,
                controller.available_ports.len()
            );
        } else {
            warn!(
                "  Controller {}: communication type {} is not supported (supported: {})",
                controller.id,
                controller.communication_type,
                factory.supported_protocols().join(", ")
            );
        }
    }

    for template in &inventory.templates {
        if let ExecutionStrategy::Unknown(strategy) = &template.execution_config.strategy {
            warn!("  Template {}: unknown execution strategy {}", template.device_type, strategy);
        }
    }

    for device in &inventory.devices {
        let has_template = inventory
            .templates
            .iter()
            .any(|t| t.is_active && t.device_type == device.device_type);
        if !has_template {
            warn!("  Device {}: no active template for type {}", device.id, device.device_type);
        }
        if device.ports.is_empty() {
            warn!("  Device {}: no ports configured", device.id);
        }
    }

    info!(
        "Inventory valid: {} controllers, {} devices, {} templates",
        inventory.controllers.len(),
        inventory.devices.len(),
        inventory.templates.len()
    );
    Ok(inventory)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn config_with_inventory(body: &str) -> (tempfile::TempDir, HwsrvConfig) {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("inventory.yaml")).unwrap();
        file.write_all(body.as_bytes()).unwrap();

        let mut config = HwsrvConfig::default();
        config.inventory.path = dir.path().join("inventory.yaml");
        (dir, config)
    }

    #[test]
    fn test_cli_flags() {
        let args = Args::try_parse_from(["hwsrv", "-c", "cfg.yaml", "--check-once", "--no-color"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("cfg.yaml")));
        assert!(args.check_once && args.no_color && !args.validate);
        assert_eq!(args.effective_log_level(&HwsrvConfig::default()), "info");

        let args = Args::try_parse_from(["hwsrv", "-l", "debug"]).unwrap();
        assert_eq!(args.effective_log_level(&HwsrvConfig::default()), "debug");

        assert!(Args::try_parse_from(["hwsrv", "--validate", "--check-once"]).is_err());
    }

    #[test]
    fn test_validate_accepts_inventory() {
        let (_dir, config) = config_with_inventory(
            r#"
controllers:
  - { id: c1, communicationType: mqtt }
devices:
  - { id: d1, controllerId: c1, type: relay, category: actuator, ports: [D2] }
"#,
        );
        let inventory = validate_configuration(&config).unwrap();
        assert_eq!(inventory.devices.len(), 1);
    }

    #[test]
    fn test_validate_rejects_dangling_devices() {
        let (_dir, config) = config_with_inventory(
            "devices:\n  - { id: d1, controllerId: ghost, type: relay, category: actuator }\n",
        );
        let err = validate_configuration(&config).unwrap_err();
        assert!(err.to_string().contains("d1"));
    }
}
