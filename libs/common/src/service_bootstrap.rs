//! Service bootstrap utilities
//!
//! Startup banner, service metadata and the standard logging setup shared by
//! the hydroponics services.

use crate::logging::{self, LogConfig};
use errors::HydroResult;
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "hwsrv")
    pub name: String,
    /// Service version from Cargo.toml
    pub version: String,
    /// Service description
    pub description: String,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
        }
    }
}

/// Print startup banner for any service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = match service.name.as_str() {
        "hwsrv" => {
            r#"
 ██╗  ██╗██╗    ██╗███████╗██████╗ ██╗   ██╗
 ██║  ██║██║    ██║██╔════╝██╔══██╗██║   ██║
 ███████║██║ █╗ ██║███████╗██████╔╝██║   ██║
 ██╔══██║██║███╗██║╚════██║██╔══██╗╚██╗ ██╔╝
 ██║  ██║╚███╔███╔╝███████║██║  ██║ ╚████╔╝
 ╚═╝  ╚═╝ ╚══╝╚══╝ ╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#
        },
        _ => {
            r#"
 ██╗  ██╗██╗   ██╗██████╗ ██████╗  ██████╗
 ██║  ██║╚██╗ ██╔╝██╔══██╗██╔══██╗██╔═══██╗
 ███████║ ╚████╔╝ ██║  ██║██████╔╝██║   ██║
 ██╔══██║  ╚██╔╝  ██║  ██║██╔══██╗██║   ██║
 ██║  ██║   ██║   ██████╔╝██║  ██║╚██████╔╝
 ╚═╝  ╚═╝   ╚═╝   ╚═════╝ ╚═╝  ╚═╝ ╚═════╝
            "#
        },
    };

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!("");
}

/// Initialize logging for a service with standard configuration
///
/// Log root directory priority:
/// 1. HYDRO_LOG_DIR environment variable
/// 2. `log_dir` from the service config file
/// 3. Default "logs"
pub fn init_logging(
    service: &ServiceInfo,
    level: &str,
    log_dir: Option<&str>,
    json: bool,
    ansi: bool,
) -> HydroResult<()> {
    logging::init_log_root(log_dir);

    let log_config = LogConfig {
        service_name: service.name.clone(),
        log_dir: logging::get_log_root().join(&service.name),
        console_level: logging::parse_level(level),
        enable_json: json,
        enable_file: true,
        ansi,
    };

    logging::init_with_config(log_config)
}
