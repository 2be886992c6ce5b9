//! Hydroponics Hardware Communication Service (hwsrv)

use clap::Parser;
use tracing::info;

use common::service_bootstrap::ServiceInfo;
use errors::{HydroError, HydroResult};

use hwsrv::core::bootstrap::{self, Args};
use hwsrv::core::config::HwsrvConfig;
use hwsrv::runtime::HwsrvRuntime;

#[tokio::main]
async fn main() -> HydroResult<()> {
    let args = Args::parse();

    // Logging settings live in the config, so it is loaded first
    let config = HwsrvConfig::load(args.config.as_deref())?;

    let service_info = ServiceInfo::new(
        config.service.name.clone(),
        env!("CARGO_PKG_VERSION"),
        "Hydroponics Hardware Communication Service",
    );
    bootstrap::initialize_logging(&args, &service_info, &config)?;
    if !args.no_color && !args.check_once {
        common::service_bootstrap::print_startup_banner(&service_info);
    }

    // Validation mode: validate and exit
    let inventory = bootstrap::validate_configuration(&config)?;
    if args.validate {
        info!("Validation completed successfully");
        return Ok(());
    }

    let runtime = HwsrvRuntime::new(config, inventory);

    if args.check_once {
        let report = runtime.check_once().await?;
        let json = serde_json::to_string_pretty(&report).map_err(HydroError::from)?;
        println!("{}", json);
        return Ok(());
    }

    let shutdown = common::shutdown::shutdown_token();
    runtime.run(shutdown).await?;

    info!("Service shutdown complete");
    Ok(())
}
