//! Hydroponics Hardware Communication Service (hwsrv)
//!
//! Talks to Arduino-class and WiFi controllers, turns device-level intents
//! into wire commands and keeps an eye on sensor health.
//!
//! # Architecture
//!
//! - **`model`**: commands, responses, devices, controllers, templates
//! - **`storage`**: repository traits and the inventory-backed store
//! - **`core`**: adapters, connection registry, command engine, health layer
//! - **`runtime`**: wiring and service lifecycle
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  CommandEngine  │───►│ConnectionManager│───►│ Serial / HTTP   │
//! │  (strategies)   │    │ (one per ctrl)  │    │   adapters      │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//!          ▲                                            │
//!          │                                            ▼
//! ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
//! │  HealthChecker  │───►│ HealthValidator │    │ Microcontroller │
//! │   (periodic)    │    │ (range/history) │    │    firmware     │
//! └─────────────────┘    └─────────────────┘    └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use hwsrv::core::config::HwsrvConfig;
//! use hwsrv::model::Command;
//! use hwsrv::runtime::HwsrvRuntime;
//! use hwsrv::storage::Inventory;
//!
//! # async fn demo() -> hwsrv::error::Result<()> {
//! let config = HwsrvConfig::load(None)?;
//! let inventory = Inventory::load(config.inventory_path())?;
//! let runtime = HwsrvRuntime::new(config, inventory);
//! runtime.connect_all().await?;
//!
//! let response = runtime
//!     .engine()
//!     .send_command("ctrl-1", Command::new("ACTIVATE_RELAY").for_device("pump-1"))
//!     .await;
//! println!("{}", response.ok);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod model;
pub mod runtime;
pub mod storage;

pub use crate::core::engine::CommandEngine;
pub use crate::error::{HwError, Result};
pub use crate::runtime::HwsrvRuntime;
