//! Hydroponics services basic library
//!
//! Provides basic functions shared by all services, including:
//! - logging functions
//! - startup banner and service metadata
//! - graceful shutdown signal handling

pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use service_bootstrap::ServiceInfo;
