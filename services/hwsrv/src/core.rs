//! Core hardware service components
//!
//! Layering, leaves first: adapters own the physical links, the registry
//! owns the adapters, the engine turns commands into wire traffic, and the
//! health layer judges sensors, partly through the engine.
//!
//! - **`adapter`** - serial and HTTP transports plus the factory
//! - **`registry`** - one live adapter per controller
//! - **`engine`** - command dispatch and execution strategies
//! - **`builder`** - protocol-native commands from device templates
//! - **`conversion`** - pluggable raw-to-physical converters
//! - **`health`** - sensor validation and batch health checks
//! - **`notify`** - controller lifecycle events
//! - **`config`** / **`bootstrap`** - service configuration and startup

pub mod adapter;
pub mod bootstrap;
pub mod builder;
pub mod config;
pub mod conversion;
pub mod engine;
pub mod health;
pub mod notify;
pub mod registry;
