//! Persistence seams
//!
//! The core reads devices, controllers and templates and writes back a
//! handful of fields. Every repository call may fail; callers treat that as
//! recoverable.

pub mod memory;
pub mod traits;

pub use memory::{Inventory, InMemoryRepository};
pub use traits::{
    ControllerRepository, DeviceQuery, DeviceRepository, Reading, ReadingHistory, Repositories,
    TemplateRepository,
};
