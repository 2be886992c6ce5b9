//! Data model shared by adapters, the command engine and the health layer

pub mod command; // Wire command / response records
pub mod controller; // Controller records and port map
pub mod device; // Devices, relay polarity, validation limits
pub mod template; // Device templates and execution strategies

pub use command::{parse_port_key, value_as_f64, Command, PinRef, Response};
pub use controller::{Controller, ControllerStatus, PinLevel, PortInfo, PortType};
pub use device::{
    CalibrationData, Device, DeviceCategory, DeviceUpdate, HealthStatus, RelayLogic,
    ValidationConfig,
};
pub use template::{CommandStep, DeviceTemplate, ExecutionConfig, ExecutionStrategy, PortRequirement};
