//! Controller adapters
//!
//! One adapter owns one physical connection. Callers only see
//! `ControllerAdapter`; the factory picks the transport.

pub mod factory;
pub mod http;
pub mod mock;
pub mod pins;
pub mod serial;
pub mod traits;

pub use factory::{AdapterConstructor, AdapterFactory, HttpConstructor, SerialConstructor};
pub use http::{HttpAdapter, HttpSettings, HttpTimings};
pub use mock::{MockAdapter, MockConstructor};
pub use pins::GpioMap;
pub use serial::{
    BoxedSerialStream, SerialAdapter, SerialOpener, SerialSettings, SerialStream, SerialTimings,
    TokioSerialOpener,
};
pub use traits::{
    restore_pin_states, AdapterStats, ConnectionResult, ConnectionState, ControllerAdapter,
    Protocol, RestoreSummary,
};
