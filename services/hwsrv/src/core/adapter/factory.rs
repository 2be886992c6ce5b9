//! Adapter Factory
//!
//! Maps a controller's `communicationType` onto an adapter constructor.
//! Adding a transport means implementing `AdapterConstructor` and
//! registering it in `AdapterFactory::new`.

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use super::http::{HttpAdapter, HttpTimings};
use super::serial::{SerialAdapter, SerialOpener, SerialTimings, TokioSerialOpener};
use super::traits::ControllerAdapter;
use crate::error::{HwError, Result};
use crate::model::Controller;

// ============================================================================
// Constructor Trait
// ============================================================================

/// Builds an uninitialized adapter for one controller
pub trait AdapterConstructor: Send + Sync {
    /// `communicationType` strings this constructor handles
    fn protocol_names(&self) -> &'static [&'static str];

    fn create(&self, controller: &Controller) -> Arc<dyn ControllerAdapter>;
}

/// Line-based serial controllers
pub struct SerialConstructor {
    opener: Arc<dyn SerialOpener>,
    timings: SerialTimings,
}

impl SerialConstructor {
    pub fn new(opener: Arc<dyn SerialOpener>, timings: SerialTimings) -> Self {
        Self { opener, timings }
    }
}

impl AdapterConstructor for SerialConstructor {
    fn protocol_names(&self) -> &'static [&'static str] {
        &["raw_serial"]
    }

    fn create(&self, controller: &Controller) -> Arc<dyn ControllerAdapter> {
        Arc::new(SerialAdapter::new(&controller.id, self.opener.clone(), self.timings))
    }
}

/// HTTP/WiFi controllers; one client shared by every adapter
pub struct HttpConstructor {
    client: reqwest::Client,
    timings: HttpTimings,
}

impl HttpConstructor {
    pub fn new(client: reqwest::Client, timings: HttpTimings) -> Self {
        Self { client, timings }
    }
}

impl AdapterConstructor for HttpConstructor {
    fn protocol_names(&self) -> &'static [&'static str] {
        &["http"]
    }

    fn create(&self, controller: &Controller) -> Arc<dyn ControllerAdapter> {
        Arc::new(HttpAdapter::new(&controller.id, self.client.clone(), self.timings))
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Declared in controller records but without a transport yet
const PLANNED_PROTOCOLS: &[(&str, &str)] = &[("mqtt", "MQTT"), ("websocket", "WebSocket")];

pub struct AdapterFactory {
    constructors: DashMap<String, Arc<dyn AdapterConstructor>, RandomState>,
    /// Registration order, for stable `supported_protocols` output
    order: RwLock<Vec<String>>,
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::new(SerialTimings::default(), HttpTimings::default())
    }
}

impl AdapterFactory {
    /// Factory with the serial and HTTP transports registered
    pub fn new(serial: SerialTimings, http: HttpTimings) -> Self {
        let factory = Self::empty();
        factory.register(Arc::new(SerialConstructor::new(Arc::new(TokioSerialOpener), serial)));
        factory.register(Arc::new(HttpConstructor::new(reqwest::Client::new(), http)));
        factory
    }

    pub fn empty() -> Self {
        Self {
            constructors: DashMap::with_hasher(RandomState::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// Swap the serial opener, keeping the given timings
    pub fn with_serial_opener(self, opener: Arc<dyn SerialOpener>, timings: SerialTimings) -> Self {
        self.register(Arc::new(SerialConstructor::new(opener, timings)));
        self
    }

    /// Register (or replace) a constructor under all of its names
    pub fn register(&self, constructor: Arc<dyn AdapterConstructor>) {
        let mut order = self.order.write();
        for name in constructor.protocol_names() {
            if self
                .constructors
                .insert((*name).to_string(), constructor.clone())
                .is_none()
            {
                order.push((*name).to_string());
            }
        }
    }

    /// Build the adapter for a controller; not initialized yet
    pub fn create(&self, controller: &Controller) -> Result<Arc<dyn ControllerAdapter>> {
        let kind = controller.communication_type.as_str();

        if let Some(constructor) = self.constructors.get(kind) {
            debug!(
                "Creating {} adapter for controller {}",
                kind,
                controller.label()
            );
            return Ok(constructor.create(controller));
        }

        if let Some((_, display)) = PLANNED_PROTOCOLS.iter().find(|(name, _)| *name == kind) {
            return Err(HwError::UnsupportedProtocol(format!(
                "{} adapter not yet implemented for controller {}",
                display,
                controller.label()
            )));
        }

        Err(HwError::UnsupportedProtocol(format!(
            "Unsupported communication type: {} for controller {}",
            kind,
            controller.label()
        )))
    }

    pub fn supported_protocols(&self) -> Vec<String> {
        self.order.read().clone()
    }

    pub fn is_protocol_supported(&self, protocol: &str) -> bool {
        self.constructors.contains_key(protocol)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::core::adapter::Protocol;
    use crate::model::ControllerStatus;
    use serde_json::Map;

    fn controller(kind: &str) -> Controller {
        Controller {
            id: "c1".into(),
            name: "Rack A".into(),
            board: None,
            communication_type: kind.into(),
            communication_config: Map::new(),
            status: ControllerStatus::Offline,
            is_active: true,
            available_ports: vec![],
        }
    }

    #[test]
    fn test_supported_protocols_create_matching_adapters() {
        let factory = AdapterFactory::default();
        assert_eq!(factory.supported_protocols(), vec!["raw_serial", "http"]);

        let serial = factory.create(&controller("raw_serial")).unwrap();
        assert_eq!(serial.protocol(), Protocol::RawSerial);
        assert_eq!(serial.controller_id(), "c1");
        assert!(!serial.is_connected());

        let http = factory.create(&controller("http")).unwrap();
        assert_eq!(http.protocol(), Protocol::Http);
    }

    #[test]
    fn test_planned_and_unknown_protocols_fail() {
        let factory = AdapterFactory::default();

        let err = factory.create(&controller("mqtt")).unwrap_err();
        assert_eq!(err.to_string(), "MQTT adapter not yet implemented for controller Rack A");

        let err = factory.create(&controller("websocket")).unwrap_err();
        assert_eq!(err.to_string(), "WebSocket adapter not yet implemented for controller Rack A");

        let err = factory.create(&controller("zigbee")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported communication type: zigbee for controller Rack A");

        assert!(factory.is_protocol_supported("http"));
        assert!(!factory.is_protocol_supported("mqtt"));
    }

    #[test]
    fn test_reregistering_keeps_order() {
        let factory = AdapterFactory::default()
            .with_serial_opener(Arc::new(TokioSerialOpener), SerialTimings::default());
        assert_eq!(factory.supported_protocols(), vec!["raw_serial", "http"]);
    }
}
