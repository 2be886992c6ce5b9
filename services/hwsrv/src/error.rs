//! Error handling for the hardware communication service
//!
//! Adapters never surface these to callers of `send_command`; the engine turns
//! every `HwError` into a `Response { ok: 0, error }` at its boundary. The
//! Display strings are therefore part of the wire-visible contract.

use errors::HydroError;
use thiserror::Error;

/// Hardware Service Error Type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HwError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Adapter open or handshake failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// No live adapter for the controller
    #[error("Controller {0} is not connected")]
    NotConnected(String),

    /// Unparseable or malformed wire response
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// No response within budget
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Declared-but-unimplemented or unknown communication type
    #[error("{0}")]
    UnsupportedProtocol(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device template not found for type: {0}")]
    TemplateNotFound(String),

    #[error("Unknown execution strategy: {0}")]
    UnknownStrategy(String),

    #[error("Invalid port format: {0}")]
    InvalidPort(String),

    #[error("Command building failed: {0}")]
    CommandBuild(String),

    /// Always non-fatal for reads; carried into the response data
    #[error("Conversion error: {0}")]
    ConversionError(String),

    /// Device/controller/template store failures
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// Strategy-level failures whose message is already user-facing
    #[error("{0}")]
    ExecutionError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization and parsing errors
    #[error("Data error: {0}")]
    DataError(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Result type alias for the hardware service
pub type Result<T> = std::result::Result<T, HwError>;

impl HwError {
    pub fn config(msg: impl Into<String>) -> Self {
        HwError::ConfigError(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        HwError::ConnectionError(msg.into())
    }

    pub fn not_connected(controller_id: impl Into<String>) -> Self {
        HwError::NotConnected(controller_id.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        HwError::ProtocolError(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        HwError::TimeoutError(msg.into())
    }

    pub fn repository(msg: impl Into<String>) -> Self {
        HwError::RepositoryError(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        HwError::ExecutionError(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        HwError::DataError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        HwError::InternalError(msg.into())
    }

    /// Failures at or below the adapter boundary
    pub fn is_hardware(&self) -> bool {
        matches!(
            self,
            HwError::ConnectionError(_)
                | HwError::NotConnected(_)
                | HwError::ProtocolError(_)
                | HwError::TimeoutError(_)
                | HwError::IoError(_)
        )
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for HwError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            HwError::TimeoutError(err.to_string())
        } else {
            HwError::IoError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for HwError {
    fn from(err: serde_json::Error) -> Self {
        HwError::DataError(err.to_string())
    }
}

impl From<tokio_serial::Error> for HwError {
    fn from(err: tokio_serial::Error) -> Self {
        HwError::ConnectionError(err.to_string())
    }
}

impl From<reqwest::Error> for HwError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HwError::TimeoutError(err.to_string())
        } else if err.is_connect() {
            HwError::ConnectionError(err.to_string())
        } else if err.is_decode() {
            HwError::ProtocolError(err.to_string())
        } else {
            HwError::IoError(err.to_string())
        }
    }
}

impl From<figment::Error> for HwError {
    fn from(err: figment::Error) -> Self {
        HwError::ConfigError(err.to_string())
    }
}

impl From<HwError> for HydroError {
    fn from(err: HwError) -> Self {
        match err {
            HwError::ConfigError(msg) => HydroError::Configuration(msg),
            HwError::ConnectionError(msg) => HydroError::Communication(msg),
            HwError::TimeoutError(msg) => HydroError::Timeout(msg),
            HwError::ProtocolError(msg) => HydroError::Protocol {
                protocol: "controller".to_string(),
                message: msg,
            },
            HwError::RepositoryError(msg) => HydroError::Repository(msg),
            HwError::DeviceNotFound(id) => HydroError::NotFound {
                resource: format!("device {}", id),
            },
            HwError::DataError(msg) => HydroError::Deserialization(msg),
            other => HydroError::Runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages_are_user_facing() {
        assert_eq!(
            HwError::DeviceNotFound("dev-1".into()).to_string(),
            "Device not found: dev-1"
        );
        assert_eq!(
            HwError::TemplateNotFound("HC-SR04".into()).to_string(),
            "Device template not found for type: HC-SR04"
        );
        assert_eq!(
            HwError::UnknownStrategy("burst".into()).to_string(),
            "Unknown execution strategy: burst"
        );
        assert_eq!(
            HwError::not_connected("ctrl-1").to_string(),
            "Controller ctrl-1 is not connected"
        );
        assert_eq!(
            HwError::CommandBuild("no ports".into()).to_string(),
            "Command building failed: no ports"
        );
    }

    #[test]
    fn test_hardware_classification() {
        assert!(HwError::timeout("5s").is_hardware());
        assert!(HwError::not_connected("c").is_hardware());
        assert!(!HwError::DeviceNotFound("d".into()).is_hardware());
    }

    #[test]
    fn test_into_hydro_error() {
        let err: HydroError = HwError::config("inventory missing").into();
        assert!(matches!(err, HydroError::Configuration(_)));

        let err: HydroError = HwError::UnknownStrategy("x".into()).into();
        assert_eq!(err.to_string(), "Runtime error: Unknown execution strategy: x");
    }
}
