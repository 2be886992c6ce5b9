//! Unified error handling for hydroponics hardware services
//!
//! Service crates keep their own domain errors (for example `HwError` in
//! hwsrv) and convert into [`HydroError`] at the process boundary, where the
//! binaries report startup and shutdown failures.

use thiserror::Error;

// ============================================================================
// HydroError - Main error type
// ============================================================================

/// Main error type for all hydroponics services
#[derive(Debug, Error)]
pub enum HydroError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Hardware & Communication Errors
    // ======================================
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    // ======================================
    // Resource Errors
    // ======================================
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Repository error: {0}")]
    Repository(String),

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // ======================================
    // External Service Errors
    // ======================================
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Result alias used by service binaries
pub type HydroResult<T> = Result<T, HydroError>;

impl HydroError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::MissingConfig(_)
            | Self::Deserialization(_) => 78, // EX_CONFIG
            Self::Io(_) => 74, // EX_IOERR
            Self::ConnectionFailed { .. } | Self::Communication(_) | Self::Timeout(_) => 69, // EX_UNAVAILABLE
            _ => 1,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ConnectionFailed { .. }
                | Self::Communication(_)
                | Self::HttpClient(_)
        )
    }
}

// Conversion traits for common error types
impl From<serde_json::Error> for HydroError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for HydroError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Deserialization(err.to_string())
    }
}

// Helper macros for creating errors
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::HydroError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::HydroError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($protocol:expr, $msg:expr) => {
        $crate::HydroError::Protocol {
            protocol: $protocol.to_string(),
            message: $msg.to_string(),
        }
    };
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(HydroError::Configuration("bad".into()).exit_code(), 78);
        assert_eq!(
            HydroError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")).exit_code(),
            74
        );
        assert_eq!(HydroError::Timeout("ctrl-1".into()).exit_code(), 69);
        assert_eq!(HydroError::Internal("boom".into()).exit_code(), 1);
    }

    #[test]
    fn test_error_retryable() {
        assert!(HydroError::Timeout("ctrl-1".into()).is_retryable());
        assert!(HydroError::ConnectionFailed {
            endpoint: "/dev/ttyUSB0".into(),
            reason: "busy".into()
        }
        .is_retryable());
        assert!(!HydroError::MissingConfig("inventory.path".into()).is_retryable());
    }

    #[test]
    fn test_macros_and_conversions() {
        let err = config_error!("missing {}", "port");
        assert_eq!(err.to_string(), "Configuration error: missing port");

        let err = protocol_error!("raw_serial", "garbled line");
        assert_eq!(err.to_string(), "Protocol error: raw_serial: garbled line");

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(
            HydroError::from(json_err),
            HydroError::Serialization(_)
        ));
    }
}
