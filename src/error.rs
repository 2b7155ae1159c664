//! Error types for bluelink

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Capability errors reported to a scan listener instead of being returned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    /// No Bluetooth adapter is present on this machine
    #[error("Bluetooth is not supported on this device")]
    Unsupported,

    /// The adapter exists but is powered off
    #[error("Bluetooth is disabled")]
    Disabled,

    /// The adapter refused to start discovery
    #[error("Failed to start discovery: {0}")]
    DiscoveryFailed(String),
}

impl ScanError {
    /// Stable error code for presentation layers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unsupported => "ERROR_BT_UNSUPPORTED",
            Self::Disabled => "ERROR_BT_DISABLED",
            Self::DiscoveryFailed(_) => "ERROR_BT_DISCOVERY",
        }
    }
}

/// Failures of a single connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection handle could not be built for the target device
    #[error("Connection handle unavailable: {0}")]
    HandleUnavailable(String),

    /// The connect call failed
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The peer does not expose the expected service
    #[error("Service {0} not found on device")]
    ServiceNotFound(Uuid),

    /// The connect call did not finish in time
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// Releasing the connection handle failed
    #[error("Failed to close connection: {0}")]
    CloseFailed(String),
}

/// Adapter control failures (start/stop discovery, event stream)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("Bluetooth API error: {0}")]
    Api(String),

    #[error("Adapter not available: {0}")]
    NotAvailable(String),
}

impl From<btleplug::Error> for AdapterError {
    fn from(error: btleplug::Error) -> Self {
        match error {
            btleplug::Error::PermissionDenied => {
                AdapterError::NotAvailable("permission denied".to_string())
            }
            other => AdapterError::Api(other.to_string()),
        }
    }
}

impl From<btleplug::Error> for TransportError {
    fn from(error: btleplug::Error) -> Self {
        match error {
            btleplug::Error::DeviceNotFound => {
                TransportError::HandleUnavailable("device not found".to_string())
            }
            btleplug::Error::TimedOut(duration) => TransportError::Timeout(duration),
            other => TransportError::ConnectFailed(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Validation { field: String, reason: String },
}

/// Crate-level error type
#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The coordination loop has shut down and no longer accepts requests
    #[error("Connection coordinator has stopped")]
    CoordinatorStopped,
}

impl From<btleplug::Error> for BluetoothError {
    fn from(error: btleplug::Error) -> Self {
        BluetoothError::Adapter(error.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BluetoothError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_codes() {
        assert_eq!(ScanError::Unsupported.code(), "ERROR_BT_UNSUPPORTED");
        assert_eq!(ScanError::Disabled.code(), "ERROR_BT_DISABLED");
        assert_eq!(
            ScanError::DiscoveryFailed("busy".to_string()).code(),
            "ERROR_BT_DISCOVERY"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectFailed("read failed, socket might closed".to_string());
        assert_eq!(
            err.to_string(),
            "Connection failed: read failed, socket might closed"
        );

        let err = TransportError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Connection timed out after 3s");
    }

    #[test]
    fn test_bluetooth_error_conversion() {
        let err: BluetoothError = ScanError::Disabled.into();
        assert!(matches!(err, BluetoothError::Scan(ScanError::Disabled)));

        let err: BluetoothError = btleplug::Error::PermissionDenied.into();
        match err {
            BluetoothError::Adapter(AdapterError::NotAvailable(_)) => { /* Success */ }
            other => panic!("Wrong error type, expected NotAvailable, got {:?}", other),
        }
    }
}
