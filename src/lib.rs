//! Bluetooth device discovery and exclusive connection coordination

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod logging;

// Re-exports for convenience
pub use bluetooth::{
    ConnectionCoordinator, ConnectionEvent, CoordinatorConfig, CoordinatorHandle, DeviceId,
    DeviceRecord, ScanEvent,
};
pub use config::AppConfig;
pub use error::{BluetoothError, Result};
pub use logging::configure_logging;
