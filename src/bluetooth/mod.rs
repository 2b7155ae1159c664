//! Device discovery and connection management

pub mod adapter;
mod connection;
mod coordinator;
mod coordinator_config;
pub mod device;
mod discovery;
pub mod events;
pub mod platform;

pub use adapter::{BluetoothAdapter, ConnectionFactory, ConnectionHandle, DiscoveryStream};

pub use connection::SessionPhase;

pub use coordinator::{ConnectionCoordinator, CoordinatorHandle, CoordinatorStatus};

pub use coordinator_config::{
    CoordinatorConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, SERVICE_UUID,
};

pub use device::{DeviceId, DeviceRecord, DiscoveryPayload, RSSI_UNKNOWN, UNKNOWN_DEVICE_TITLE};

pub use events::{
    ConnectionEvent, ConnectionSubscription, ScanEvent, ScanSubscription, SessionId, SubscriberId,
};

pub use platform::{BtleAdapter, BtleLink};
