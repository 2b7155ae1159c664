//! Boundary traits for the adapter facility and connection handles
//!
//! The coordinator only talks to hardware through these traits. The btleplug
//! backend lives in [`crate::bluetooth::platform`]; tests provide fakes.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::bluetooth::device::{DeviceId, DiscoveryPayload};
use crate::error::{AdapterError, TransportError};

/// Stream of raw "device found" payloads
pub type DiscoveryStream = BoxStream<'static, DiscoveryPayload>;

/// A local Bluetooth adapter
///
/// Presence is modelled by the caller holding `Option<Arc<dyn BluetoothAdapter>>`;
/// an instance of this trait always refers to existing hardware.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BluetoothAdapter: Send + Sync {
    /// Whether the adapter is powered on
    async fn is_enabled(&self) -> bool;

    /// Start hardware discovery
    async fn start_discovery(&self) -> Result<(), AdapterError>;

    /// Stop hardware discovery
    async fn stop_discovery(&self) -> Result<(), AdapterError>;

    /// Whether hardware discovery is currently running
    fn is_discovering(&self) -> bool;

    /// Subscribe to "device found" payloads
    ///
    /// Payloads may be produced on any thread; the coordinator forwards them
    /// onto its own loop.
    async fn device_events(&self) -> Result<DiscoveryStream, AdapterError>;
}

/// A byte-stream connection endpoint on one peer device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionHandle: Send + Sync {
    /// Establish the connection; resolves once connected or failed
    async fn connect(&self) -> Result<(), TransportError>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;

    async fn is_connected(&self) -> bool;
}

/// Builds connection handles bound to a service identifier
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionFactory: Send + Sync {
    fn create_handle(
        &self,
        device: &DeviceId,
        service: Uuid,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError>;
}
