//! btleplug backend for the adapter and connection traits

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use uuid::Uuid;

use crate::bluetooth::adapter::{
    BluetoothAdapter, ConnectionFactory, ConnectionHandle, DiscoveryStream,
};
use crate::bluetooth::device::{DeviceId, DiscoveryPayload};
use crate::error::{AdapterError, TransportError};

type PeripheralCache = Arc<Mutex<HashMap<DeviceId, Peripheral>>>;

/// A btleplug adapter
///
/// Peripherals seen during discovery are remembered so that
/// [`ConnectionFactory::create_handle`] can resolve a [`DeviceId`] later.
#[derive(Clone)]
pub struct BtleAdapter {
    adapter: Adapter,
    discovering: Arc<AtomicBool>,
    peripherals: PeripheralCache,
}

impl BtleAdapter {
    /// Open the first adapter of the system, `None` when there is none
    pub async fn default_adapter() -> Result<Option<Self>, AdapterError> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;

        match adapters.into_iter().next() {
            Some(adapter) => {
                match adapter.adapter_info().await {
                    Ok(info) => info!("Using Bluetooth adapter {}", info),
                    Err(e) => debug!("Could not read adapter info: {}", e),
                }
                Ok(Some(Self::new(adapter)))
            }
            None => {
                warn!("No Bluetooth adapters found");
                Ok(None)
            }
        }
    }

    pub fn new(adapter: Adapter) -> Self {
        Self {
            adapter,
            discovering: Arc::new(AtomicBool::new(false)),
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl BluetoothAdapter for BtleAdapter {
    async fn is_enabled(&self) -> bool {
        match self.adapter.adapter_state().await {
            Ok(state) => state == CentralState::PoweredOn,
            Err(e) => {
                warn!("Could not read adapter state: {}", e);
                false
            }
        }
    }

    async fn start_discovery(&self) -> Result<(), AdapterError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        self.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), AdapterError> {
        self.discovering.store(false, Ordering::SeqCst);
        self.adapter.stop_scan().await?;
        Ok(())
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    async fn device_events(&self) -> Result<DiscoveryStream, AdapterError> {
        let events = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();

        let payloads = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let peripherals = peripherals.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        payload_for(&adapter, &peripherals, id).await
                    }
                    _ => None,
                }
            }
        });

        Ok(payloads.boxed())
    }
}

impl ConnectionFactory for BtleAdapter {
    fn create_handle(
        &self,
        device: &DeviceId,
        service: Uuid,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        let peripheral = self
            .peripherals
            .lock()
            .map_err(|_| TransportError::HandleUnavailable(device.to_string()))?
            .get(device)
            .cloned()
            .ok_or_else(|| TransportError::HandleUnavailable(device.to_string()))?;

        Ok(Arc::new(BtleLink {
            peripheral,
            service,
        }))
    }
}

/// Connection to one peripheral, bound to a service identifier
pub struct BtleLink {
    peripheral: Peripheral,
    service: Uuid,
}

#[async_trait]
impl ConnectionHandle for BtleLink {
    async fn connect(&self) -> Result<(), TransportError> {
        self.peripheral.connect().await?;
        self.peripheral.discover_services().await?;

        let advertised = self
            .peripheral
            .services()
            .iter()
            .any(|service| service.uuid == self.service);
        if !advertised {
            return Err(TransportError::ServiceNotFound(self.service));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        // A half-open link may still report disconnected; always tear it down
        close_result(self.peripheral.disconnect().await)
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }
}

/// A peripheral that is already gone counts as closed
fn close_result(result: Result<(), btleplug::Error>) -> Result<(), TransportError> {
    match result {
        Ok(()) | Err(btleplug::Error::NotConnected) => Ok(()),
        Err(e) => Err(TransportError::CloseFailed(e.to_string())),
    }
}

async fn payload_for(
    adapter: &Adapter,
    peripherals: &PeripheralCache,
    id: PeripheralId,
) -> Option<DiscoveryPayload> {
    let peripheral = match adapter.peripheral(&id).await {
        Ok(peripheral) => peripheral,
        Err(e) => {
            debug!("Peripheral {:?} vanished: {}", id, e);
            return None;
        }
    };
    let device = DeviceId::new(format!("{:?}", id));

    let properties = match peripheral.properties().await {
        Ok(properties) => properties,
        Err(e) => {
            debug!("No properties for {}: {}", device, e);
            None
        }
    };

    if let Ok(mut cache) = peripherals.lock() {
        cache.insert(device.clone(), peripheral);
    }

    let mut payload = DiscoveryPayload {
        device: Some(device),
        ..DiscoveryPayload::default()
    };
    if let Some(properties) = properties {
        payload.name = properties.local_name;
        payload.address = Some(properties.address)
            .filter(|address| *address != BDAddr::default())
            .map(|address| address.to_string());
        payload.class = properties.class;
        payload.rssi = properties.rssi;
    }
    Some(payload)
}
