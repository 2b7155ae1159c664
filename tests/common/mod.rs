//! In-memory adapter and connection fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use bluelink::bluetooth::{
    BluetoothAdapter, ConnectionFactory, ConnectionHandle, DeviceId, DiscoveryPayload,
    DiscoveryStream,
};
use bluelink::error::{AdapterError, TransportError};
use bluelink::{ConnectionCoordinator, CoordinatorConfig, CoordinatorHandle};

/// Adapter whose payloads are pushed by the test
pub struct FakeAdapter {
    enabled: AtomicBool,
    discovering: AtomicBool,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    sender: mpsc::UnboundedSender<DiscoveryPayload>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<DiscoveryPayload>>>,
}

impl FakeAdapter {
    pub fn new(enabled: bool) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            enabled: AtomicBool::new(enabled),
            discovering: AtomicBool::new(false),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            sender,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    /// Report a "device found" payload
    pub fn emit(&self, payload: DiscoveryPayload) {
        self.sender.send(payload).expect("event stream dropped");
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BluetoothAdapter for FakeAdapter {
    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    async fn start_discovery(&self) -> Result<(), AdapterError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.discovering.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), AdapterError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.discovering.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    async fn device_events(&self) -> Result<DiscoveryStream, AdapterError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AdapterError::Api("already subscribed".to_string()))?;
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

/// How a fake link answers `connect`
#[derive(Debug, Clone)]
pub enum ConnectBehavior {
    Succeed,
    Fail(TransportError),
    /// Never completes; only cancellation or a timeout ends it
    Hang,
}

pub struct FakeLink {
    behavior: ConnectBehavior,
    connected: AtomicBool,
    closes: AtomicUsize,
}

impl FakeLink {
    pub fn new(behavior: ConnectBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            connected: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        })
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandle for FakeLink {
    async fn connect(&self) -> Result<(), TransportError> {
        match &self.behavior {
            ConnectBehavior::Succeed => {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Fail(e) => Err(e.clone()),
            ConnectBehavior::Hang => {
                futures::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Hands out registered links; unknown devices fail to construct
#[derive(Default)]
pub struct FakeFactory {
    links: Mutex<HashMap<DeviceId, Arc<FakeLink>>>,
    requests: Mutex<Vec<(DeviceId, Uuid)>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, device: &str, link: Arc<FakeLink>) {
        self.links.lock().unwrap().insert(DeviceId::new(device), link);
    }

    pub fn requests(&self) -> Vec<(DeviceId, Uuid)> {
        self.requests.lock().unwrap().clone()
    }
}

impl ConnectionFactory for FakeFactory {
    fn create_handle(
        &self,
        device: &DeviceId,
        service: Uuid,
    ) -> Result<Arc<dyn ConnectionHandle>, TransportError> {
        self.requests.lock().unwrap().push((device.clone(), service));
        match self.links.lock().unwrap().get(device) {
            Some(link) => Ok(link.clone()),
            None => Err(TransportError::HandleUnavailable(device.to_string())),
        }
    }
}

/// Start a coordinator over the given fakes
pub fn start_coordinator(
    adapter: Option<Arc<FakeAdapter>>,
    factory: Arc<FakeFactory>,
    config: CoordinatorConfig,
) -> CoordinatorHandle {
    let adapter = adapter.map(|adapter| adapter as Arc<dyn BluetoothAdapter>);
    ConnectionCoordinator::new(adapter, factory, config).spawn()
}

pub fn payload(
    device: &str,
    name: Option<&str>,
    address: Option<&str>,
    rssi: i16,
) -> DiscoveryPayload {
    DiscoveryPayload {
        device: Some(DeviceId::new(device)),
        name: name.map(str::to_string),
        address: address.map(str::to_string),
        class: Some(0x5a020c),
        rssi: Some(rssi),
    }
}

/// Let spawned tasks run until the coordinator is idle
pub async fn settle(handle: &CoordinatorHandle) {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    handle.status().await.expect("coordinator stopped");
}
