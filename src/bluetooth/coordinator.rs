//! The connection coordinator
//!
//! A single task owns the discovery state and the connection sessions. Caller
//! commands, adapter payloads, idle timer expiries and session outcomes all
//! arrive on one channel and are handled strictly in arrival order, so every
//! listener observes a total order of events.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::bluetooth::adapter::{BluetoothAdapter, ConnectionFactory};
use crate::bluetooth::connection::{ConnectionSession, SessionPhase};
use crate::bluetooth::coordinator_config::CoordinatorConfig;
use crate::bluetooth::device::DeviceId;
use crate::bluetooth::discovery::DiscoverySession;
use crate::bluetooth::events::{
    ConnectionSubscription, CoordinatorMessage, ScanEvent, ScanSubscription, Scheduler,
    SessionId, SessionOutcome, SubscriberId,
};
use crate::error::BluetoothError;

/// Snapshot of coordinator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// Whether hardware discovery is running
    pub discovering: bool,
    /// Number of registered scan listeners
    pub scan_listeners: usize,
    /// Current session and its phase, if any
    pub current_session: Option<(SessionId, SessionPhase)>,
    /// Sessions cancelled but not yet torn down
    pub retiring_sessions: usize,
}

/// Discovers devices and manages one exclusive outbound connection
pub struct ConnectionCoordinator {
    adapter: Option<Arc<dyn BluetoothAdapter>>,
    factory: Arc<dyn ConnectionFactory>,
    config: CoordinatorConfig,
}

impl ConnectionCoordinator {
    /// Create a coordinator; pass `None` when the platform has no adapter
    pub fn new(
        adapter: Option<Arc<dyn BluetoothAdapter>>,
        factory: Arc<dyn ConnectionFactory>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            adapter,
            factory,
            config,
        }
    }

    /// Start the coordination loop on the current tokio runtime
    pub fn spawn(self) -> CoordinatorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Scheduler::new(&tx);
        let supported = self.adapter.is_some();

        let state = CoordinatorLoop {
            discovery: DiscoverySession::new(
                self.adapter,
                scheduler.clone(),
                self.config.idle_timeout,
            ),
            factory: self.factory,
            config: self.config,
            scheduler,
            current: None,
            retiring: HashMap::new(),
            next_session_id: 1,
            pump: None,
        };
        tokio::spawn(state.run(rx));

        CoordinatorHandle { tx, supported }
    }
}

/// Cloneable entry point to a running coordinator
///
/// The coordinator runs while at least one handle exists. Dropping the last
/// handle tears it down like [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
    supported: bool,
}

impl CoordinatorHandle {
    /// Whether the platform has a Bluetooth adapter at all
    pub fn is_bluetooth_supported(&self) -> bool {
        self.supported
    }

    /// Register for discovery events and make sure discovery is running
    ///
    /// Capability problems are delivered as the subscription's only event,
    /// [`ScanEvent::Error`]. An `Err` means the coordinator has stopped.
    pub async fn scan_for_devices(&self) -> Result<ScanSubscription, BluetoothError> {
        self.request(|reply| CoordinatorMessage::Scan { reply }).await
    }

    /// Halt discovery, supersede any previous attempt and connect to `device`
    pub async fn connect_to_device(
        &self,
        device: DeviceId,
    ) -> Result<ConnectionSubscription, BluetoothError> {
        self.request(|reply| CoordinatorMessage::Connect { device, reply })
            .await
    }

    /// Cancel the current connection, if any
    pub async fn disconnect_from_current_device(&self) -> Result<(), BluetoothError> {
        self.request(|reply| CoordinatorMessage::Disconnect { reply })
            .await
    }

    /// Remove a scan listener
    pub fn unsubscribe(&self, id: SubscriberId) -> Result<(), BluetoothError> {
        self.tx
            .send(CoordinatorMessage::Unsubscribe { id })
            .map_err(|_| BluetoothError::CoordinatorStopped)
    }

    pub async fn status(&self) -> Result<CoordinatorStatus, BluetoothError> {
        self.request(|reply| CoordinatorMessage::Status { reply }).await
    }

    /// Stop discovery, cancel sessions and end the loop
    ///
    /// Listeners of live sessions see their channel close.
    pub async fn shutdown(&self) -> Result<(), BluetoothError> {
        self.request(|reply| CoordinatorMessage::Shutdown { reply })
            .await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, BluetoothError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(message(reply))
            .map_err(|_| BluetoothError::CoordinatorStopped)?;
        response.await.map_err(|_| BluetoothError::CoordinatorStopped)
    }
}

/// State owned by the coordination task
struct CoordinatorLoop {
    discovery: DiscoverySession,
    factory: Arc<dyn ConnectionFactory>,
    config: CoordinatorConfig,
    scheduler: Scheduler,
    current: Option<ConnectionSession>,
    /// Cancelled sessions waiting for their final outcome
    retiring: HashMap<SessionId, ConnectionSession>,
    next_session_id: SessionId,
    pump: Option<JoinHandle<()>>,
}

impl CoordinatorLoop {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<CoordinatorMessage>) {
        self.start_event_pump().await;
        info!("Connection coordinator started");

        let mut stopped = false;
        while let Some(message) = rx.recv().await {
            match message {
                CoordinatorMessage::Shutdown { reply } => {
                    rx.close();
                    self.shutdown().await;
                    let _ = reply.send(());
                    stopped = true;
                    break;
                }
                CoordinatorMessage::Scan { reply } => {
                    let subscription = self.scan().await;
                    let _ = reply.send(subscription);
                }
                CoordinatorMessage::Unsubscribe { id } => {
                    self.discovery.unsubscribe(id);
                }
                CoordinatorMessage::Connect { device, reply } => {
                    let subscription = self.connect(device).await;
                    let _ = reply.send(subscription);
                }
                CoordinatorMessage::Disconnect { reply } => {
                    self.retire_current();
                    let _ = reply.send(());
                }
                CoordinatorMessage::Status { reply } => {
                    let _ = reply.send(self.status());
                }
                CoordinatorMessage::DeviceFound(payload) => {
                    self.discovery.dispatch(payload);
                }
                CoordinatorMessage::DiscoveryIdle { generation } => {
                    self.discovery.on_idle_expired(generation).await;
                }
                CoordinatorMessage::Session { id, outcome } => {
                    self.session_outcome(id, outcome);
                }
            }
        }

        if !stopped {
            debug!("Every coordinator handle was dropped");
            self.shutdown().await;
        }
        info!("Connection coordinator stopped");
    }

    /// Forward adapter payloads onto the coordination channel
    async fn start_event_pump(&mut self) {
        let adapter = match self.discovery.adapter() {
            Some(adapter) => adapter.clone(),
            None => {
                warn!("No Bluetooth adapter present, discovery is unavailable");
                return;
            }
        };

        let mut events = match adapter.device_events().await {
            Ok(events) => events,
            Err(e) => {
                error!("Could not subscribe to adapter events: {}", e);
                return;
            }
        };

        let scheduler = self.scheduler.clone();
        self.pump = Some(tokio::spawn(async move {
            while let Some(payload) = events.next().await {
                if !scheduler.post(CoordinatorMessage::DeviceFound(payload)) {
                    break;
                }
            }
            debug!("Adapter event stream ended");
        }));
    }

    async fn scan(&mut self) -> ScanSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.discovery.start_scan(tx.clone()).await {
            Ok(id) => ScanSubscription::new(id, rx, self.scheduler.clone()),
            Err(e) => {
                warn!("Scan request rejected: {} ({})", e, e.code());
                let _ = tx.send(ScanEvent::Error(e));
                ScanSubscription::new(0, rx, self.scheduler.clone())
            }
        }
    }

    async fn connect(&mut self, device: DeviceId) -> ConnectionSubscription {
        self.discovery.stop_for_connection().await;
        self.retire_current();

        let id = self.next_session_id;
        self.next_session_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = ConnectionSession::new(
            id,
            device,
            self.factory.as_ref(),
            self.config.service_uuid,
            tx,
            self.config.connect_timeout,
        );
        session.run(&self.scheduler);
        self.current = Some(session);

        ConnectionSubscription::new(id, rx)
    }

    /// Cancel the current session and keep it until its outcome arrives
    fn retire_current(&mut self) {
        if let Some(mut session) = self.current.take() {
            if session.cancel(&self.scheduler) {
                self.retiring.insert(session.id(), session);
            } else {
                debug!("Session {} already {}, nothing to cancel", session.id(), session.phase());
            }
        }
    }

    fn session_outcome(&mut self, id: SessionId, outcome: SessionOutcome) {
        if let Some(session) = self.current.as_mut().filter(|session| session.id() == id) {
            session.apply(outcome);
            if session.is_finished() {
                self.current = None;
            }
            return;
        }

        if let Some(session) = self.retiring.get_mut(&id) {
            session.apply(outcome);
            if session.is_finished() {
                debug!("Session {} to {} torn down", id, session.target());
                self.retiring.remove(&id);
            }
            return;
        }

        debug!("Outcome for unknown session {}: {:?}", id, outcome);
    }

    fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            discovering: self.discovery.is_discovering(),
            scan_listeners: self.discovery.listener_count(),
            current_session: self
                .current
                .as_ref()
                .map(|session| (session.id(), session.phase())),
            retiring_sessions: self.retiring.len(),
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down connection coordinator");
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.discovery.shutdown().await;
        self.retire_current();
    }
}

impl Drop for CoordinatorLoop {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}
