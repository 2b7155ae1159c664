//! Events delivered to callers and messages processed by the coordination loop

use std::time::Duration;

use futures::Stream;
use log::debug;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::bluetooth::coordinator::CoordinatorStatus;
use crate::bluetooth::device::{DeviceId, DeviceRecord, DiscoveryPayload};
use crate::error::{ScanError, TransportError};

/// Subscriber ID type
pub type SubscriberId = u32;

/// Connection session ID type
pub type SessionId = u32;

/// Event delivered to a scan subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A device was found (or found again with a new signal reading)
    DeviceDiscovered(DeviceRecord),
    /// The scan could not be started; no further events follow
    Error(ScanError),
    /// The idle window elapsed and this subscription was unregistered
    ScanCompleted,
}

impl ScanEvent {
    /// Get the device record from this event, if available
    pub fn device(&self) -> Option<&DeviceRecord> {
        match self {
            Self::DeviceDiscovered(record) => Some(record),
            _ => None,
        }
    }
}

/// Event delivered to the listener of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The connection was established
    ConnectionSuccessful,
    /// The attempt failed; the handle has been released
    ConnectionError(TransportError),
    /// The session was torn down by the caller
    ConnectionEnded,
}

/// Outcome posted by a connection task back to the coordination loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    Connected,
    Failed(TransportError),
    Closed,
}

/// Everything the coordination loop processes, in arrival order
pub(crate) enum CoordinatorMessage {
    Scan {
        reply: oneshot::Sender<ScanSubscription>,
    },
    Unsubscribe {
        id: SubscriberId,
    },
    Connect {
        device: DeviceId,
        reply: oneshot::Sender<ConnectionSubscription>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<CoordinatorStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    DeviceFound(DiscoveryPayload),
    DiscoveryIdle {
        generation: u64,
    },
    Session {
        id: SessionId,
        outcome: SessionOutcome,
    },
}

/// Posts work items onto the coordination loop
///
/// Posting never blocks; items are processed in the order they were posted.
/// A scheduler does not keep the loop alive: once every [`CoordinatorHandle`]
/// is gone, posts fail and the loop winds down.
///
/// [`CoordinatorHandle`]: crate::bluetooth::CoordinatorHandle
#[derive(Clone)]
pub(crate) struct Scheduler {
    tx: mpsc::WeakUnboundedSender<CoordinatorMessage>,
}

impl Scheduler {
    pub(crate) fn new(tx: &mpsc::UnboundedSender<CoordinatorMessage>) -> Self {
        Self { tx: tx.downgrade() }
    }

    /// Post a message; returns false once the loop has stopped
    pub(crate) fn post(&self, message: CoordinatorMessage) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Post a message after `delay`. Abort the returned task to cancel.
    pub(crate) fn post_after(
        &self,
        delay: Duration,
        message: CoordinatorMessage,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !scheduler.post(message) {
                debug!("Coordinator stopped before delayed message was delivered");
            }
        })
    }
}

/// Subscription handle returned by a scan request
pub struct ScanSubscription {
    id: SubscriberId,
    events: mpsc::UnboundedReceiver<ScanEvent>,
    control: Scheduler,
}

impl ScanSubscription {
    pub(crate) fn new(
        id: SubscriberId,
        events: mpsc::UnboundedReceiver<ScanEvent>,
        control: Scheduler,
    ) -> Self {
        Self { id, events, control }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event; `None` once the subscription is closed
    pub async fn next_event(&mut self) -> Option<ScanEvent> {
        self.events.recv().await
    }

    /// Non-blocking poll for an already delivered event
    pub fn try_next_event(&mut self) -> Option<ScanEvent> {
        self.events.try_recv().ok()
    }

    /// Stop receiving discovery events
    pub fn unsubscribe(self) {
        self.control.post(CoordinatorMessage::Unsubscribe { id: self.id });
    }

    pub fn into_stream(self) -> impl Stream<Item = ScanEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}

/// Subscription handle returned by a connect request
pub struct ConnectionSubscription {
    session: SessionId,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl ConnectionSubscription {
    pub(crate) fn new(
        session: SessionId,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) -> Self {
        Self { session, events }
    }

    pub fn session_id(&self) -> SessionId {
        self.session
    }

    /// Wait for the next event; `None` once the session is gone
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    pub fn try_next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = ConnectionEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}
