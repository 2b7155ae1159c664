//! A single outbound connection attempt
//!
//! The connect call runs on its own task and never touches coordinator state;
//! it reports through [`Scheduler`] and the coordination loop applies the
//! outcome with [`ConnectionSession::apply`]. Phases:
//!
//! ```text
//! Created -> Connecting -> Connected | Failed
//! Connecting | Connected -> Closed   (cancel)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc::UnboundedSender, oneshot};
use uuid::Uuid;

use crate::bluetooth::adapter::{ConnectionFactory, ConnectionHandle};
use crate::bluetooth::device::DeviceId;
use crate::bluetooth::events::{
    ConnectionEvent, CoordinatorMessage, Scheduler, SessionId, SessionOutcome,
};
use crate::error::TransportError;
use crate::logging::PerformanceLogger;

/// Lifecycle phase of a connection session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl SessionPhase {
    /// Whether the session still holds, or may still acquire, a connection
    pub fn is_live(self) -> bool {
        matches!(self, Self::Created | Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub(crate) struct ConnectionSession {
    id: SessionId,
    target: DeviceId,
    handle: Option<Arc<dyn ConnectionHandle>>,
    construction_error: Option<TransportError>,
    listener: UnboundedSender<ConnectionEvent>,
    phase: SessionPhase,
    cancel_requested: bool,
    cancel_tx: Option<oneshot::Sender<()>>,
    connect_timeout: Option<Duration>,
}

impl ConnectionSession {
    /// Resolve a connection handle for `target`
    ///
    /// A construction failure is logged and leaves the session without a
    /// handle; [`run`](Self::run) then fails immediately.
    pub(crate) fn new(
        id: SessionId,
        target: DeviceId,
        factory: &dyn ConnectionFactory,
        service: Uuid,
        listener: UnboundedSender<ConnectionEvent>,
        connect_timeout: Option<Duration>,
    ) -> Self {
        let (handle, construction_error) = match factory.create_handle(&target, service) {
            Ok(handle) => (Some(handle), None),
            Err(e) => {
                error!("Could not create connection handle for {}: {}", target, e);
                (None, Some(e))
            }
        };

        Self {
            id,
            target,
            handle,
            construction_error,
            listener,
            phase: SessionPhase::Created,
            cancel_requested: false,
            cancel_tx: None,
            connect_timeout,
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub(crate) fn target(&self) -> &DeviceId {
        &self.target
    }

    /// Whether the session has delivered its last event
    pub(crate) fn is_finished(&self) -> bool {
        matches!(self.phase, SessionPhase::Failed | SessionPhase::Closed)
    }

    /// Start the attempt on a background task
    pub(crate) fn run(&mut self, scheduler: &Scheduler) {
        if self.phase != SessionPhase::Created {
            warn!("Session {} already started ({})", self.id, self.phase);
            return;
        }
        self.phase = SessionPhase::Connecting;

        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => {
                let error = self.construction_error.take().unwrap_or_else(|| {
                    TransportError::HandleUnavailable(self.target.to_string())
                });
                scheduler.post(CoordinatorMessage::Session {
                    id: self.id,
                    outcome: SessionOutcome::Failed(error),
                });
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel_tx = Some(cancel_tx);

        info!("Connecting to {} (session {})", self.target, self.id);
        tokio::spawn(drive_connection(
            self.id,
            self.target.clone(),
            handle,
            cancel_rx,
            scheduler.clone(),
            self.connect_timeout,
        ));
    }

    /// Ask the background task to release the connection
    ///
    /// Returns whether a [`ConnectionEvent::ConnectionEnded`] will be delivered.
    /// A session that already failed or closed is left alone.
    pub(crate) fn cancel(&mut self, scheduler: &Scheduler) -> bool {
        if !self.phase.is_live() || self.cancel_requested {
            debug!("Session {} not cancellable ({})", self.id, self.phase);
            return false;
        }
        self.cancel_requested = true;
        info!("Cancelling session {} to {} ({})", self.id, self.target, self.phase);

        match self.cancel_tx.take() {
            // A send error means the task already exited; its final outcome
            // is queued and will be reported as ended.
            Some(cancel_tx) => {
                let _ = cancel_tx.send(());
            }
            None => {
                // Never ran: nothing to release, report the teardown directly
                scheduler.post(CoordinatorMessage::Session {
                    id: self.id,
                    outcome: SessionOutcome::Closed,
                });
            }
        }
        true
    }

    /// Apply an outcome posted by the task and deliver the matching event
    pub(crate) fn apply(&mut self, outcome: SessionOutcome) -> Option<ConnectionEvent> {
        if self.is_finished() {
            debug!("Session {} already {}, ignoring {:?}", self.id, self.phase, outcome);
            return None;
        }

        let event = match (outcome, self.cancel_requested) {
            (SessionOutcome::Connected, false) => {
                self.phase = SessionPhase::Connected;
                info!("Connected to {} (session {})", self.target, self.id);
                Some(ConnectionEvent::ConnectionSuccessful)
            }
            (SessionOutcome::Connected, true) => {
                // Connected just as the caller cancelled; the task is closing it
                self.phase = SessionPhase::Connected;
                None
            }
            (SessionOutcome::Failed(e), false) => {
                self.phase = SessionPhase::Failed;
                warn!("Connection to {} failed: {}", self.target, e);
                Some(ConnectionEvent::ConnectionError(e))
            }
            (SessionOutcome::Failed(_), true) | (SessionOutcome::Closed, _) => {
                self.phase = SessionPhase::Closed;
                info!("Session {} to {} ended", self.id, self.target);
                Some(ConnectionEvent::ConnectionEnded)
            }
        };

        if let Some(event) = &event {
            if self.listener.send(event.clone()).is_err() {
                debug!("Listener for session {} is gone", self.id);
            }
        }
        event
    }
}

/// Background side of a session: connect, then hold until cancelled
async fn drive_connection(
    id: SessionId,
    target: DeviceId,
    handle: Arc<dyn ConnectionHandle>,
    mut cancel_rx: oneshot::Receiver<()>,
    scheduler: Scheduler,
    connect_timeout: Option<Duration>,
) {
    let perf = PerformanceLogger::new("ConnectionSession", "connect");

    let attempt = tokio::select! {
        biased;
        _ = &mut cancel_rx => None,
        result = connect_with_timeout(handle.as_ref(), connect_timeout) => Some(result),
    };

    let outcome = match attempt {
        None => {
            perf.finish_with_context("cancelled");
            release(handle.as_ref(), &target).await;
            SessionOutcome::Closed
        }
        Some(Err(e)) => {
            perf.finish_with_context("failed");
            release(handle.as_ref(), &target).await;
            SessionOutcome::Failed(e)
        }
        Some(Ok(())) => {
            perf.finish();
            scheduler.post(CoordinatorMessage::Session {
                id,
                outcome: SessionOutcome::Connected,
            });

            // Resolves on cancel, or with an error when the session is dropped
            let _ = cancel_rx.await;
            release(handle.as_ref(), &target).await;
            SessionOutcome::Closed
        }
    };

    scheduler.post(CoordinatorMessage::Session { id, outcome });
}

async fn connect_with_timeout(
    handle: &dyn ConnectionHandle,
    connect_timeout: Option<Duration>,
) -> Result<(), TransportError> {
    match connect_timeout {
        Some(limit) => match tokio::time::timeout(limit, handle.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        },
        None => handle.connect().await,
    }
}

/// Close the handle, logging a failure without propagating it
async fn release(handle: &dyn ConnectionHandle, target: &DeviceId) {
    if let Err(e) = handle.close().await {
        error!("Could not close the connection to {}: {}", target, e);
    }
}
