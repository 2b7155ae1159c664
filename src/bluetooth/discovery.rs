//! Discovery session: adapter discovery state, scan listeners and the idle timer
//!
//! Every scan request (re)arms one shared idle-cancel timer. When it fires the
//! current scan window closes: discovery is stopped and exactly the listeners
//! registered during that window are told the scan completed and dropped.
//! Each arming carries a generation number so a firing that was superseded by
//! a later scan request, or by a connection preempting discovery, is ignored.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

use crate::bluetooth::adapter::BluetoothAdapter;
use crate::bluetooth::device::{DeviceRecord, DiscoveryPayload};
use crate::bluetooth::events::{CoordinatorMessage, ScanEvent, Scheduler, SubscriberId};
use crate::error::ScanError;

/// A registered scan listener
struct Listener {
    id: SubscriberId,
    window: u64,
    sender: UnboundedSender<ScanEvent>,
}

pub(crate) struct DiscoverySession {
    adapter: Option<Arc<dyn BluetoothAdapter>>,
    scheduler: Scheduler,
    idle_timeout: Duration,
    /// Active listeners, in registration order
    listeners: Vec<Listener>,
    next_subscriber_id: SubscriberId,
    /// Scan window listeners join; advances when the idle timer fires
    window: u64,
    /// Bumped on every arm/cancel of the idle timer
    generation: u64,
    idle_timer: Option<JoinHandle<()>>,
}

impl DiscoverySession {
    pub(crate) fn new(
        adapter: Option<Arc<dyn BluetoothAdapter>>,
        scheduler: Scheduler,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            adapter,
            scheduler,
            idle_timeout,
            listeners: Vec::new(),
            next_subscriber_id: 1,
            window: 0,
            generation: 0,
            idle_timer: None,
        }
    }

    pub(crate) fn is_supported(&self) -> bool {
        self.adapter.is_some()
    }

    pub(crate) fn is_discovering(&self) -> bool {
        self.adapter
            .as_ref()
            .map(|adapter| adapter.is_discovering())
            .unwrap_or(false)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn adapter(&self) -> Option<&Arc<dyn BluetoothAdapter>> {
        self.adapter.as_ref()
    }

    /// Register a listener and make sure discovery is running
    pub(crate) async fn start_scan(
        &mut self,
        listener: UnboundedSender<ScanEvent>,
    ) -> Result<SubscriberId, ScanError> {
        let adapter = match &self.adapter {
            Some(adapter) => adapter.clone(),
            None => {
                warn!("Scan requested but no Bluetooth adapter is present");
                return Err(ScanError::Unsupported);
            }
        };

        if !adapter.is_enabled().await {
            info!("Scan requested while Bluetooth is disabled");
            return Err(ScanError::Disabled);
        }

        if !adapter.is_discovering() {
            if let Err(e) = adapter.start_discovery().await {
                error!("Failed to start discovery: {}", e);
                return Err(ScanError::DiscoveryFailed(e.to_string()));
            }
            info!("Discovery started");
        } else {
            debug!("Discovery already running, joining current scan");
        }

        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;
        self.listeners.push(Listener {
            id,
            window: self.window,
            sender: listener,
        });

        self.arm_idle_timer();
        debug!(
            "Registered scan listener {} ({} active), idle timeout {:?}",
            id,
            self.listeners.len(),
            self.idle_timeout
        );

        Ok(id)
    }

    /// Fan a discovery payload out to every listener
    pub(crate) fn dispatch(&mut self, payload: DiscoveryPayload) {
        let record = match DeviceRecord::from_payload(payload) {
            Some(record) => record,
            None => {
                debug!("Ignoring discovery payload without a device handle");
                return;
            }
        };

        if self.listeners.is_empty() {
            return;
        }

        debug!("Device discovered: {} ({})", record.display_title(), record.device());
        self.listeners.retain(|listener| {
            let delivered = listener
                .sender
                .send(ScanEvent::DeviceDiscovered(record.clone()))
                .is_ok();
            if !delivered {
                debug!("Dropping scan listener {}: receiver closed", listener.id);
            }
            delivered
        });
    }

    /// Handle an idle timer firing
    pub(crate) async fn on_idle_expired(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(
                "Ignoring stale idle timer (generation {}, current {})",
                generation, self.generation
            );
            return;
        }
        self.idle_timer = None;

        info!("Discovery idle for {:?}, ending scan window {}", self.idle_timeout, self.window);
        self.stop_hardware_discovery().await;

        let window = self.window;
        self.listeners.retain(|listener| {
            if listener.window != window {
                return true;
            }
            let _ = listener.sender.send(ScanEvent::ScanCompleted);
            false
        });
        self.window += 1;
    }

    /// Remove a single listener
    pub(crate) fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|listener| listener.id != id);
        let removed = self.listeners.len() != before;
        if removed {
            debug!("Scan listener {} unsubscribed", id);
        }
        removed
    }

    /// Halt discovery ahead of a connection attempt; listeners stay registered
    pub(crate) async fn stop_for_connection(&mut self) {
        self.cancel_idle_timer();
        self.stop_hardware_discovery().await;
    }

    /// Stop everything and close every listener
    pub(crate) async fn shutdown(&mut self) {
        self.cancel_idle_timer();
        self.stop_hardware_discovery().await;
        for listener in self.listeners.drain(..) {
            let _ = listener.sender.send(ScanEvent::ScanCompleted);
        }
    }

    fn arm_idle_timer(&mut self) {
        self.cancel_idle_timer();
        let generation = self.generation;
        self.idle_timer = Some(
            self.scheduler
                .post_after(self.idle_timeout, CoordinatorMessage::DiscoveryIdle { generation }),
        );
    }

    fn cancel_idle_timer(&mut self) {
        self.generation += 1;
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    async fn stop_hardware_discovery(&self) {
        if let Some(adapter) = &self.adapter {
            if adapter.is_discovering() {
                match adapter.stop_discovery().await {
                    Ok(()) => info!("Discovery stopped"),
                    Err(e) => warn!("Failed to stop discovery: {}", e),
                }
            }
        }
    }
}

impl Drop for DiscoverySession {
    fn drop(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}
