//! Coordinator configuration and protocol constants

use std::time::Duration;

use uuid::Uuid;

/// Service identifier connection handles are bound to
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0xc0a1171b_3660_448e_a68e_a56ec4ef357f);

/// Default time discovery may stay idle before the scan window ends
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on a single connect call
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the connection coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Idle window after the most recent scan request
    pub idle_timeout: Duration,
    /// Service identifier passed to the connection factory
    pub service_uuid: Uuid,
    /// Upper bound for a connect call
    /// None means wait for the transport to give up
    pub connect_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            service_uuid: SERVICE_UUID,
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl CoordinatorConfig {
    /// Create a new coordinator configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovery idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the service identifier
    pub fn with_service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
