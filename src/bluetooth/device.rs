//! Discovered device records

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Signal strength sentinel meaning "no reading"
pub const RSSI_UNKNOWN: i16 = i16::MIN;

/// Placeholder title for devices that advertise neither a name nor an address
pub const UNKNOWN_DEVICE_TITLE: &str = "Unknown device";

/// Opaque platform identifier of a peer device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Raw "device found" payload as reported by an adapter
///
/// Every field is optional because platforms deliver partial payloads. A
/// payload without a device handle cannot be turned into a [`DeviceRecord`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryPayload {
    pub device: Option<DeviceId>,
    pub name: Option<String>,
    pub address: Option<String>,
    pub class: Option<u32>,
    pub rssi: Option<i16>,
}

/// A discovered peer together with one signal strength reading
///
/// Two records are equal when they refer to the same device handle *and*
/// carry the same reading, so successive readings of one device are distinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    device: DeviceId,
    name: Option<String>,
    address: Option<String>,
    class: Option<u32>,
    rssi: i16,
}

impl DeviceRecord {
    /// Create a record; pass [`RSSI_UNKNOWN`] when no reading is available
    pub fn new(
        device: DeviceId,
        name: Option<String>,
        address: Option<String>,
        class: Option<u32>,
        rssi: i16,
    ) -> Self {
        Self {
            device,
            name: non_empty(name),
            address: non_empty(address),
            class,
            rssi,
        }
    }

    /// Build a record from an adapter payload, `None` if the payload is malformed
    pub fn from_payload(payload: DiscoveryPayload) -> Option<Self> {
        let device = payload.device?;
        if device.as_str().is_empty() {
            return None;
        }

        Some(Self::new(
            device,
            payload.name,
            payload.address,
            payload.class,
            payload.rssi.unwrap_or(RSSI_UNKNOWN),
        ))
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn class(&self) -> Option<u32> {
        self.class
    }

    /// Signal strength in dBm, `None` for the unknown sentinel
    pub fn rssi(&self) -> Option<i16> {
        if self.rssi == RSSI_UNKNOWN {
            None
        } else {
            Some(self.rssi)
        }
    }

    /// Stored reading including the sentinel
    pub fn raw_rssi(&self) -> i16 {
        self.rssi
    }

    /// Name, else address, else a placeholder. Never empty.
    pub fn display_title(&self) -> String {
        self.name
            .as_deref()
            .or(self.address.as_deref())
            .unwrap_or(UNKNOWN_DEVICE_TITLE)
            .to_string()
    }

    /// Multi-line human readable summary
    pub fn describe(&self) -> String {
        let mut lines = Vec::with_capacity(4);

        if let Some(address) = &self.address {
            lines.push(format!("MAC address: {}", address));
        }

        lines.push("Bluetooth class:".to_string());
        lines.push(match self.class {
            Some(class) => format!("0x{:06x}", class),
            None => "Unknown".to_string(),
        });

        if let Some(rssi) = self.rssi() {
            lines.push(format!("Signal strength: {} dBm", rssi));
        }

        lines.join("\n")
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.device == other.device && self.rssi == other.rssi
    }
}

impl Eq for DeviceRecord {}

impl Hash for DeviceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.device.hash(state);
        self.rssi.hash(state);
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
