use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::errors::Result;

/// Opaque handle to a currently-connected hardware device. Created and
/// destroyed by transport presence events, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

impl Device {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            product_name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceEventKind {
    Add,
    Remove,
}

/// Device-presence event as it appears on the wire: an opaque descriptor and
/// an add/remove tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub descriptor: Device,
    #[serde(rename = "type")]
    pub kind: DeviceEventKind,
}

/// Hardware transport abstraction. The real implementation wraps the
/// platform's USB/HID library; only its listen/open semantics are relied on
/// here.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Devices currently present.
    async fn list(&self) -> Result<Vec<Device>>;

    /// Subscribe to raw presence notifications. The returned receiver is
    /// wrapped into a cancellable stream by `TransportListener`.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Open an exclusive connection to a device. Callers must hold the
    /// matching `DeviceAccess` lock for the path.
    async fn open(&self, path: &str) -> Result<Box<dyn DeviceHandle>>;
}

/// One open device connection. Exchanges a raw APDU frame for the raw
/// response, status word included.
#[async_trait]
pub trait DeviceHandle: Send {
    async fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>>;
}
