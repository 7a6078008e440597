use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{BridgeError, DeviceError, ErrorKind, Result};

/// Envelope exchanged between the UI process and the privileged process, one
/// JSON document per line. Everything crossing the boundary must be
/// structurally serializable; live handles never travel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelMessage {
    Invoke {
        id: Uuid,
        command: String,
        payload: serde_json::Value,
        sent_at: DateTime<Utc>,
    },
    Cancel {
        id: Uuid,
    },
    Progress {
        id: Uuid,
        payload: serde_json::Value,
    },
    Complete {
        id: Uuid,
        result: serde_json::Value,
    },
    Failed {
        id: Uuid,
        error: WireError,
    },
}

impl ChannelMessage {
    pub fn invoke(id: Uuid, command: &str, payload: serde_json::Value) -> Self {
        ChannelMessage::Invoke {
            id,
            command: command.to_string(),
            payload,
            sent_at: Utc::now(),
        }
    }

    pub fn invocation_id(&self) -> Uuid {
        match self {
            ChannelMessage::Invoke { id, .. }
            | ChannelMessage::Cancel { id }
            | ChannelMessage::Progress { id, .. }
            | ChannelMessage::Complete { id, .. }
            | ChannelMessage::Failed { id, .. } => *id,
        }
    }
}

/// Serializable mirror of `BridgeError` for the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceError>,
}

impl From<BridgeError> for WireError {
    fn from(err: BridgeError) -> Self {
        let kind = err.kind();
        match err {
            BridgeError::WrongAppOpen(app_name) => WireError {
                kind,
                message: format!("Wrong app open on device, expected {}", app_name),
                app_name: Some(app_name),
                device: None,
            },
            BridgeError::Device(raw) => WireError {
                kind,
                message: raw.to_string(),
                app_name: None,
                device: Some(raw),
            },
            BridgeError::Channel(m)
            | BridgeError::Config(m)
            | BridgeError::Validation(m)
            | BridgeError::NotFound(m)
            | BridgeError::Serialization(m)
            | BridgeError::FirmwareApi(m)
            | BridgeError::Internal(m) => WireError {
                kind,
                message: m,
                app_name: None,
                device: None,
            },
        }
    }
}

impl From<WireError> for BridgeError {
    fn from(wire: WireError) -> Self {
        match wire.kind {
            ErrorKind::Channel => BridgeError::Channel(wire.message),
            ErrorKind::Config => BridgeError::Config(wire.message),
            ErrorKind::Validation => BridgeError::Validation(wire.message),
            ErrorKind::WrongApp => {
                BridgeError::WrongAppOpen(wire.app_name.unwrap_or(wire.message))
            }
            ErrorKind::Device => BridgeError::Device(wire.device.unwrap_or(DeviceError {
                name: None,
                status_code: None,
                message: wire.message,
            })),
            ErrorKind::NotFound => BridgeError::NotFound(wire.message),
            ErrorKind::Serialization => BridgeError::Serialization(wire.message),
            ErrorKind::Firmware => BridgeError::FirmwareApi(wire.message),
            ErrorKind::Internal => BridgeError::Internal(wire.message),
        }
    }
}

/// Event delivered to a command caller. At most one terminal event per
/// invocation; nothing follows it.
#[derive(Debug, Clone)]
pub enum CommandEvent {
    Progress(serde_json::Value),
    Complete(serde_json::Value),
    Failed(BridgeError),
}

impl CommandEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CommandEvent::Progress(_))
    }
}

pub fn encode_message(message: &ChannelMessage) -> Result<String> {
    Ok(serde_json::to_string(message)?)
}

/// A frame that does not decode is a channel-level failure, distinct from any
/// domain error the operation itself could raise.
pub fn decode_message(line: &str) -> Result<ChannelMessage> {
    serde_json::from_str(line)
        .map_err(|e| BridgeError::channel(format!("Malformed channel message: {}", e)))
}
