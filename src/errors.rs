use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error taxonomy for the bridge daemon.
///
/// `Channel` is reserved for process-boundary failures and is never produced
/// by a device operation itself; `Device` carries the raw firmware error
/// verbatim until it crosses the scan-session boundary, where known shapes are
/// remapped into `WrongAppOpen`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Device error: {0}")]
    Device(DeviceError),

    #[error("Wrong app open on device, expected {0}")]
    WrongAppOpen(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Firmware service error: {0}")]
    FirmwareApi(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Raw error surfaced by device communication. Firmware errors arrive with an
/// unknown, untrusted shape; the optional fields mirror what real transports
/// attach (an error name, an APDU status word) without assuming both exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub message: String,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.status_code) {
            (Some(name), Some(code)) => {
                write!(f, "{} (0x{:04x}): {}", name, code, self.message)
            }
            (Some(name), None) => write!(f, "{}: {}", name, self.message),
            (None, Some(code)) => write!(f, "0x{:04x}: {}", code, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

/// Coarse classification used on the wire and by presentation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Channel,
    Config,
    Validation,
    Device,
    WrongApp,
    NotFound,
    Serialization,
    Firmware,
    Internal,
}

impl BridgeError {
    pub fn channel(msg: impl Into<String>) -> Self {
        BridgeError::Channel(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        BridgeError::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BridgeError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        BridgeError::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        BridgeError::Internal(msg.into())
    }

    pub fn firmware_api(msg: impl Into<String>) -> Self {
        BridgeError::FirmwareApi(msg.into())
    }

    pub fn device(msg: impl Into<String>) -> Self {
        BridgeError::Device(DeviceError {
            name: None,
            status_code: None,
            message: msg.into(),
        })
    }

    /// Device error carrying an APDU status word.
    pub fn device_status(status_code: u16, msg: impl Into<String>) -> Self {
        BridgeError::Device(DeviceError {
            name: None,
            status_code: Some(status_code),
            message: msg.into(),
        })
    }

    /// Device error carrying a firmware-assigned error name.
    pub fn device_named(name: impl Into<String>, msg: impl Into<String>) -> Self {
        BridgeError::Device(DeviceError {
            name: Some(name.into()),
            status_code: None,
            message: msg.into(),
        })
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Channel(_) => ErrorKind::Channel,
            BridgeError::Config(_) => ErrorKind::Config,
            BridgeError::Validation(_) => ErrorKind::Validation,
            BridgeError::Device(_) => ErrorKind::Device,
            BridgeError::WrongAppOpen(_) => ErrorKind::WrongApp,
            BridgeError::NotFound(_) => ErrorKind::NotFound,
            BridgeError::Serialization(_) => ErrorKind::Serialization,
            BridgeError::FirmwareApi(_) => ErrorKind::Firmware,
            BridgeError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::FirmwareApi(err.to_string())
    }
}

/// Firmware error names that mean the wrong application is open on the device.
const WRONG_APP_ERROR_NAMES: &[&str] = &["BtcUnmatchedApp"];

/// APDU status words that mean the wrong application is open on the device.
/// 0x6982 (security status not satisfied) and 0x6700 (wrong length) are what
/// the dashboard answers when an app-specific instruction reaches it.
const WRONG_APP_STATUS_CODES: &[u16] = &[0x6982, 0x6700];

/// Remap known device-firmware error shapes into a user-presentable
/// `WrongAppOpen` carrying the expected app name. Any other error passes
/// through unchanged.
pub fn remap_device_error(err: BridgeError, app_name: &str) -> BridgeError {
    match &err {
        BridgeError::Device(raw) => {
            let name_matches = raw
                .name
                .as_deref()
                .map(|n| WRONG_APP_ERROR_NAMES.contains(&n))
                .unwrap_or(false);
            let status_matches = raw
                .status_code
                .map(|c| WRONG_APP_STATUS_CODES.contains(&c))
                .unwrap_or(false);

            if name_matches || status_matches {
                BridgeError::WrongAppOpen(app_name.to_string())
            } else {
                err
            }
        }
        _ => err,
    }
}
