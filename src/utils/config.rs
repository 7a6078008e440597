use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::errors::BridgeError;

const DEFAULT_SOCKET_PATH: &str = "/tmp/device-bridge.sock";
const DEFAULT_FIRMWARE_BASE_URL: &str = "https://firmware.device-bridge.dev";
const DEFAULT_EVENT_BUFFER: usize = 256;
const DEFAULT_SCAN_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Daemon endpoint
    pub socket_path: String,

    // Firmware manifest service
    pub firmware_base_url: String,

    // Channel tuning
    pub event_buffer_size: usize,
    pub scan_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            socket_path: env::var("BRIDGE_SOCKET_PATH")
                .unwrap_or_else(|_| DEFAULT_SOCKET_PATH.to_string()),

            firmware_base_url: env::var("FIRMWARE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_FIRMWARE_BASE_URL.to_string()),

            event_buffer_size: env::var("EVENT_BUFFER_SIZE")
                .unwrap_or_else(|_| DEFAULT_EVENT_BUFFER.to_string())
                .parse()
                .unwrap_or(DEFAULT_EVENT_BUFFER),

            scan_buffer_size: env::var("SCAN_BUFFER_SIZE")
                .unwrap_or_else(|_| DEFAULT_SCAN_BUFFER.to_string())
                .parse()
                .unwrap_or(DEFAULT_SCAN_BUFFER),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.socket_path.is_empty() {
            return Err(BridgeError::config("Socket path is required").into());
        }

        if self.event_buffer_size == 0 || self.scan_buffer_size == 0 {
            return Err(BridgeError::config("Event buffers must hold at least one event").into());
        }

        if !self.firmware_base_url.starts_with("http") {
            return Err(BridgeError::config(format!(
                "Invalid firmware base URL: {}",
                self.firmware_base_url
            ))
            .into());
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            firmware_base_url: DEFAULT_FIRMWARE_BASE_URL.to_string(),
            event_buffer_size: DEFAULT_EVENT_BUFFER,
            scan_buffer_size: DEFAULT_SCAN_BUFFER,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_buffers() {
        let config = Config {
            event_buffer_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_non_http_manifest_url() {
        let config = Config {
            firmware_base_url: "ftp://nope".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
