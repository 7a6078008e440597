use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use crate::api::FirmwareApiClient;
use crate::errors::{BridgeError, Result};
use crate::transport::apdu::{
    expect_ok, serialize_derivation_path, ApduCommand, INS_ATTEST, INS_GET_ADDRESS,
    INS_GET_APP_CONFIGURATION, INS_GET_DEVICE_INFO,
};
use crate::transport::{DeviceAccess, DeviceHandle, DeviceTransport, TransportListener};
use crate::utils::Config;

/// Everything a command adapter needs to talk to hardware: the transport, the
/// exclusive-access map, the presence listener and the firmware manifest
/// client.
#[derive(Clone)]
pub struct CommandContext {
    pub transport: Arc<dyn DeviceTransport>,
    pub access: DeviceAccess,
    pub listener: TransportListener,
    pub firmware: FirmwareApiClient,
}

impl CommandContext {
    pub fn new(transport: Arc<dyn DeviceTransport>, config: &Config) -> Self {
        Self {
            listener: TransportListener::new(transport.clone(), config.event_buffer_size),
            access: DeviceAccess::new(),
            firmware: FirmwareApiClient::new(&config.firmware_base_url),
            transport,
        }
    }
}

/// Configuration of the app currently open on the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfiguration {
    pub app_name: String,
    pub app_version: String,
    pub flags: u8,
}

/// Firmware-level device information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub mcu_version: String,
    pub is_bootloader: bool,
}

/// One exclusive session with an open device. Holding the session holds the
/// per-path device lock; dropping it, including when the running invocation
/// is cancelled, releases the device for the next caller.
pub struct DeviceSession {
    handle: Box<dyn DeviceHandle>,
    _guard: OwnedMutexGuard<()>,
}

impl DeviceSession {
    pub async fn open(ctx: &CommandContext, device_path: &str) -> Result<Self> {
        let guard = ctx.access.acquire(device_path).await;
        let handle = ctx.transport.open(device_path).await?;
        Ok(Self {
            handle,
            _guard: guard,
        })
    }

    pub async fn exchange_ok(&mut self, cmd: ApduCommand) -> Result<Vec<u8>> {
        let response = self.handle.exchange(&cmd.to_bytes()).await?;
        expect_ok(&response)
    }

    /// Request an address for a derivation path; `verify` asks the device to
    /// display it for physical confirmation first.
    pub async fn get_address(&mut self, path: &[u32], verify: bool) -> Result<(Vec<u8>, String)> {
        let p1 = if verify { 1 } else { 0 };
        let data = serialize_derivation_path(path);
        let payload = self
            .exchange_ok(ApduCommand::new(INS_GET_ADDRESS, p1, 0, &data))
            .await?;

        if payload.len() < 33 {
            return Err(BridgeError::device("Invalid address response"));
        }
        let pubkey = payload[0..32].to_vec();
        let addr_len = payload[32] as usize;
        if payload.len() < 33 + addr_len {
            return Err(BridgeError::device("Invalid address response"));
        }
        let address = String::from_utf8(payload[33..33 + addr_len].to_vec())
            .map_err(|_| BridgeError::device("Address is not valid UTF-8"))?;

        Ok((pubkey, address))
    }

    pub async fn app_configuration(&mut self) -> Result<AppConfiguration> {
        let payload = self
            .exchange_ok(ApduCommand::new(INS_GET_APP_CONFIGURATION, 0, 0, &[]))
            .await?;

        if payload.len() < 6 {
            return Err(BridgeError::device("Invalid app configuration response"));
        }
        let app_version = format!("{}.{}.{}", payload[1], payload[2], payload[3]);
        let flags = payload[4];
        let name_len = payload[5] as usize;
        if payload.len() < 6 + name_len {
            return Err(BridgeError::device("Invalid app configuration response"));
        }
        let app_name = String::from_utf8(payload[6..6 + name_len].to_vec())
            .map_err(|_| BridgeError::device("App name is not valid UTF-8"))?;

        Ok(AppConfiguration {
            app_name,
            app_version,
            flags,
        })
    }

    pub async fn device_info(&mut self) -> Result<DeviceInfo> {
        let payload = self
            .exchange_ok(ApduCommand::new(INS_GET_DEVICE_INFO, 0, 0, &[]))
            .await?;

        fn read_string(payload: &[u8], at: &mut usize) -> Result<String> {
            if *at >= payload.len() {
                return Err(BridgeError::device("Invalid device info response"));
            }
            let len = payload[*at] as usize;
            *at += 1;
            if *at + len > payload.len() {
                return Err(BridgeError::device("Invalid device info response"));
            }
            let s = String::from_utf8(payload[*at..*at + len].to_vec())
                .map_err(|_| BridgeError::device("Device info is not valid UTF-8"))?;
            *at += len;
            Ok(s)
        }

        let mut at = 0usize;
        let firmware_version = read_string(&payload, &mut at)?;
        let mcu_version = read_string(&payload, &mut at)?;
        let flags = payload.get(at).copied().unwrap_or(0);

        Ok(DeviceInfo {
            firmware_version,
            mcu_version,
            is_bootloader: flags & 0x01 != 0,
        })
    }

    /// Genuineness challenge: the device answers with a digest only authentic
    /// firmware can produce for the given nonce.
    pub async fn attest(&mut self, challenge: &[u8; 32]) -> Result<Vec<u8>> {
        self.exchange_ok(ApduCommand::new(INS_ATTEST, 0, 0, challenge))
            .await
    }
}
