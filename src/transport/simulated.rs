use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::errors::{BridgeError, Result};
use crate::transport::apdu::{
    self, ApduCommand, INS_ATTEST, INS_GET_ADDRESS, INS_GET_APP_CONFIGURATION,
    INS_GET_DEVICE_INFO, INS_INSTALL_APP, INS_SIGN_TRANSACTION, SW_INS_NOT_SUPPORTED, SW_OK,
    SW_SECURITY_STATUS, SW_WRONG_LENGTH,
};
use crate::transport::device::{Device, DeviceEvent, DeviceEventKind, DeviceHandle, DeviceTransport};

/// Domain tag mixed into the genuineness challenge digest by authentic
/// firmware.
pub const ATTESTATION_TAG: &[u8] = b"device-bridge:genuine";

/// Everything a simulated device needs to answer the APDU protocol.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub path: String,
    pub product_name: String,
    pub app_name: String,
    pub app_version: [u8; 3],
    pub firmware_version: String,
    pub mcu_version: String,
    /// Seeds deterministic addresses, public keys and signatures.
    pub seed: String,
    pub genuine: bool,
    /// A locked device answers every instruction with 0x6982, the same status
    /// a real device returns when the expected app is not open.
    pub locked: bool,
}

impl DeviceProfile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            product_name: "Nano Sim".to_string(),
            app_name: "Bitcoin".to_string(),
            app_version: [1, 4, 2],
            firmware_version: "2.1.0".to_string(),
            mcu_version: "1.12".to_string(),
            seed: "default-seed".to_string(),
            genuine: true,
            locked: false,
        }
    }

    fn descriptor(&self) -> Device {
        Device {
            path: self.path.clone(),
            product_name: Some(self.product_name.clone()),
        }
    }
}

/// In-process transport: device presence is driven programmatically through
/// `attach`/`detach`, and opened devices answer the full APDU protocol from
/// their profile. Backs the dev daemon and the test suite; the production
/// build swaps in the platform HID transport behind the same trait.
pub struct SimulatedTransport {
    devices: Arc<RwLock<HashMap<String, DeviceProfile>>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub async fn attach(&self, profile: DeviceProfile) {
        info!("🔌 Attaching simulated device {}", profile.path);
        let event = DeviceEvent {
            descriptor: profile.descriptor(),
            kind: DeviceEventKind::Add,
        };
        self.devices
            .write()
            .await
            .insert(profile.path.clone(), profile);
        let _ = self.events.send(event);
    }

    pub async fn detach(&self, path: &str) {
        let removed = self.devices.write().await.remove(path);
        if let Some(profile) = removed {
            info!("🔌 Detaching simulated device {}", path);
            let _ = self.events.send(DeviceEvent {
                descriptor: profile.descriptor(),
                kind: DeviceEventKind::Remove,
            });
        }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceTransport for SimulatedTransport {
    async fn list(&self) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        Ok(devices.values().map(|p| p.descriptor()).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    async fn open(&self, path: &str) -> Result<Box<dyn DeviceHandle>> {
        let devices = self.devices.read().await;
        let profile = devices
            .get(path)
            .ok_or_else(|| BridgeError::not_found(format!("Device {} not connected", path)))?;
        Ok(Box::new(SimulatedDevice {
            profile: profile.clone(),
            sign_buffer: Vec::new(),
            install_received: 0,
        }))
    }
}

/// One open connection to a simulated device. Signing and installation are
/// chunked, so the handle keeps per-connection state between exchanges.
pub struct SimulatedDevice {
    profile: DeviceProfile,
    sign_buffer: Vec<u8>,
    install_received: usize,
}

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn respond(payload: &[u8], sw: u16) -> Vec<u8> {
    let mut out = payload.to_vec();
    out.extend_from_slice(&sw.to_be_bytes());
    out
}

impl SimulatedDevice {
    fn handle_command(&mut self, cmd: ApduCommand) -> Vec<u8> {
        if self.profile.locked {
            return respond(&[], SW_SECURITY_STATUS);
        }

        match cmd.ins {
            INS_GET_APP_CONFIGURATION => {
                let [maj, min, patch] = self.profile.app_version;
                let mut payload = vec![0x01, maj, min, patch, 0x00];
                payload.push(self.profile.app_name.len() as u8);
                payload.extend_from_slice(self.profile.app_name.as_bytes());
                respond(&payload, SW_OK)
            }
            INS_GET_ADDRESS => {
                if cmd.data.len() < 5 {
                    return respond(&[], SW_WRONG_LENGTH);
                }
                let pubkey = digest(&[self.profile.seed.as_bytes(), b"pub", &cmd.data]);
                let addr_raw = digest(&[self.profile.seed.as_bytes(), b"addr", &cmd.data]);
                let address = hex::encode(&addr_raw[..20]);

                let mut payload = Vec::with_capacity(32 + 1 + address.len());
                payload.extend_from_slice(&pubkey);
                payload.push(address.len() as u8);
                payload.extend_from_slice(address.as_bytes());
                respond(&payload, SW_OK)
            }
            INS_SIGN_TRANSACTION => {
                if cmd.p1 == 0x01 {
                    self.sign_buffer.clear();
                }
                self.sign_buffer.extend_from_slice(&cmd.data);

                if cmd.p2 == 0x80 {
                    // Last chunk carries the signature back.
                    let half1 =
                        digest(&[self.profile.seed.as_bytes(), b"sig", &self.sign_buffer]);
                    let half2 = digest(&[&half1]);
                    let mut signature = half1.to_vec();
                    signature.extend_from_slice(&half2);
                    self.sign_buffer.clear();
                    respond(&signature, SW_OK)
                } else {
                    respond(&[], SW_OK)
                }
            }
            INS_GET_DEVICE_INFO => {
                let fw = self.profile.firmware_version.as_bytes();
                let mcu = self.profile.mcu_version.as_bytes();
                let mut payload = Vec::with_capacity(fw.len() + mcu.len() + 3);
                payload.push(fw.len() as u8);
                payload.extend_from_slice(fw);
                payload.push(mcu.len() as u8);
                payload.extend_from_slice(mcu);
                payload.push(0x00); // flags: not in bootloader, no pending update
                respond(&payload, SW_OK)
            }
            INS_ATTEST => {
                if cmd.data.len() != 32 {
                    return respond(&[], SW_WRONG_LENGTH);
                }
                let tag: &[u8] = if self.profile.genuine {
                    ATTESTATION_TAG
                } else {
                    b"device-bridge:counterfeit"
                };
                respond(&digest(&[&cmd.data, tag]), SW_OK)
            }
            INS_INSTALL_APP => {
                self.install_received += cmd.data.len();
                if cmd.p2 == 0x80 {
                    debug!(
                        "🔌 Simulated install complete, {} bytes",
                        self.install_received
                    );
                    self.install_received = 0;
                }
                respond(&[], SW_OK)
            }
            _ => respond(&[], SW_INS_NOT_SUPPORTED),
        }
    }
}

#[async_trait]
impl DeviceHandle for SimulatedDevice {
    async fn exchange(&mut self, raw: &[u8]) -> Result<Vec<u8>> {
        let cmd = ApduCommand::parse(raw)?;
        Ok(self.handle_command(cmd))
    }
}
