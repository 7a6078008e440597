use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::commands::device::{CommandContext, DeviceSession};
use crate::commands::registry::{decode_input, CommandHandler, ProgressSink};
use crate::errors::Result;
use crate::transport::ATTESTATION_TAG;
use crate::utils::CancelSignal;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub device_path: String,
}

/// Read firmware-level device information.
pub struct GetDeviceInfoCommand {
    ctx: CommandContext,
}

impl GetDeviceInfoCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for GetDeviceInfoCommand {
    fn name(&self) -> &'static str {
        "getDeviceInfo"
    }

    async fn execute(
        &self,
        payload: Value,
        _sink: &ProgressSink,
        _cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: DeviceRequest = decode_input(payload)?;
        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;
        let info = session.device_info().await?;
        Ok(serde_json::to_value(info)?)
    }
}

/// Read the configuration of the app currently open on the device.
pub struct GetFirmwareInfoCommand {
    ctx: CommandContext,
}

impl GetFirmwareInfoCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for GetFirmwareInfoCommand {
    fn name(&self) -> &'static str {
        "getFirmwareInfo"
    }

    async fn execute(
        &self,
        payload: Value,
        _sink: &ProgressSink,
        _cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: DeviceRequest = decode_input(payload)?;
        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;
        let configuration = session.app_configuration().await?;
        Ok(serde_json::to_value(configuration)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenuineResult {
    pub genuine: bool,
}

/// Challenge the device to prove it runs authentic firmware.
pub struct GetIsGenuineCommand {
    ctx: CommandContext,
}

impl GetIsGenuineCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for GetIsGenuineCommand {
    fn name(&self) -> &'static str {
        "getIsGenuine"
    }

    async fn execute(
        &self,
        payload: Value,
        _sink: &ProgressSink,
        _cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: DeviceRequest = decode_input(payload)?;
        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;

        let challenge: [u8; 32] = rand::random();
        let attestation = session.attest(&challenge).await?;

        let mut expected = Sha256::new();
        expected.update(challenge);
        expected.update(ATTESTATION_TAG);
        let genuine = attestation.as_slice() == expected.finalize().as_slice();

        if genuine {
            info!("✅ Device {} attested as genuine", request.device_path);
        } else {
            warn!("⚠️ Device {} failed the genuineness check", request.device_path);
        }

        Ok(serde_json::to_value(GenuineResult { genuine })?)
    }
}
