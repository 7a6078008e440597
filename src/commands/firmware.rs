use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::verify_checksum;
use crate::commands::device::{CommandContext, DeviceSession};
use crate::commands::device_info::DeviceRequest;
use crate::commands::registry::{decode_input, CommandHandler, ProgressSink};
use crate::errors::{BridgeError, Result};
use crate::transport::apdu::{chunk_data, ApduCommand, APDU_CHUNK_SIZE, INS_INSTALL_APP};
use crate::utils::CancelSignal;

/// Query the manifest service for the latest firmware matching the connected
/// device. Completes with the update descriptor, or null when up to date.
pub struct GetLatestFirmwareCommand {
    ctx: CommandContext,
}

impl GetLatestFirmwareCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for GetLatestFirmwareCommand {
    fn name(&self) -> &'static str {
        "getLatestFirmwareForDevice"
    }

    async fn execute(
        &self,
        payload: Value,
        _sink: &ProgressSink,
        _cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: DeviceRequest = decode_input(payload)?;

        // Read versions under the device lock, release before going to the
        // network so the device is not pinned during a slow manifest call.
        let info = {
            let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;
            session.device_info().await?
        };

        let update = self
            .ctx
            .firmware
            .latest_for(&info.firmware_version, &info.mcu_version)
            .await?;

        Ok(serde_json::to_value(update)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallAppRequest {
    pub device_path: String,
    pub app_name: String,
    /// Package bytes, hex encoded, as fetched from the manifest's url.
    pub app_blob: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallProgress {
    pub progress: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResult {
    pub app_name: String,
    pub bytes_written: usize,
}

/// Stream an app package to the device, reporting fractional progress. The
/// blob is checksum-verified before the first byte reaches the device.
pub struct InstallAppCommand {
    ctx: CommandContext,
}

impl InstallAppCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for InstallAppCommand {
    fn name(&self) -> &'static str {
        "installApp"
    }

    async fn execute(
        &self,
        payload: Value,
        sink: &ProgressSink,
        cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: InstallAppRequest = decode_input(payload)?;
        let blob = hex::decode(&request.app_blob)
            .map_err(|e| BridgeError::validation(format!("Invalid app blob hex: {}", e)))?;
        if blob.is_empty() {
            return Err(BridgeError::validation("Empty app package"));
        }
        verify_checksum(&blob, &request.sha256)?;

        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;

        let chunks = chunk_data(&blob, APDU_CHUNK_SIZE);
        let chunks_total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(
                    "⬇️ Install of {} cancelled at {}/{} chunks",
                    request.app_name,
                    i,
                    chunks_total
                );
                return Ok(Value::Null);
            }

            let p1 = if i == 0 { 0x01 } else { 0x80 };
            let p2 = if i == chunks_total - 1 { 0x80 } else { 0x00 };
            session
                .exchange_ok(ApduCommand::new(INS_INSTALL_APP, p1, p2, chunk))
                .await?;

            sink.send(serde_json::to_value(InstallProgress {
                progress: (i + 1) as f32 / chunks_total as f32,
            })?)
            .await;
        }

        info!(
            "⬇️ Installed {} ({} bytes) on {}",
            request.app_name,
            blob.len(),
            request.device_path
        );
        Ok(serde_json::to_value(InstallResult {
            app_name: request.app_name,
            bytes_written: blob.len(),
        })?)
    }
}
