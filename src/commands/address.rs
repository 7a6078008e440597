use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::commands::device::{CommandContext, DeviceSession};
use crate::commands::registry::{decode_input, CommandHandler, ProgressSink};
use crate::errors::{BridgeError, Result};
use crate::transport::apdu::{
    chunk_data, parse_derivation_path, serialize_derivation_path, ApduCommand, APDU_CHUNK_SIZE,
    INS_SIGN_TRANSACTION,
};
use crate::utils::CancelSignal;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub device_path: String,
    pub currency_id: String,
    pub derivation_path: String,
    #[serde(default)]
    pub verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressResult {
    pub address: String,
    pub public_key: String,
    pub derivation_path: String,
}

/// Request an address for a derivation path, optionally confirmed on the
/// device screen.
pub struct GetAddressCommand {
    ctx: CommandContext,
}

impl GetAddressCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for GetAddressCommand {
    fn name(&self) -> &'static str {
        "getAddress"
    }

    async fn execute(
        &self,
        payload: Value,
        _sink: &ProgressSink,
        _cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: AddressRequest = decode_input(payload)?;
        let path = parse_derivation_path(&request.derivation_path)?;

        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;
        let (pubkey, address) = session.get_address(&path, request.verify).await?;

        debug!(
            "🔐 Derived {} address for {}",
            request.currency_id, request.derivation_path
        );

        Ok(serde_json::to_value(AddressResult {
            address,
            public_key: hex::encode(pubkey),
            derivation_path: request.derivation_path,
        })?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub device_path: String,
    pub currency_id: String,
    pub derivation_path: String,
    /// Raw transaction bytes, hex encoded.
    pub transaction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignProgress {
    pub chunks_sent: usize,
    pub chunks_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignResult {
    pub signature: String,
}

/// Stream a transaction to the device in APDU-sized chunks for signing,
/// reporting per-chunk progress. The device displays the transaction and the
/// user confirms physically before the final chunk returns the signature.
pub struct SignTransactionCommand {
    ctx: CommandContext,
}

impl SignTransactionCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for SignTransactionCommand {
    fn name(&self) -> &'static str {
        "signTransaction"
    }

    async fn execute(
        &self,
        payload: Value,
        sink: &ProgressSink,
        cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let request: SignRequest = decode_input(payload)?;
        let path = parse_derivation_path(&request.derivation_path)?;
        let transaction = hex::decode(&request.transaction)
            .map_err(|e| BridgeError::validation(format!("Invalid transaction hex: {}", e)))?;
        if transaction.is_empty() {
            return Err(BridgeError::validation("Empty transaction"));
        }

        let mut session = DeviceSession::open(&self.ctx, &request.device_path).await?;

        let mut message = serialize_derivation_path(&path);
        message.extend_from_slice(&transaction);
        let chunks = chunk_data(&message, APDU_CHUNK_SIZE);
        let chunks_total = chunks.len();

        let mut signature = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("🔐 Signing cancelled after {}/{} chunks", i, chunks_total);
                return Ok(Value::Null);
            }

            let p1 = if i == 0 { 0x01 } else { 0x80 };
            let p2 = if i == chunks_total - 1 { 0x80 } else { 0x00 };
            let response = session
                .exchange_ok(ApduCommand::new(INS_SIGN_TRANSACTION, p1, p2, chunk))
                .await?;

            sink.send(serde_json::to_value(SignProgress {
                chunks_sent: i + 1,
                chunks_total,
            })?)
            .await;

            if i == chunks_total - 1 {
                signature = response;
            }
        }

        if signature.len() < 64 {
            return Err(BridgeError::device("Invalid signature response"));
        }

        info!("🔐 Transaction signed on {}", request.device_path);
        Ok(serde_json::to_value(SignResult {
            signature: hex::encode(signature),
        })?)
    }
}
