use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::errors::{BridgeError, Result};

/// A firmware or app package offered by the manifest service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpdate {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    update: Option<FirmwareUpdate>,
}

/// Client for the firmware-update manifest service.
#[derive(Clone)]
pub struct FirmwareApiClient {
    client: Client,
    base_url: String,
}

impl FirmwareApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Latest firmware available for a device, or `None` when it is already
    /// up to date.
    pub async fn latest_for(
        &self,
        firmware_version: &str,
        mcu_version: &str,
    ) -> Result<Option<FirmwareUpdate>> {
        let url = format!("{}/firmware/latest", self.base_url);
        debug!("⬇️ Querying firmware manifest at {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("version", firmware_version), ("mcu", mcu_version)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::firmware_api(format!(
                "Manifest service answered {}",
                response.status()
            )));
        }

        let latest: LatestResponse = response.json().await?;
        if let Some(update) = &latest.update {
            info!(
                "⬇️ Firmware {} {} available for device on {}",
                update.name, update.version, firmware_version
            );
        }
        Ok(latest.update)
    }
}

/// Verify an app/firmware blob against its manifest checksum before it is
/// streamed to the device.
pub fn verify_checksum(blob: &[u8], expected_sha256: &str) -> Result<()> {
    let digest = hex::encode(Sha256::digest(blob));
    if !digest.eq_ignore_ascii_case(expected_sha256) {
        return Err(BridgeError::validation(format!(
            "Checksum mismatch: expected {}, got {}",
            expected_sha256, digest
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_accepts_matching_blob() {
        let blob = b"app-bytes";
        let digest = hex::encode(Sha256::digest(blob));
        assert!(verify_checksum(blob, &digest).is_ok());
        assert!(verify_checksum(blob, &digest.to_uppercase()).is_ok());
    }

    #[test]
    fn test_checksum_rejects_tampered_blob() {
        let digest = hex::encode(Sha256::digest(b"app-bytes"));
        let err = verify_checksum(b"tampered", &digest).unwrap_err();
        assert!(matches!(err, BridgeError::Validation(_)));
    }

    #[test]
    fn test_latest_response_decodes_update_and_null() {
        let with_update = r#"{"update":{"name":"Bitcoin","version":"2.1.1",
            "url":"https://cdn.example/app.bin","sha256":"ab","publishedAt":"2024-05-01T00:00:00Z"}}"#;
        let decoded: LatestResponse = serde_json::from_str(with_update).unwrap();
        assert_eq!(decoded.update.unwrap().version, "2.1.1");

        let up_to_date = r#"{"update":null}"#;
        let decoded: LatestResponse = serde_json::from_str(up_to_date).unwrap();
        assert!(decoded.update.is_none());
    }
}
