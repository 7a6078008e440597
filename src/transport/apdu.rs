use crate::errors::{BridgeError, Result};

/// Instruction class shared by every command APDU.
pub const CLA: u8 = 0xe0;

pub const INS_GET_APP_CONFIGURATION: u8 = 0x01;
pub const INS_GET_ADDRESS: u8 = 0x02;
pub const INS_SIGN_TRANSACTION: u8 = 0x03;
pub const INS_GET_DEVICE_INFO: u8 = 0x10;
pub const INS_ATTEST: u8 = 0x20;
pub const INS_INSTALL_APP: u8 = 0x30;

/// Status word appended by the device to every response.
pub const SW_OK: u16 = 0x9000;
pub const SW_SECURITY_STATUS: u16 = 0x6982;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6d00;

/// Maximum data bytes per APDU frame.
pub const APDU_CHUNK_SIZE: usize = 255;

/// A single APDU command frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ApduCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl ApduCommand {
    pub fn new(ins: u8, p1: u8, p2: u8, data: &[u8]) -> Self {
        Self {
            cla: CLA,
            ins,
            p1,
            p2,
            data: data.to_vec(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2, self.data.len() as u8];
        apdu.extend_from_slice(&self.data);
        apdu
    }

    /// Parse a raw frame back into its parts. Used by transports that emulate
    /// the device side of the link.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 5 {
            return Err(BridgeError::validation(format!(
                "APDU frame too short: {} bytes",
                raw.len()
            )));
        }
        let len = raw[4] as usize;
        if raw.len() != 5 + len {
            return Err(BridgeError::validation(format!(
                "APDU length field {} does not match frame of {} bytes",
                len,
                raw.len()
            )));
        }
        Ok(Self {
            cla: raw[0],
            ins: raw[1],
            p1: raw[2],
            p2: raw[3],
            data: raw[5..].to_vec(),
        })
    }
}

/// Split a device response into payload and trailing status word.
pub fn split_status(response: &[u8]) -> Result<(&[u8], u16)> {
    if response.len() < 2 {
        return Err(BridgeError::device(format!(
            "Device response too short: {} bytes",
            response.len()
        )));
    }
    let (payload, sw) = response.split_at(response.len() - 2);
    Ok((payload, u16::from_be_bytes([sw[0], sw[1]])))
}

/// Split a response and fail on any non-OK status word, carrying the raw
/// status code so callers can classify it later.
pub fn expect_ok(response: &[u8]) -> Result<Vec<u8>> {
    let (payload, sw) = split_status(response)?;
    if sw != SW_OK {
        return Err(BridgeError::device_status(
            sw,
            "Device refused the instruction",
        ));
    }
    Ok(payload.to_vec())
}

/// Serialize a BIP32 derivation path for an APDU data field: component count
/// followed by each component big-endian.
pub fn serialize_derivation_path(path: &[u32]) -> Vec<u8> {
    let mut bytes = vec![path.len() as u8];
    for component in path {
        bytes.extend_from_slice(&component.to_be_bytes());
    }
    bytes
}

/// Parse a BIP44 derivation path like "m/44'/60'/0'/0/0". Hardened components
/// carry the 0x80000000 bit.
pub fn parse_derivation_path(path_str: &str) -> Result<Vec<u32>> {
    let trimmed = path_str.trim_start_matches("m/");
    if trimmed.is_empty() {
        return Err(BridgeError::validation("Empty derivation path"));
    }

    trimmed
        .split('/')
        .map(|s| {
            let hardened = s.ends_with('\'');
            let num_str = if hardened { &s[..s.len() - 1] } else { s };
            let num: u32 = num_str.parse().map_err(|_| {
                BridgeError::validation(format!("Invalid derivation path component: {}", s))
            })?;
            Ok(if hardened { num | 0x8000_0000 } else { num })
        })
        .collect()
}

/// Chunk data for APDU transmission.
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    data.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apdu_round_trip() {
        let cmd = ApduCommand::new(INS_GET_ADDRESS, 1, 0, &[0xde, 0xad]);
        let parsed = ApduCommand::parse(&cmd.to_bytes()).unwrap();
        assert_eq!(parsed, cmd);
    }

    #[test]
    fn test_parse_rejects_truncated_frame() {
        assert!(ApduCommand::parse(&[CLA, 0x02]).is_err());
        // Length field claims more data than present.
        assert!(ApduCommand::parse(&[CLA, 0x02, 0, 0, 4, 1, 2]).is_err());
    }

    #[test]
    fn test_expect_ok_splits_status() {
        let payload = expect_ok(&[0xaa, 0xbb, 0x90, 0x00]).unwrap();
        assert_eq!(payload, vec![0xaa, 0xbb]);
    }

    #[test]
    fn test_expect_ok_carries_status_code() {
        let err = expect_ok(&[0x69, 0x82]).unwrap_err();
        match err {
            crate::errors::BridgeError::Device(raw) => {
                assert_eq!(raw.status_code, Some(0x6982))
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_derivation_path_round_trip() {
        let path = parse_derivation_path("m/44'/60'/0'/0/0").unwrap();
        assert_eq!(
            path,
            vec![
                44 | 0x8000_0000,
                60 | 0x8000_0000,
                0x8000_0000,
                0,
                0
            ]
        );

        let bytes = serialize_derivation_path(&path);
        assert_eq!(bytes[0], 5);
        assert_eq!(bytes.len(), 1 + 5 * 4);
    }

    #[test]
    fn test_derivation_path_rejects_garbage() {
        assert!(parse_derivation_path("m/").is_err());
        assert!(parse_derivation_path("m/44'/abc").is_err());
    }

    #[test]
    fn test_chunking() {
        let data = vec![0u8; 600];
        let chunks = chunk_data(&data, APDU_CHUNK_SIZE);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 255);
        assert_eq!(chunks[2].len(), 90);
    }
}
