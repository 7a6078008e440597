mod firmware;

pub use firmware::{verify_checksum, FirmwareApiClient, FirmwareUpdate};
