mod access;
mod device;
mod listener;
mod simulated;

pub mod apdu;

pub use access::DeviceAccess;
pub use device::{Device, DeviceEvent, DeviceEventKind, DeviceHandle, DeviceTransport};
pub use listener::{DeviceEventStream, TransportListener};
pub use simulated::{DeviceProfile, SimulatedTransport, ATTESTATION_TAG};
