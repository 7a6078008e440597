mod address;
mod device;
mod device_info;
mod firmware;
mod listen_devices;
mod registry;

use std::sync::Arc;

pub use address::{
    AddressRequest, AddressResult, GetAddressCommand, SignProgress, SignRequest, SignResult,
    SignTransactionCommand,
};
pub use device::{AppConfiguration, CommandContext, DeviceInfo, DeviceSession};
pub use device_info::{
    DeviceRequest, GenuineResult, GetDeviceInfoCommand, GetFirmwareInfoCommand,
    GetIsGenuineCommand,
};
pub use firmware::{
    GetLatestFirmwareCommand, InstallAppCommand, InstallAppRequest, InstallProgress, InstallResult,
};
pub use listen_devices::ListenDevicesCommand;
pub use registry::{decode_input, CommandHandler, CommandRegistry, ProgressSink};

use crate::errors::Result;

/// The full command set the privileged process exposes, in registration
/// order.
pub fn command_set(ctx: CommandContext) -> Vec<Arc<dyn CommandHandler>> {
    vec![
        Arc::new(GetAddressCommand::new(ctx.clone())),
        Arc::new(SignTransactionCommand::new(ctx.clone())),
        Arc::new(GetDeviceInfoCommand::new(ctx.clone())),
        Arc::new(GetFirmwareInfoCommand::new(ctx.clone())),
        Arc::new(GetIsGenuineCommand::new(ctx.clone())),
        Arc::new(GetLatestFirmwareCommand::new(ctx.clone())),
        Arc::new(InstallAppCommand::new(ctx.clone())),
        Arc::new(ListenDevicesCommand::new(ctx)),
    ]
}

/// Build the registry over the standard command set.
pub fn build_registry(ctx: CommandContext) -> Result<CommandRegistry> {
    CommandRegistry::new(command_set(ctx))
}
