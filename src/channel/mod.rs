mod client;
mod server;
mod wire;

pub use client::{CommandClient, Invocation};
pub use server::CommandServer;
pub use wire::{decode_message, encode_message, ChannelMessage, CommandEvent, WireError};
