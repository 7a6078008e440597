//! Privileged device-command bridge for a hardware wallet desktop app.
//!
//! The UI process invokes named commands over a local channel; this crate
//! executes them against the hardware device and streams results, progress
//! and errors back. It also hosts the scan-session state machine that drives
//! the "add accounts" workflow on top of the per-currency bridge contract.

pub mod api;
pub mod bridge;
pub mod channel;
pub mod commands;
pub mod errors;
pub mod scan;
pub mod transport;
pub mod utils;
