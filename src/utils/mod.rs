mod cancel;
mod config;

pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use config::Config;
