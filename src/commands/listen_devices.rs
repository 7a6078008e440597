use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::commands::device::CommandContext;
use crate::commands::registry::{CommandHandler, ProgressSink};
use crate::errors::{BridgeError, Result};
use crate::utils::CancelSignal;

/// The degenerate command of the registry: no input, an infinite progress
/// stream of device-presence events, never completing on its own. The
/// invocation ends only when the caller cancels it.
pub struct ListenDevicesCommand {
    ctx: CommandContext,
}

impl ListenDevicesCommand {
    pub fn new(ctx: CommandContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl CommandHandler for ListenDevicesCommand {
    fn name(&self) -> &'static str {
        "listenDevices"
    }

    async fn execute(
        &self,
        _payload: Value,
        sink: &ProgressSink,
        cancel: &mut CancelSignal,
    ) -> Result<Value> {
        let mut stream = self.ctx.listener.listen().await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("🔌 listenDevices cancelled");
                    stream.cancel();
                    return Ok(Value::Null);
                }
                event = stream.next() => match event {
                    Some(event) => {
                        if !sink.send(serde_json::to_value(&event)?).await {
                            // Caller went away; same as cancellation.
                            stream.cancel();
                            return Ok(Value::Null);
                        }
                    }
                    None => {
                        return Err(BridgeError::internal("Device transport closed"));
                    }
                }
            }
        }
    }
}
