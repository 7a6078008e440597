use async_trait::async_trait;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::errors::{BridgeError, Result};
use crate::utils::CancelSignal;

/// One named device operation exposed through the command channel.
///
/// A handler emits any number of progress payloads through the sink, then
/// returns its result; the channel server turns the return into the single
/// terminal event. Handlers observe `cancel` at their await points and return
/// early once it fires; whatever they return is then discarded.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(
        &self,
        payload: Value,
        sink: &ProgressSink,
        cancel: &mut CancelSignal,
    ) -> Result<Value>;
}

/// Progress-event sink handed to a running handler.
#[derive(Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<Value>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    /// Returns false once the invocation is gone; handlers treat that like
    /// cancellation.
    pub async fn send(&self, payload: Value) -> bool {
        self.tx.send(payload).await.is_ok()
    }
}

/// Decode a command input, failing fast with a validation error on shape
/// mismatch. The channel itself performs no validation; this is the receiving
/// side rejecting the payload.
pub fn decode_input<T: DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| BridgeError::validation(format!("Invalid command input: {}", e)))
}

/// The fixed set of commands the privileged process executes. Iteration order
/// is insertion order; names are unique and a duplicate refuses construction.
pub struct CommandRegistry {
    handlers: IndexMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new(handlers: Vec<Arc<dyn CommandHandler>>) -> Result<Self> {
        let mut map: IndexMap<String, Arc<dyn CommandHandler>> = IndexMap::new();

        for handler in handlers {
            let name = handler.name().to_string();
            if map.contains_key(&name) {
                return Err(BridgeError::config(format!(
                    "Duplicate command registration: {}",
                    name
                )));
            }
            map.insert(name, handler);
        }

        info!("📟 Command registry ready with {} commands", map.len());
        Ok(Self { handlers: map })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
