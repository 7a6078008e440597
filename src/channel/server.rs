use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::wire::{decode_message, encode_message, ChannelMessage, WireError};
use crate::commands::{CommandRegistry, ProgressSink};
use crate::errors::{BridgeError, Result};
use crate::utils::{cancellation, CancelHandle};

/// Privileged-side executor of the command channel. One server drives any
/// number of connections; each connection multiplexes invocations by id.
///
/// Guarantees per invocation: events go out in send order, exactly one
/// terminal event unless the invocation is cancelled first, and cancellation
/// reaches the running handler so it can release any held device.
#[derive(Clone)]
pub struct CommandServer {
    registry: Arc<CommandRegistry>,
}

impl CommandServer {
    pub fn new(registry: Arc<CommandRegistry>) -> Self {
        Self { registry }
    }

    /// Accept loop for the daemon's local socket.
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        info!("📟 Command server listening");
        loop {
            let (stream, _addr) = listener
                .accept()
                .await
                .map_err(|e| BridgeError::channel(format!("Accept failed: {}", e)))?;

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(stream).await {
                    error!("📟 Connection ended with error: {}", e);
                }
            });
        }
    }

    /// Drive one connection until the peer goes away. Generic over the stream
    /// so tests can run the protocol over an in-memory duplex.
    pub async fn serve_connection<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ChannelMessage>(256);

        // Single writer task: per-invocation ordering follows from all events
        // funnelling through one queue.
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let line = match encode_message(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        error!("📟 Dropping unencodable message: {}", e);
                        continue;
                    }
                };
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    break;
                }
            }
        });

        let active: Arc<Mutex<HashMap<Uuid, CancelHandle>>> = Arc::new(Mutex::new(HashMap::new()));

        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let message = match decode_message(&line) {
                Ok(message) => message,
                Err(e) => {
                    warn!("📟 Skipping malformed frame: {}", e);
                    continue;
                }
            };

            match message {
                ChannelMessage::Invoke {
                    id,
                    command,
                    payload,
                    ..
                } => {
                    self.dispatch(id, &command, payload, &outbound_tx, &active)
                        .await;
                }
                ChannelMessage::Cancel { id } => {
                    if let Some(handle) = active.lock().await.remove(&id) {
                        debug!("📟 Cancelling invocation {}", id);
                        handle.cancel();
                    }
                }
                other => {
                    warn!(
                        "📟 Ignoring client-bound frame for invocation {}",
                        other.invocation_id()
                    );
                }
            }
        }

        // Peer gone: stop every running handler so device locks release.
        for (_, handle) in active.lock().await.drain() {
            handle.cancel();
        }
        drop(outbound_tx);
        let _ = writer.await;

        debug!("📟 Connection closed");
        Ok(())
    }

    async fn dispatch(
        &self,
        id: Uuid,
        command: &str,
        payload: serde_json::Value,
        outbound: &mpsc::Sender<ChannelMessage>,
        active: &Arc<Mutex<HashMap<Uuid, CancelHandle>>>,
    ) {
        let handler = match self.registry.get(command) {
            Some(handler) => handler,
            None => {
                warn!("📟 Unknown command invoked: {}", command);
                let error = BridgeError::not_found(format!("Unknown command: {}", command));
                let _ = outbound
                    .send(ChannelMessage::Failed {
                        id,
                        error: WireError::from(error),
                    })
                    .await;
                return;
            }
        };

        debug!("📟 Invocation {} -> {}", id, command);

        let (cancel_handle, mut cancel_signal) = cancellation();
        active.lock().await.insert(id, cancel_handle);

        let (progress_tx, mut progress_rx) = mpsc::channel::<serde_json::Value>(64);
        let sink = ProgressSink::new(progress_tx);

        // Forward progress payloads as they come; ends when the sink drops.
        let forward_outbound = outbound.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(payload) = progress_rx.recv().await {
                if forward_outbound
                    .send(ChannelMessage::Progress { id, payload })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let outbound = outbound.clone();
        let active = active.clone();
        tokio::spawn(async move {
            let outcome = handler.execute(payload, &sink, &mut cancel_signal).await;

            // Close the sink and let queued progress drain before any
            // terminal event; Complete must never overtake Progress.
            drop(sink);
            let _ = forwarder.await;

            active.lock().await.remove(&id);

            if cancel_signal.is_cancelled() {
                debug!("📟 Invocation {} cancelled, suppressing terminal", id);
                return;
            }

            let terminal = match outcome {
                Ok(result) => ChannelMessage::Complete { id, result },
                Err(error) => ChannelMessage::Failed {
                    id,
                    error: WireError::from(error),
                },
            };
            let _ = outbound.send(terminal).await;
        });
    }
}
