use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::transport::device::{DeviceEvent, DeviceEventKind, DeviceTransport};
use crate::utils::{cancellation, CancelHandle};

/// Wraps the transport's device-presence notifications into a cancellable
/// event stream. On subscription the listener first replays every device that
/// is already present as an `add` event, then forwards live notifications.
#[derive(Clone)]
pub struct TransportListener {
    transport: Arc<dyn DeviceTransport>,
    buffer: usize,
}

impl TransportListener {
    pub fn new(transport: Arc<dyn DeviceTransport>, buffer: usize) -> Self {
        Self { transport, buffer }
    }

    pub async fn listen(&self) -> Result<DeviceEventStream> {
        // Subscribe before listing so no event can fall between the two.
        let mut raw = self.transport.subscribe();
        let present = self.transport.list().await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        let (handle, mut cancel) = cancellation();

        tokio::spawn(async move {
            for descriptor in present {
                let event = DeviceEvent {
                    descriptor,
                    kind: DeviceEventKind::Add,
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("🔌 Device listener cancelled");
                        return;
                    }
                    received = raw.recv() => match received {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("🔌 Device listener lagged, {} events dropped", missed);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("🔌 Transport closed, device listener ending");
                            return;
                        }
                    }
                }
            }
        });

        Ok(DeviceEventStream { rx, handle })
    }
}

/// Cancellable stream of device-presence events.
pub struct DeviceEventStream {
    rx: mpsc::Receiver<DeviceEvent>,
    handle: CancelHandle,
}

impl DeviceEventStream {
    /// Next presence event, or `None` once the stream is cancelled or the
    /// transport has gone away.
    pub async fn next(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl Drop for DeviceEventStream {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}
