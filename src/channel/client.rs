use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::wire::{decode_message, encode_message, ChannelMessage, CommandEvent};
use crate::errors::BridgeError;

type Pending = Arc<Mutex<HashMap<Uuid, mpsc::Sender<CommandEvent>>>>;

/// UI-side endpoint of the command channel. Invocations multiplex over one
/// connection; events are routed back by invocation id.
#[derive(Clone)]
pub struct CommandClient {
    outbound: mpsc::Sender<ChannelMessage>,
    pending: Pending,
}

impl CommandClient {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ChannelMessage>(256);
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let line = match encode_message(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("🖥️ Dropping unencodable request: {}", e);
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

        let reader_pending = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match decode_message(&line) {
                        Ok(message) => route_event(&reader_pending, message).await,
                        Err(e) => {
                            // A frame we cannot parse means the channel itself
                            // is compromised; fail everything in flight.
                            warn!("🖥️ {}", e);
                            fail_all_pending(&reader_pending, e).await;
                            return;
                        }
                    },
                    Ok(None) | Err(_) => {
                        fail_all_pending(
                            &reader_pending,
                            BridgeError::channel("Connection to privileged process lost"),
                        )
                        .await;
                        return;
                    }
                }
            }
        });

        Self {
            outbound: outbound_tx,
            pending,
        }
    }

    /// Invoke a registered command. The input is not validated here; a
    /// rejection by the receiving side arrives as a `Failed` event.
    pub async fn invoke(&self, command: &str, payload: serde_json::Value) -> Invocation {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(64);
        self.pending.lock().unwrap().insert(id, tx.clone());

        debug!("🖥️ Invoking {} as {}", command, id);
        let request = ChannelMessage::invoke(id, command, payload);
        if self.outbound.send(request).await.is_err() {
            self.pending.lock().unwrap().remove(&id);
            let _ = tx
                .send(CommandEvent::Failed(BridgeError::channel(
                    "Connection to privileged process lost",
                )))
                .await;
        }

        Invocation {
            id,
            rx,
            outbound: self.outbound.clone(),
            pending: self.pending.clone(),
            done: false,
        }
    }
}

async fn route_event(pending: &Pending, message: ChannelMessage) {
    let id = message.invocation_id();
    let (event, terminal) = match message {
        ChannelMessage::Progress { payload, .. } => (CommandEvent::Progress(payload), false),
        ChannelMessage::Complete { result, .. } => (CommandEvent::Complete(result), true),
        ChannelMessage::Failed { error, .. } => (CommandEvent::Failed(error.into()), true),
        ChannelMessage::Invoke { .. } | ChannelMessage::Cancel { .. } => {
            warn!("🖥️ Ignoring server-bound frame for invocation {}", id);
            return;
        }
    };

    let sender = {
        let mut map = pending.lock().unwrap();
        if terminal {
            map.remove(&id)
        } else {
            map.get(&id).cloned()
        }
    };

    match sender {
        Some(tx) => {
            let _ = tx.send(event).await;
        }
        None => debug!("🖥️ Event for unknown invocation {}", id),
    }
}

/// Channel-level transport failure: every pending invocation receives one
/// synthetic `Failed` event with the distinguished channel kind.
async fn fail_all_pending(pending: &Pending, err: BridgeError) {
    let senders: Vec<_> = pending.lock().unwrap().drain().collect();
    for (_, tx) in senders {
        let _ = tx.send(CommandEvent::Failed(err.clone())).await;
    }
}

/// One live command invocation, owned by the caller. Dropping it without
/// having seen a terminal event is a best-effort cancel.
pub struct Invocation {
    id: Uuid,
    rx: mpsc::Receiver<CommandEvent>,
    outbound: mpsc::Sender<ChannelMessage>,
    pending: Pending,
    done: bool,
}

impl Invocation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, `None` after the terminal event or after cancellation.
    pub async fn next(&mut self) -> Option<CommandEvent> {
        if self.done {
            return None;
        }
        let event = self.rx.recv().await?;
        if event.is_terminal() {
            self.done = true;
        }
        Some(event)
    }

    /// Cooperative cancel: stops further delivery here and signals the
    /// privileged side to release held resources. Best-effort if a terminal
    /// event was already produced; idempotent.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.pending.lock().unwrap().remove(&self.id);
        let _ = self.outbound.try_send(ChannelMessage::Cancel { id: self.id });
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        self.cancel();
    }
}
