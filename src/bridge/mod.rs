use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::{BridgeError, Result};
use crate::utils::{cancellation, CancelHandle, CancelSignal};

/// Descriptor for one supported cryptocurrency. `name` doubles as the name of
/// the app expected to be open on the device while operating on this chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Currency {
    pub id: String,
    pub name: String,
    pub ticker: String,
    pub units: u8,
}

impl Currency {
    pub fn new(id: &str, name: &str, ticker: &str, units: u8) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            ticker: ticker.to_string(),
            units,
        }
    }
}

/// An account as discovered on the device, or as already known to the wallet.
/// Immutable once received: a later account with the same id within one scan
/// is a duplicate, not an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub currency_id: String,
    pub address: String,
    pub derivation_path: String,
    pub balance: Decimal,
    pub block_height: u64,
    pub operation_count: u32,
}

impl Account {
    /// An empty account has never been used: no balance and no history. Such
    /// accounts are offered for creation rather than import.
    pub fn is_empty(&self) -> bool {
        self.balance.is_zero() && self.operation_count == 0
    }
}

/// Events produced by one device account scan.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Account(Account),
    Complete,
    Error(BridgeError),
}

/// The contract a per-chain integration must implement. The returned stream
/// may emit accounts in any order and may repeat an id; it completes when the
/// bridge's empty-account-stopping heuristic is satisfied, or errors if the
/// device is in a bad state.
#[async_trait]
pub trait CurrencyBridge: Send + Sync {
    async fn scan_accounts_on_device(
        &self,
        currency: &Currency,
        device_path: &str,
    ) -> Result<ScanSubscription>;
}

/// Create a linked emitter/subscription pair for a scan stream.
pub fn scan_stream(buffer: usize) -> (ScanEmitter, ScanSubscription) {
    let (tx, rx) = mpsc::channel(buffer);
    let (handle, signal) = cancellation();
    (
        ScanEmitter { tx, signal },
        ScanSubscription { rx, handle },
    )
}

/// Producer half of a scan stream, held by the bridge implementation.
/// Terminal events consume the emitter, so a stream cannot emit twice.
pub struct ScanEmitter {
    tx: mpsc::Sender<ScanEvent>,
    signal: CancelSignal,
}

impl ScanEmitter {
    /// Emit one discovered account. Returns false once the consumer cancelled
    /// or went away; producers should stop scanning at that point.
    pub async fn account(&self, account: Account) -> bool {
        if self.signal.is_cancelled() {
            return false;
        }
        self.tx.send(ScanEvent::Account(account)).await.is_ok()
    }

    pub async fn complete(self) {
        if !self.signal.is_cancelled() {
            let _ = self.tx.send(ScanEvent::Complete).await;
        }
    }

    pub async fn error(self, err: BridgeError) {
        if !self.signal.is_cancelled() {
            let _ = self.tx.send(ScanEvent::Error(err)).await;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolve when the consumer cancels; bridges holding a device handle
    /// release it after this fires.
    pub async fn cancelled(&mut self) {
        self.signal.cancelled().await
    }
}

/// Consumer half of a scan stream.
pub struct ScanSubscription {
    rx: mpsc::Receiver<ScanEvent>,
    handle: CancelHandle,
}

impl ScanSubscription {
    pub async fn next(&mut self) -> Option<ScanEvent> {
        self.rx.recv().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Cooperative cancel; a no-op on an already-finished stream.
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn account(id: &str, balance: i64, operations: u32) -> Account {
        Account {
            id: id.to_string(),
            currency_id: "bitcoin".to_string(),
            address: format!("addr-{}", id),
            derivation_path: "m/44'/0'/0'/0/0".to_string(),
            balance: Decimal::from(balance),
            block_height: 100,
            operation_count: operations,
        }
    }

    #[test]
    fn test_empty_account_detection() {
        assert!(account("a", 0, 0).is_empty());
        assert!(!account("b", 5, 0).is_empty());
        assert!(!account("c", 0, 3).is_empty());
    }

    #[tokio::test]
    async fn test_stream_delivers_in_order_then_completes() {
        let (emitter, mut sub) = scan_stream(8);

        tokio::spawn(async move {
            emitter.account(account("a", 1, 1)).await;
            emitter.account(account("b", 0, 0)).await;
            emitter.complete().await;
        });

        match sub.next().await {
            Some(ScanEvent::Account(a)) => assert_eq!(a.id, "a"),
            other => panic!("unexpected event: {:?}", other.is_some()),
        }
        match sub.next().await {
            Some(ScanEvent::Account(a)) => assert_eq!(a.id, "b"),
            _ => panic!("expected second account"),
        }
        assert!(matches!(sub.next().await, Some(ScanEvent::Complete)));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_stops_emission() {
        let (emitter, sub) = scan_stream(8);
        sub.cancel();
        assert!(!emitter.account(account("a", 1, 1)).await);
        // Cancelling again is a no-op.
        sub.cancel();
    }
}
