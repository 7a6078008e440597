use indexmap::IndexSet;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::bridge::{Account, Currency, CurrencyBridge, ScanEvent, ScanSubscription};
use crate::errors::{remap_device_error, BridgeError};
use crate::utils::CancelHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Scanning,
    Finished,
    Error,
}

/// In-memory state of one "add accounts" workflow visit. Owned by exactly one
/// `ScanController`; reset on retry; gone when the wizard closes.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub status: ScanStatus,
    /// Append-only, deduplicated by id, first-occurrence order preserved.
    pub scanned_accounts: Vec<Account>,
    pub checked_account_ids: IndexSet<String>,
    pub error: Option<BridgeError>,
    /// Generation stamp: events from a cancelled subscription no longer match
    /// and are dropped, so two scans can never interleave into one session.
    scan_id: Uuid,
}

impl ScanSession {
    fn new() -> Self {
        Self {
            status: ScanStatus::Idle,
            scanned_accounts: Vec::new(),
            checked_account_ids: IndexSet::new(),
            error: None,
            scan_id: Uuid::new_v4(),
        }
    }
}

/// Partial update applied through `set_scanned_accounts`; absent fields are
/// left untouched.
#[derive(Debug, Default)]
pub struct ScannedAccountsUpdate {
    pub scanned_accounts: Option<Vec<Account>>,
    pub checked_account_ids: Option<IndexSet<String>>,
}

struct ActiveScan {
    cancel: CancelHandle,
    task: JoinHandle<()>,
}

/// Drives one device account scan: subscribes to the currency bridge, merges
/// incoming accounts into the session, and owns the at-most-one-live-
/// subscription invariant. All re-entrant start/stop/retry calls funnel
/// through one lock so a new subscription is only installed after the
/// previous one is cancelled.
pub struct ScanController {
    bridge: Arc<dyn CurrencyBridge>,
    currency: Currency,
    existing_ids: HashSet<String>,
    state: Arc<RwLock<ScanSession>>,
    active: Arc<Mutex<Option<ActiveScan>>>,
}

impl ScanController {
    pub fn new(
        bridge: Arc<dyn CurrencyBridge>,
        currency: Currency,
        existing_accounts: &[Account],
    ) -> Self {
        Self {
            bridge,
            currency,
            existing_ids: existing_accounts.iter().map(|a| a.id.clone()).collect(),
            state: Arc::new(RwLock::new(ScanSession::new())),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Snapshot of the current session state.
    pub async fn session(&self) -> ScanSession {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> ScanStatus {
        self.state.read().await.status
    }

    /// Enter `Scanning`: cancel any previous live subscription, then open a
    /// new one through the bridge. A subscription failure lands the session in
    /// `Error` with the remapped cause.
    pub async fn start_scan(&self, device_path: &str) {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            debug!("🔎 Replacing live scan subscription");
            prev.cancel.cancel();
        }

        let scan_id = Uuid::new_v4();
        {
            let mut session = self.state.write().await;
            session.status = ScanStatus::Scanning;
            session.error = None;
            session.scan_id = scan_id;
        }

        info!(
            "🔎 Scanning {} accounts on device {}",
            self.currency.id, device_path
        );

        let subscription = match self
            .bridge
            .scan_accounts_on_device(&self.currency, device_path)
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                let remapped = remap_device_error(err, &self.currency.name);
                error!("🔎 Could not start account scan: {}", remapped);
                let mut session = self.state.write().await;
                if session.scan_id == scan_id {
                    session.status = ScanStatus::Error;
                    session.error = Some(remapped);
                }
                return;
            }
        };

        let cancel = subscription.cancel_handle();
        let worker = ScanWorker {
            state: self.state.clone(),
            existing_ids: self.existing_ids.clone(),
            app_name: self.currency.name.clone(),
            scan_id,
        };
        let task = tokio::spawn(worker.run(subscription));
        *active = Some(ActiveScan { cancel, task });
    }

    /// Manual stop: transition straight to `Finished` without waiting for the
    /// bridge, cancelling the subscription.
    pub async fn stop_scan(&self) {
        self.cancel_active().await;
        let mut session = self.state.write().await;
        if session.status == ScanStatus::Scanning {
            session.status = ScanStatus::Finished;
        }
    }

    /// Retry after an error (or deliberate rescan): clear accumulated state
    /// and re-enter `Scanning`.
    pub async fn retry(&self, device_path: &str) {
        self.reset_scan_state().await;
        self.start_scan(device_path).await;
    }

    /// Unconditional teardown when the wizard closes: cancel whatever is
    /// live, whatever the state.
    pub async fn teardown(&self) {
        self.cancel_active().await;
    }

    /// Mutation entry point for presentation: set the scan status directly.
    /// Leaving `Scanning` cancels the live subscription; entering it does not
    /// subscribe (that is `start_scan`'s job).
    pub async fn set_scan_status(&self, status: ScanStatus, error: Option<BridgeError>) {
        if matches!(status, ScanStatus::Finished | ScanStatus::Error) {
            self.cancel_active().await;
        }
        let mut session = self.state.write().await;
        session.status = status;
        session.error = error;
    }

    /// Mutation entry point for presentation: replace account/selection state
    /// wholesale. Scan-event merging goes through the worker instead.
    pub async fn set_scanned_accounts(&self, update: ScannedAccountsUpdate) {
        let mut session = self.state.write().await;
        if let Some(accounts) = update.scanned_accounts {
            session.scanned_accounts = accounts;
        }
        if let Some(checked) = update.checked_account_ids {
            session.checked_account_ids = checked;
        }
    }

    /// Clear accounts, selection and error, back to `Idle`.
    pub async fn reset_scan_state(&self) {
        let mut session = self.state.write().await;
        *session = ScanSession::new();
    }

    /// Toggle one account in the selection. Purely a set operation; scanned
    /// accounts are never touched.
    pub async fn toggle_account(&self, account_id: &str) {
        let mut session = self.state.write().await;
        if !session.checked_account_ids.shift_remove(account_id) {
            session.checked_account_ids.insert(account_id.to_string());
        }
    }

    /// Select every displayed account: set union over the ids.
    pub async fn select_all(&self, accounts: &[Account]) {
        let mut session = self.state.write().await;
        for account in accounts {
            session.checked_account_ids.insert(account.id.clone());
        }
    }

    /// Unselect every displayed account: set difference over the ids.
    pub async fn unselect_all(&self, accounts: &[Account]) {
        let mut session = self.state.write().await;
        for account in accounts {
            session.checked_account_ids.shift_remove(&account.id);
        }
    }

    async fn cancel_active(&self) {
        let mut active = self.active.lock().await;
        if let Some(prev) = active.take() {
            prev.cancel.cancel();
            prev.task.abort();
        }
    }
}

/// Consumes one bridge subscription and applies its events to the session.
/// Every application is guarded by the scan generation id, so a worker whose
/// subscription was replaced can never mutate the fresh session.
struct ScanWorker {
    state: Arc<RwLock<ScanSession>>,
    existing_ids: HashSet<String>,
    app_name: String,
    scan_id: Uuid,
}

impl ScanWorker {
    async fn run(self, mut subscription: ScanSubscription) {
        while let Some(event) = subscription.next().await {
            match event {
                ScanEvent::Account(account) => self.apply_account(account).await,
                ScanEvent::Complete => {
                    info!("🔎 Account scan complete");
                    let mut session = self.state.write().await;
                    if session.scan_id == self.scan_id {
                        session.status = ScanStatus::Finished;
                    }
                    // Cancelling an already-completed stream is a no-op.
                    subscription.cancel();
                    return;
                }
                ScanEvent::Error(err) => {
                    error!("🔎 Account scan failed: {}", err);
                    let remapped = remap_device_error(err, &self.app_name);
                    let mut session = self.state.write().await;
                    if session.scan_id == self.scan_id {
                        session.status = ScanStatus::Error;
                        session.error = Some(remapped);
                    }
                    subscription.cancel();
                    return;
                }
            }
        }
    }

    /// Merge one incoming account: append iff its id is unseen; auto-check
    /// iff it is neither already imported into the wallet nor empty.
    async fn apply_account(&self, account: Account) {
        let mut session = self.state.write().await;
        if session.scan_id != self.scan_id {
            debug!("🔎 Dropping account from a replaced scan");
            return;
        }

        let already_scanned = session
            .scanned_accounts
            .iter()
            .any(|a| a.id == account.id);
        if already_scanned {
            debug!("🔎 Duplicate account {} ignored", account.id);
            return;
        }

        let already_imported = self.existing_ids.contains(&account.id);
        if !already_imported && !account.is_empty() {
            session.checked_account_ids.insert(account.id.clone());
        }
        session.scanned_accounts.push(account);
    }
}
