use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use device_bridge::bridge::{
    scan_stream, Account, Currency, CurrencyBridge, ScanSubscription,
};
use device_bridge::errors::{BridgeError, Result};
use device_bridge::scan::{ScanController, ScanSession, ScanStatus, ScannedAccountsUpdate};
use device_bridge::utils::CancelHandle;

fn account(id: &str, balance: i64, operations: u32) -> Account {
    Account {
        id: id.to_string(),
        currency_id: "bitcoin".to_string(),
        address: format!("addr-{}", id),
        derivation_path: "m/44'/0'/0'/0/0".to_string(),
        balance: Decimal::from(balance),
        block_height: 800_000,
        operation_count: operations,
    }
}

fn bitcoin() -> Currency {
    Currency::new("bitcoin", "Bitcoin", "BTC", 8)
}

/// One scripted step of a mock scan.
#[derive(Clone)]
enum Step {
    Account(Account),
    Complete,
    Error(BridgeError),
    /// Hold the stream open until the consumer cancels.
    Hold,
}

/// Bridge that plays one script per subscription and records enough to check
/// the single-live-subscription invariant.
struct ScriptedBridge {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    handles: Mutex<Vec<CancelHandle>>,
    subscriptions: AtomicUsize,
}

impl ScriptedBridge {
    fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            handles: Mutex::new(Vec::new()),
            subscriptions: AtomicUsize::new(0),
        })
    }

    fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    fn last_handle(&self) -> CancelHandle {
        self.handles.lock().unwrap().last().unwrap().clone()
    }
}

#[async_trait]
impl CurrencyBridge for ScriptedBridge {
    async fn scan_accounts_on_device(
        &self,
        _currency: &Currency,
        _device_path: &str,
    ) -> Result<ScanSubscription> {
        // A new subscription may only be issued once every previous one has
        // been cancelled.
        for handle in self.handles.lock().unwrap().iter() {
            assert!(
                handle.is_cancelled(),
                "new subscription issued while a previous one was live"
            );
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();

        let (mut emitter, subscription) = scan_stream(16);
        self.handles
            .lock()
            .unwrap()
            .push(subscription.cancel_handle());
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            for step in script {
                match step {
                    Step::Account(account) => {
                        if !emitter.account(account).await {
                            return;
                        }
                    }
                    Step::Complete => {
                        emitter.complete().await;
                        return;
                    }
                    Step::Error(err) => {
                        emitter.error(err).await;
                        return;
                    }
                    Step::Hold => {
                        emitter.cancelled().await;
                        return;
                    }
                }
            }
            emitter.cancelled().await;
        });

        Ok(subscription)
    }
}

/// Bridge whose subscription attempt itself fails.
struct FailingBridge(BridgeError);

#[async_trait]
impl CurrencyBridge for FailingBridge {
    async fn scan_accounts_on_device(
        &self,
        _currency: &Currency,
        _device_path: &str,
    ) -> Result<ScanSubscription> {
        Err(self.0.clone())
    }
}

async fn wait_for(
    controller: &ScanController,
    pred: impl Fn(&ScanSession) -> bool,
) -> ScanSession {
    for _ in 0..400 {
        let session = controller.session().await;
        if pred(&session) {
            return session;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("scan session never reached the expected state");
}

#[tokio::test]
async fn test_duplicate_ids_are_kept_once_in_first_occurrence_order() {
    let mut duplicate = account("a", 7, 1);
    duplicate.balance = Decimal::from(9); // same id, different content

    let bridge = ScriptedBridge::new(vec![vec![
        Step::Account(account("a", 7, 1)),
        Step::Account(account("b", 3, 2)),
        Step::Account(duplicate),
        Step::Account(account("c", 1, 1)),
        Step::Complete,
    ]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Finished).await;

    let ids: Vec<_> = session.scanned_accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    // The duplicate is a duplicate, not an update.
    assert_eq!(session.scanned_accounts[0].balance, Decimal::from(7));
}

#[tokio::test]
async fn test_scan_to_finished_auto_checks_only_new_non_empty_accounts() {
    let bridge = ScriptedBridge::new(vec![vec![
        Step::Account(account("a", 10, 2)),
        Step::Account(account("b", 0, 0)),
        Step::Complete,
    ]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Finished).await;

    let ids: Vec<_> = session.scanned_accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!(session.checked_account_ids.contains("a"));
    // Empty accounts stay unchecked by default.
    assert!(!session.checked_account_ids.contains("b"));
}

#[tokio::test]
async fn test_already_imported_account_is_scanned_but_not_checked() {
    let existing = vec![account("a", 10, 2)];
    let bridge = ScriptedBridge::new(vec![vec![
        Step::Account(account("a", 10, 2)),
        Step::Complete,
    ]]);
    let controller = ScanController::new(bridge, bitcoin(), &existing);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Finished).await;

    assert_eq!(session.scanned_accounts.len(), 1);
    assert!(session.checked_account_ids.is_empty());
}

#[tokio::test]
async fn test_manual_stop_finishes_without_bridge_completion() {
    let bridge = ScriptedBridge::new(vec![vec![
        Step::Account(account("a", 10, 2)),
        Step::Hold,
    ]]);
    let controller = ScanController::new(bridge.clone(), bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    wait_for(&controller, |s| !s.scanned_accounts.is_empty()).await;

    controller.stop_scan().await;
    let session = controller.session().await;
    assert_eq!(session.status, ScanStatus::Finished);
    assert!(bridge.last_handle().is_cancelled());
}

#[tokio::test]
async fn test_retry_after_error_clears_state_and_rescans() {
    let bridge = ScriptedBridge::new(vec![
        vec![
            Step::Account(account("stale", 4, 1)),
            Step::Error(BridgeError::device("device unplugged")),
        ],
        vec![Step::Account(account("fresh", 6, 1)), Step::Complete],
    ]);
    let controller = ScanController::new(bridge.clone(), bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Error).await;
    assert!(session.error.is_some());
    assert!(!session.scanned_accounts.is_empty());

    controller.retry("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Finished).await;

    let ids: Vec<_> = session.scanned_accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["fresh"]);
    assert!(session.error.is_none());
    assert_eq!(bridge.subscription_count(), 2);
}

#[tokio::test]
async fn test_restart_cancels_previous_subscription_and_never_interleaves() {
    let bridge = ScriptedBridge::new(vec![
        vec![Step::Account(account("gen1-a", 5, 1)), Step::Hold],
        vec![Step::Account(account("gen2-a", 8, 1)), Step::Complete],
    ]);
    let controller = ScanController::new(bridge.clone(), bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    wait_for(&controller, |s| !s.scanned_accounts.is_empty()).await;

    // The ScriptedBridge itself asserts that subscription two is only issued
    // once subscription one is cancelled.
    controller.retry("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Finished).await;

    let ids: Vec<_> = session.scanned_accounts.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["gen2-a"]);
    assert_eq!(bridge.subscription_count(), 2);
}

#[tokio::test]
async fn test_teardown_cancels_in_any_state() {
    let bridge = ScriptedBridge::new(vec![vec![Step::Hold]]);
    let controller = ScanController::new(bridge.clone(), bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    wait_for(&controller, |s| s.status == ScanStatus::Scanning).await;

    controller.teardown().await;
    assert!(bridge.last_handle().is_cancelled());
}

#[tokio::test]
async fn test_stream_error_is_remapped_at_the_session_boundary() {
    let bridge = ScriptedBridge::new(vec![vec![Step::Error(
        BridgeError::device_named("BtcUnmatchedApp", "wrong app"),
    )]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Error).await;

    assert_eq!(
        session.error,
        Some(BridgeError::WrongAppOpen("Bitcoin".to_string()))
    );
}

#[tokio::test]
async fn test_subscribe_failure_is_remapped_too() {
    let bridge = Arc::new(FailingBridge(BridgeError::device_status(0x6982, "refused")));
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Error).await;

    assert_eq!(
        session.error,
        Some(BridgeError::WrongAppOpen("Bitcoin".to_string()))
    );
}

#[tokio::test]
async fn test_unknown_error_shapes_pass_through_unchanged() {
    let raw = BridgeError::device_status(0x6f00, "flipped bit");
    let bridge = ScriptedBridge::new(vec![vec![Step::Error(raw.clone())]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let session = wait_for(&controller, |s| s.status == ScanStatus::Error).await;
    assert_eq!(session.error, Some(raw));
}

#[tokio::test]
async fn test_toggle_twice_is_idempotent() {
    let bridge = ScriptedBridge::new(vec![vec![
        Step::Account(account("a", 10, 2)),
        Step::Complete,
    ]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    let before = wait_for(&controller, |s| s.status == ScanStatus::Finished)
        .await
        .checked_account_ids;

    controller.toggle_account("a").await;
    controller.toggle_account("a").await;
    assert_eq!(controller.session().await.checked_account_ids, before);

    // Scanned accounts are never touched by selection ops.
    assert_eq!(controller.session().await.scanned_accounts.len(), 1);
}

#[tokio::test]
async fn test_presentation_mutation_surface() {
    let bridge = ScriptedBridge::new(vec![vec![Step::Hold]]);
    let controller = ScanController::new(bridge.clone(), bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    wait_for(&controller, |s| s.status == ScanStatus::Scanning).await;

    controller
        .set_scanned_accounts(ScannedAccountsUpdate {
            scanned_accounts: Some(vec![account("injected", 2, 1)]),
            checked_account_ids: None,
        })
        .await;
    assert_eq!(controller.session().await.scanned_accounts.len(), 1);

    // Leaving `Scanning` through the status setter also cancels the live
    // subscription.
    controller
        .set_scan_status(ScanStatus::Error, Some(BridgeError::device("gone")))
        .await;
    let session = controller.session().await;
    assert_eq!(session.status, ScanStatus::Error);
    assert!(session.error.is_some());
    assert!(bridge.last_handle().is_cancelled());

    controller.reset_scan_state().await;
    let session = controller.session().await;
    assert_eq!(session.status, ScanStatus::Idle);
    assert!(session.scanned_accounts.is_empty());
    assert!(session.checked_account_ids.is_empty());
    assert!(session.error.is_none());
}

#[tokio::test]
async fn test_select_all_then_unselect_all_is_set_union_and_difference() {
    let a = account("a", 10, 2);
    let b = account("b", 4, 1);
    let bridge = ScriptedBridge::new(vec![vec![Step::Complete]]);
    let controller = ScanController::new(bridge, bitcoin(), &[]);

    controller.start_scan("usb/001").await;
    wait_for(&controller, |s| s.status == ScanStatus::Finished).await;
    controller.reset_scan_state().await;

    controller.select_all(&[a.clone(), b.clone()]).await;
    controller.unselect_all(&[a]).await;

    let checked = controller.session().await.checked_account_ids;
    assert_eq!(checked.len(), 1);
    assert!(checked.contains("b"));
}
