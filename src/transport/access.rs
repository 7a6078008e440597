use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

/// The hardware device is a single exclusive resource: only one invocation may
/// hold it at a time. `DeviceAccess` keeps one async mutex per device path; a
/// second invocation for the same path waits until the first releases.
///
/// The guard is released when the holding task returns, including when it is
/// cancelled mid-operation, so a subsequent invocation can reacquire the
/// device.
#[derive(Clone, Default)]
pub struct DeviceAccess {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DeviceAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, path: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.write().await;
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        debug!("🔐 Waiting for exclusive access to device {}", path);
        let guard = lock.lock_owned().await;
        debug!("🔐 Acquired device {}", path);
        guard
    }
}
