//! Serialization of access to the vendor library's global device state.
//!
//! The quTAG C library addresses one device at a time through process-global
//! state: every data call applies to whichever device was last passed to
//! `TDC_addressDevice`. Drivers must therefore hold the synchronizer across
//! the address call and the operation that follows it, or two sessions on
//! different devices would corrupt each other's targets.
//!
//! One synchronizer guards one vendor-library instance, so all drivers in a
//! process normally share [`TdcSynchronizer::global`]. Tests inject private
//! instances to exercise contention without cross-test interference.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::TdcError;

static GLOBAL: Lazy<TdcSynchronizer> = Lazy::new(TdcSynchronizer::new);

/// Async mutex over the vendor library's device-addressing state.
///
/// Cloning is cheap and shares the underlying lock.
#[derive(Debug, Clone)]
pub struct TdcSynchronizer {
    inner: Arc<Mutex<()>>,
}

impl TdcSynchronizer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// The process-wide synchronizer shared by all quTAG drivers.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Acquire the synchronizer, giving up after `timeout`.
    ///
    /// On timeout the guarded hardware operation has not started and the
    /// caller may safely retry later.
    pub async fn lock(&self, timeout: Duration) -> Result<MutexGuard<'_, ()>, TdcError> {
        tokio::time::timeout(timeout, self.inner.lock())
            .await
            .map_err(|_| TdcError::Timeout(timeout))
    }
}

impl Default for TdcSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_times_out_while_held() {
        let sync = TdcSynchronizer::new();
        let _held = sync.lock(Duration::from_millis(100)).await.unwrap();

        let contender = sync.clone();
        let err = contender
            .lock(Duration::from_millis(10))
            .await
            .expect_err("lock should time out while held");
        assert!(matches!(err, TdcError::Timeout(_)));
    }

    #[tokio::test]
    async fn lock_reacquires_after_release() {
        let sync = TdcSynchronizer::new();
        {
            let _held = sync.lock(Duration::from_millis(100)).await.unwrap();
        }
        assert!(sync.lock(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn clones_share_the_lock() {
        let a = TdcSynchronizer::new();
        let b = a.clone();
        let _held = a.lock(Duration::from_millis(100)).await.unwrap();
        assert!(b.lock(Duration::from_millis(10)).await.is_err());
    }
}
