//! Per-capture serialization of finalize and delete operations.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per capture id. Operations on different ids
/// never contend; operations on the same id run one at a time.
#[derive(Clone, Default)]
pub struct CaptureLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CaptureLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `capture_id`. The guard may be moved
    /// into a stream that outlives the caller.
    pub async fn acquire(&self, capture_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            // drop entries nobody is holding or waiting on
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(capture_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_capture_is_exclusive() {
        let locks = CaptureLocks::new();
        let guard = locks.acquire("cap-1").await;

        assert!(
            timeout(Duration::from_millis(50), locks.acquire("cap-1"))
                .await
                .is_err()
        );
        drop(guard);
        assert!(
            timeout(Duration::from_millis(50), locks.acquire("cap-1"))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn different_captures_do_not_contend() {
        let locks = CaptureLocks::new();
        let _a = locks.acquire("cap-1").await;

        assert!(
            timeout(Duration::from_millis(50), locks.acquire("cap-2"))
                .await
                .is_ok()
        );
    }
}
