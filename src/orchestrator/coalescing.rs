//! Per-key coalescing (§5 "Per-key coalescing"): at most one in-flight
//! fetch/factory per key across the process. Additional callers wait on the same
//! key's lock rather than re-invoking the factory; a waiter that exceeds
//! `operation_timeout` gives up without cancelling the in-flight work for other
//! waiters.
//!
//! Grounded on `storage::port::StoragePort::get_or_set`'s double-checked-locking
//! table, generalized here with an explicit wait timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{codes, GatewayError, GatewayResult};

/// A table of per-key async locks. Entries are cleaned up once no other task is
/// waiting on them (`Arc::strong_count(lock) <= 2`: one held by the table, one by
/// the last guard holder).
pub struct CoalescingLocks {
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl Default for CoalescingLocks {
    fn default() -> Self {
        Self { locks: DashMap::new() }
    }
}

impl CoalescingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `work` with the per-key lock held, giving up after `timeout` if the
    /// lock could not be acquired in time.
    pub async fn run<F, Fut, T>(&self, key: &str, timeout: Duration, work: F) -> GatewayResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = GatewayResult<T>>,
    {
        let lock = self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone();

        let guard = match tokio::time::timeout(timeout, lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Err(GatewayError::new(
                    codes::SMART_CACHE_SYSTEM_FETCH_TIMEOUT,
                    format!("timed out waiting for coalescing lock on key '{key}'"),
                ))
            }
        };

        let result = work().await;
        drop(guard);

        if Arc::strong_count(&lock) <= 2 {
            self.locks.remove(key);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn concurrent_callers_for_same_key_run_work_once_each_in_turn() {
        let locks = Arc::new(CoalescingLocks::new());
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let locks = locks.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                locks
                    .run("k", StdDuration::from_secs(5), || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, GatewayError>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn wait_beyond_timeout_returns_timeout_error() {
        let locks = Arc::new(CoalescingLocks::new());
        let locks2 = locks.clone();

        let holder = tokio::spawn(async move {
            locks2
                .run("k", StdDuration::from_secs(5), || async {
                    tokio::time::sleep(StdDuration::from_millis(200)).await;
                    Ok::<_, GatewayError>(())
                })
                .await
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;

        let result = locks.run("k", StdDuration::from_millis(10), || async { Ok::<_, GatewayError>(()) }).await;
        assert!(result.is_err());
        holder.await.unwrap().unwrap();
    }
}
