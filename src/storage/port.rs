//! The Storage Port (§4.D): a single abstraction over a fast cache (`KVStore`) and
//! a durable store (`DocStore`), composed internally per `WritePolicy`. Callers
//! everywhere else in the gateway depend on this, not on `KVStore`/`DocStore`
//! directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::clock::Clock;
use crate::ports::docstore::DocStore;
use crate::ports::kvstore::KVStore;
use crate::ports::metrics::Metrics;
use crate::support::circuit_breaker::{CircuitBreaker, CircuitState};

use super::config::{StorageConfig, WritePolicy};
use super::envelope;

const DURABLE_COLLECTION: &str = "storage_entries";
const SCAN_COUNT_FLOOR: usize = 10;
const SCAN_COUNT_CEILING: usize = 1000;
const SCAN_COUNT_INITIAL: usize = 100;

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageStats {
    pub hits: u64,
    pub misses: u64,
    pub operations: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub breaker_state: CircuitState,
    pub fast_cache_reachable: bool,
}

pub struct StoragePort {
    fast: Arc<dyn KVStore>,
    durable: Arc<dyn DocStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    config: StorageConfig,
    breaker: CircuitBreaker,
    scan_count: AtomicUsize,
    stats: Stats,
    /// Per-key singleflight locks for `getOrSet` (§5, §8 S3).
    inflight: DashMap<String, Arc<AsyncMutex<()>>>,
}

impl StoragePort {
    pub fn new(
        fast: Arc<dyn KVStore>,
        durable: Arc<dyn DocStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        config: StorageConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker);
        Self {
            fast,
            durable,
            clock,
            metrics,
            config,
            breaker,
            scan_count: AtomicUsize::new(SCAN_COUNT_INITIAL),
            stats: Stats::default(),
            inflight: DashMap::new(),
        }
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            operations: self.stats.operations.load(Ordering::Relaxed),
        }
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport { breaker_state: self.breaker.state(), fast_cache_reachable: self.fast.ping().await.is_ok() }
    }

    pub async fn ping(&self) -> GatewayResult<()> {
        self.fast.ping().await
    }

    pub async fn get(&self, key: &str) -> GatewayResult<Option<Value>> {
        self.stats.operations.fetch_add(1, Ordering::Relaxed);

        if let Some(bytes) = self.fast.get(key).await? {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(envelope::decode(&bytes)?.data));
        }

        if matches!(self.config.write_policy, WritePolicy::CacheOnly) {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        match self.durable.get(DURABLE_COLLECTION, key).await? {
            Some(doc) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let data = doc.get("data").cloned().unwrap_or(Value::Null);
                if self.config.refill_cache_on_read_through {
                    let stored_at = self.clock.now_millis();
                    let bytes = envelope::encode(&data, None, stored_at, self.config.compression_threshold_bytes)?;
                    self.fast.set(key, bytes, Some(self.config.default_ttl_secs)).await?;
                }
                Ok(Some(data))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    pub async fn set(&self, key: &str, value: Value, ttl_seconds: Option<u64>) -> GatewayResult<()> {
        self.stats.operations.fetch_add(1, Ordering::Relaxed);
        let stored_at = self.clock.now_millis();

        if !matches!(self.config.write_policy, WritePolicy::PersistentOnly) {
            let bytes = envelope::encode(&value, None, stored_at, self.config.compression_threshold_bytes)?;
            self.fast.set(key, bytes, ttl_seconds.or(Some(self.config.default_ttl_secs))).await?;
        }
        if !matches!(self.config.write_policy, WritePolicy::CacheOnly) {
            let doc = json!({"data": value, "stored_at_millis": stored_at});
            self.durable.put(DURABLE_COLLECTION, key, doc).await?;
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.fast.delete(key).await?;
        self.durable.delete(DURABLE_COLLECTION, key).await?;
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> GatewayResult<bool> {
        if self.fast.exists(key).await? {
            return Ok(true);
        }
        if matches!(self.config.write_policy, WritePolicy::CacheOnly) {
            return Ok(false);
        }
        Ok(self.durable.get(DURABLE_COLLECTION, key).await?.is_some())
    }

    /// Deduplicates repeated keys within the call (§4.D "batchGet is read-coalescing").
    pub async fn batch_get(&self, keys: &[String]) -> GatewayResult<HashMap<String, Value>> {
        let mut unique = Vec::new();
        for key in keys {
            if !unique.contains(key) {
                unique.push(key.clone());
            }
        }
        let mut out = HashMap::with_capacity(unique.len());
        for key in unique {
            if let Some(value) = self.get(&key).await? {
                out.insert(key, value);
            }
        }
        Ok(out)
    }

    pub async fn batch_set(&self, items: &[(String, Value)], ttl_seconds: Option<u64>) -> GatewayResult<()> {
        for (key, value) in items {
            self.set(key, value.clone(), ttl_seconds).await?;
        }
        Ok(())
    }

    pub async fn batch_delete(&self, keys: &[String]) -> GatewayResult<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// At-most-one concurrent `factory` invocation per key (§5, §8 S3): callers for
    /// the same key serialize on a per-key async mutex; the first to acquire it
    /// populates the cache, the rest observe the resulting hit.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl_seconds: Option<u64>, factory: F) -> GatewayResult<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = GatewayResult<Value>> + Send,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }

        let lock = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let result = match self.get(key).await? {
            Some(value) => Ok(value),
            None => match factory().await {
                Ok(value) => {
                    self.set(key, value.clone(), ttl_seconds).await?;
                    Ok(value)
                }
                Err(err) => Err(err),
            },
        };

        drop(_guard);
        if Arc::strong_count(&lock) <= 2 {
            self.inflight.remove(key);
        }
        result
    }

    /// Circuit-breaker-guarded SCAN over the fast cache's keyspace, deleting every
    /// match from both backends (§4.C's breaker, reused verbatim here per §4.D
    /// "uses the circuit-breaker-guarded SCAN described in §4.C").
    pub async fn clear(&self, pattern: &str) -> GatewayResult<()> {
        if !self.breaker.allow() {
            return Ok(());
        }

        let count = self.scan_count.load(Ordering::Relaxed).clamp(SCAN_COUNT_FLOOR, SCAN_COUNT_CEILING);
        let budget = count.min(self.config.max_keys_prevention);

        let outcome = tokio::time::timeout(self.config.scan_timeout, self.fast.scan(pattern, budget)).await;
        match outcome {
            Ok(Ok(keys)) => {
                self.breaker.record_success();
                if keys.len() < budget / 2 {
                    let widened = (self.scan_count.load(Ordering::Relaxed) * 2).min(SCAN_COUNT_CEILING);
                    self.scan_count.store(widened, Ordering::Relaxed);
                }
                for key in keys {
                    self.delete(&key).await?;
                }
                Ok(())
            }
            Ok(Err(err)) => {
                self.breaker.record_failure();
                Err(err)
            }
            Err(_timeout) => {
                self.breaker.record_failure();
                let narrowed = (self.scan_count.load(Ordering::Relaxed) / 2).max(SCAN_COUNT_FLOOR);
                self.scan_count.store(narrowed, Ordering::Relaxed);
                if self.breaker.state() == CircuitState::Open {
                    Ok(())
                } else {
                    Err(GatewayError::new(codes::STORAGE_SYSTEM_TIMEOUT, format!("SCAN over pattern '{pattern}' timed out")))
                }
            }
        }
    }

    pub async fn scan(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>> {
        self.fast.scan(pattern, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::metrics::NoopMetrics;
    use crate::testutil::{InMemoryDocStore, InMemoryKVStore};
    use std::sync::atomic::AtomicU64 as StdAtomicU64;
    use std::time::Duration as StdDuration;

    fn port() -> StoragePort {
        let clock = Arc::new(FixedClock::new(0));
        let fast = Arc::new(InMemoryKVStore::new(Arc::new({
            let clock = clock.clone();
            move || clock.now_millis()
        })));
        let durable = Arc::new(InMemoryDocStore::new());
        StoragePort::new(fast, durable, clock, Arc::new(NoopMetrics), StorageConfig::default())
    }

    #[tokio::test]
    async fn set_then_get_round_trips_through_envelope() {
        let port = port();
        port.set("k1", json!({"a": 1}), None).await.unwrap();
        assert_eq!(port.get("k1").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn batch_get_dedupes_repeated_keys() {
        let port = port();
        port.set("k1", json!(1), None).await.unwrap();
        let result = port.batch_get(&["k1".into(), "k1".into(), "missing".into()]).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result["k1"], json!(1));
    }

    #[tokio::test]
    async fn get_or_set_invokes_factory_exactly_once_under_concurrency() {
        let port = Arc::new(port());
        let calls = Arc::new(StdAtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let port = port.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                port.get_or_set("shared", None, || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(10)).await;
                        Ok(json!({"v": 42}))
                    }
                })
                .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!({"v": 42}));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_both_backends() {
        let port = port();
        port.set("k1", json!(1), None).await.unwrap();
        port.delete("k1").await.unwrap();
        assert_eq!(port.get("k1").await.unwrap(), None);
    }
}
