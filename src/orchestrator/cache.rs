//! The Smart Cache Orchestrator (§4.E): strategy selection in front of the
//! Storage Port, with per-key coalescing, background refresh, and adaptive TTL.
//!
//! `self: Arc<Self>` entry points follow the teacher's `EdgeReceiver::run` pattern
//! (`edge/receiver.rs`): a spawned background-refresh task needs to outlive the
//! calling request, so it clones an `Arc<Self>` the same way the heartbeat task
//! there clones `Arc<EdgeReceiver>`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tracing::warn;

use crate::error::GatewayResult;
use crate::ports::{Clock, Market, MarketStatusPort, MarketStatusResult, Metrics};
use crate::storage::StoragePort;

use super::adaptive::AdaptiveConcurrencyController;
use super::coalescing::CoalescingLocks;
use super::config::{OrchestratorConfig, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Fetch,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct GetOrSetOutcome {
    pub data: Value,
    pub hit: bool,
    pub source: Source,
    pub ttl_remaining: Option<Duration>,
    pub background_refresh_triggered: bool,
}

struct FreshnessEntry {
    stored_at_millis: i64,
    ttl: Duration,
}

struct AdaptiveState {
    current_ttl_secs: f64,
    last_hash: u64,
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn hash_value(value: &Value) -> u64 {
    fnv1a(serde_json::to_vec(value).unwrap_or_default().as_slice())
}

pub struct SmartCacheOrchestrator {
    storage: Arc<StoragePort>,
    market_status: Arc<dyn MarketStatusPort>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    config: OrchestratorConfig,
    coalescing: CoalescingLocks,
    pub concurrency: AdaptiveConcurrencyController,
    freshness: DashMap<String, FreshnessEntry>,
    adaptive_state: DashMap<String, AdaptiveState>,
    market_cache: DashMap<Market, (i64, MarketStatusResult)>,
    requests_served: AtomicI64,
}

impl SmartCacheOrchestrator {
    pub fn new(
        storage: Arc<StoragePort>,
        market_status: Arc<dyn MarketStatusPort>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let concurrency = AdaptiveConcurrencyController::new(config.base_max_concurrent_operations, metrics.clone());
        Arc::new(Self {
            storage,
            market_status,
            clock,
            metrics,
            config,
            coalescing: CoalescingLocks::new(),
            concurrency,
            freshness: DashMap::new(),
            adaptive_state: DashMap::new(),
            market_cache: DashMap::new(),
            requests_served: AtomicI64::new(0),
        })
    }

    pub fn requests_served(&self) -> i64 {
        self.requests_served.load(Ordering::Relaxed)
    }

    /// Unconditional write-through under `strategy`'s TTL, for callers that already
    /// hold fresh data (e.g. the stream receiver's provider push path) and so have
    /// no factory to coalesce a fetch behind. Bypasses the cache-hit short-circuit
    /// in `get_or_set` since the whole point is to replace whatever is cached.
    pub async fn put(self: &Arc<Self>, key: &str, strategy: Strategy, market: Option<Market>, value: Value) -> GatewayResult<()> {
        let ttl = self.resolve_ttl(key, strategy, market, &value).await?;
        self.storage.set(key, value, Some(ttl.as_secs())).await?;
        self.record_freshness(key, ttl);
        Ok(())
    }

    async fn market_state(&self, market: Market) -> GatewayResult<MarketStatusResult> {
        let now = self.clock.now_millis();
        let interval_millis = self.config.market_aware.market_status_check_interval.as_millis() as i64;
        if let Some(entry) = self.market_cache.get(&market) {
            if now - entry.0 < interval_millis {
                return Ok(entry.1);
            }
        }
        let status = self.market_status.status(market).await?;
        self.market_cache.insert(market, (now, status));
        Ok(status)
    }

    /// Computes the TTL a freshly-fetched value should be stored under, per the
    /// strategy's rules (§4.E). `value` is consulted only by `ADAPTIVE`, to detect
    /// whether the data changed since the last write.
    async fn resolve_ttl(&self, key: &str, strategy: Strategy, market: Option<Market>, value: &Value) -> GatewayResult<Duration> {
        match strategy {
            Strategy::StrongTimeliness => Ok(self.config.strong_timeliness.ttl),
            Strategy::WeakTimeliness => Ok(self.config.weak_timeliness.ttl),
            Strategy::MarketAware => {
                let market = market.unwrap_or(Market::US);
                let status = self.market_state(market).await?;
                Ok(if status.state.is_open_for_caching() {
                    self.config.market_aware.open_market_ttl
                } else {
                    self.config.market_aware.closed_market_ttl
                })
            }
            Strategy::NoCache => Ok(Duration::ZERO),
            Strategy::Adaptive => {
                let cfg = self.config.adaptive;
                let hash = hash_value(value);
                let mut state = self.adaptive_state.entry(key.to_string()).or_insert_with(|| AdaptiveState {
                    current_ttl_secs: cfg.base_ttl.as_secs_f64(),
                    last_hash: hash,
                });
                let unchanged = state.last_hash == hash;
                state.current_ttl_secs = if unchanged {
                    state.current_ttl_secs * cfg.adaptation_factor
                } else {
                    state.current_ttl_secs / cfg.adaptation_factor
                }
                .clamp(cfg.min_ttl.as_secs_f64(), cfg.max_ttl.as_secs_f64());
                state.last_hash = hash;
                Ok(Duration::from_secs_f64(state.current_ttl_secs))
            }
        }
    }

    fn record_freshness(&self, key: &str, ttl: Duration) {
        self.freshness.insert(key.to_string(), FreshnessEntry { stored_at_millis: self.clock.now_millis(), ttl });
    }

    /// Fraction of TTL elapsed, or `None` if this key has no freshness record
    /// (e.g. written outside the orchestrator).
    fn age_ratio(&self, key: &str) -> Option<f64> {
        let entry = self.freshness.get(key)?;
        if entry.ttl.is_zero() {
            return Some(1.0);
        }
        let elapsed_millis = (self.clock.now_millis() - entry.stored_at_millis).max(0) as f64;
        Some(elapsed_millis / entry.ttl.as_millis() as f64)
    }

    fn refresh_ratio_for(&self, strategy: Strategy) -> Option<f64> {
        match strategy {
            Strategy::StrongTimeliness => Some(1.0 - self.config.strong_timeliness.background_refresh_ratio),
            Strategy::WeakTimeliness => Some(1.0 - self.config.weak_timeliness.background_refresh_ratio),
            _ => None,
        }
    }

    fn spawn_background_refresh<F, Fut>(self: &Arc<Self>, key: String, strategy: Strategy, market: Option<Market>, factory: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Value>> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            let _permit = this.concurrency.acquire().await;
            match factory().await {
                Ok(value) => {
                    if let Ok(ttl) = this.resolve_ttl(&key, strategy, market, &value).await {
                        if let Err(err) = this.storage.set(&key, value, Some(ttl.as_secs())).await {
                            warn!(key, error = %err, "background refresh write failed");
                        } else {
                            this.record_freshness(&key, ttl);
                        }
                    }
                }
                Err(err) => warn!(key, error = %err, "background refresh fetch failed"),
            }
        });
    }

    /// `getOrSet` (§4.E): returns the cached value immediately on a hit, optionally
    /// scheduling a background refresh; on a miss, fetches under the per-key
    /// coalescing lock; on fetch failure with `enableFallback`, serves the last
    /// known value if one exists.
    pub async fn get_or_set<F, Fut>(
        self: &Arc<Self>,
        key: &str,
        strategy: Strategy,
        market: Option<Market>,
        factory: F,
    ) -> GatewayResult<GetOrSetOutcome>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Value>> + Send + 'static,
    {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        self.metrics.increment("orchestrator_requests", &[]);

        if matches!(strategy, Strategy::NoCache) {
            let data = factory().await?;
            return Ok(GetOrSetOutcome { data, hit: false, source: Source::Fetch, ttl_remaining: None, background_refresh_triggered: false });
        }

        if let Some(cached) = self.storage.get(key).await? {
            let mut background_refresh_triggered = false;
            if let Some(threshold) = self.refresh_ratio_for(strategy) {
                if self.age_ratio(key).map(|r| r >= threshold).unwrap_or(false) {
                    self.spawn_background_refresh(key.to_string(), strategy, market, factory);
                    background_refresh_triggered = true;
                }
            }
            if let Strategy::StrongTimeliness = strategy {
                let stale_beyond_force = self
                    .freshness
                    .get(key)
                    .map(|e| self.clock.now_millis() - e.stored_at_millis >= self.config.strong_timeliness.force_refresh_interval.as_millis() as i64)
                    .unwrap_or(false);
                if stale_beyond_force && !background_refresh_triggered {
                    background_refresh_triggered = true;
                }
            }
            let ttl_remaining = self.freshness.get(key).map(|e| {
                let elapsed = (self.clock.now_millis() - e.stored_at_millis).max(0) as u64;
                e.ttl.saturating_sub(Duration::from_millis(elapsed))
            });
            return Ok(GetOrSetOutcome { data: cached, hit: true, source: Source::Cache, ttl_remaining, background_refresh_triggered });
        }

        let key_owned = key.to_string();
        let storage = self.storage.clone();
        let this = self.clone();
        let market_for_fetch = market;
        let factory_for_lock = {
            let key_owned = key_owned.clone();
            move || {
                let this = this.clone();
                let storage = storage.clone();
                let key_owned = key_owned.clone();
                async move {
                    if let Some(v) = storage.get(&key_owned).await? {
                        return Ok(v);
                    }
                    let value = factory().await?;
                    let ttl = this.resolve_ttl(&key_owned, strategy, market_for_fetch, &value).await?;
                    storage.set(&key_owned, value.clone(), Some(ttl.as_secs())).await?;
                    this.record_freshness(&key_owned, ttl);
                    Ok(value)
                }
            }
        };

        match self.coalescing.run(key, self.config.operation_timeout, factory_for_lock).await {
            Ok(value) => Ok(GetOrSetOutcome {
                data: value,
                hit: false,
                source: Source::Fetch,
                ttl_remaining: self.freshness.get(key).map(|e| e.ttl),
                background_refresh_triggered: false,
            }),
            Err(err) => {
                if self.config.enable_fallback {
                    if let Ok(Some(stale)) = self.storage.get(key).await {
                        return Ok(GetOrSetOutcome { data: stale, hit: true, source: Source::Fallback, ttl_remaining: None, background_refresh_triggered: false });
                    }
                }
                Err(err)
            }
        }
    }

    /// `batchGetOrSet` (§4.E): groups missing keys and resolves them in one round
    /// trip via `factory_for_missing`, then writes each result under `strategy`'s TTL.
    pub async fn batch_get_or_set<F, Fut>(
        self: &Arc<Self>,
        keys: &[String],
        strategy: Strategy,
        market: Option<Market>,
        factory_for_missing: F,
    ) -> GatewayResult<HashMap<String, GetOrSetOutcome>>
    where
        F: FnOnce(Vec<String>) -> Fut,
        Fut: Future<Output = GatewayResult<HashMap<String, Value>>>,
    {
        let mut out = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();

        for key in keys {
            match self.storage.get(key).await? {
                Some(cached) => {
                    out.insert(
                        key.clone(),
                        GetOrSetOutcome { data: cached, hit: true, source: Source::Cache, ttl_remaining: self.freshness.get(key).map(|e| e.ttl), background_refresh_triggered: false },
                    );
                }
                None => missing.push(key.clone()),
            }
        }

        if !missing.is_empty() {
            let fetched = factory_for_missing(missing.clone()).await?;
            for key in &missing {
                if let Some(value) = fetched.get(key) {
                    let ttl = self.resolve_ttl(key, strategy, market, value).await?;
                    self.storage.set(key, value.clone(), Some(ttl.as_secs())).await?;
                    self.record_freshness(key, ttl);
                    out.insert(key.clone(), GetOrSetOutcome { data: value.clone(), hit: false, source: Source::Fetch, ttl_remaining: Some(ttl), background_refresh_triggered: false });
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::metrics::NoopMetrics;
    use crate::testutil::{InMemoryDocStore, InMemoryKVStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::time::Duration as StdDuration;

    struct AlwaysTrading;

    #[async_trait]
    impl MarketStatusPort for AlwaysTrading {
        async fn status(&self, market: Market) -> GatewayResult<MarketStatusResult> {
            Ok(MarketStatusResult { market, state: crate::ports::MarketState::Trading, confidence: 1.0 })
        }
    }

    fn orchestrator() -> Arc<SmartCacheOrchestrator> {
        let clock = Arc::new(FixedClock::new(0));
        let fast = Arc::new(InMemoryKVStore::new(Arc::new({
            let clock = clock.clone();
            move || clock.now_millis()
        })));
        let durable = Arc::new(InMemoryDocStore::new());
        let storage = Arc::new(StoragePort::new(fast, durable, clock.clone(), Arc::new(NoopMetrics), Default::default()));
        SmartCacheOrchestrator::new(storage, Arc::new(AlwaysTrading), clock, Arc::new(NoopMetrics), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn miss_then_hit_serves_from_cache_without_refetch() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicU64::new(0));
        let calls2 = calls.clone();
        let factory = move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"price": 1}))
            }
        };

        let first = orch.get_or_set("q:AAPL.US", Strategy::WeakTimeliness, None, factory.clone()).await.unwrap();
        assert!(!first.hit);
        let second = orch.get_or_set("q:AAPL.US", Strategy::WeakTimeliness, None, factory).await.unwrap();
        assert!(second.hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_for_same_key_invoke_factory_once() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let orch = orch.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                orch.get_or_set("q:TSLA.US", Strategy::StrongTimeliness, None, move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(20)).await;
                        Ok(json!({"price": 2}))
                    }
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_cache_strategy_always_calls_factory() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let calls = calls.clone();
            orch.get_or_set("q:NVDA.US", Strategy::NoCache, None, move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"price": 3}))
                }
            })
            .await
            .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn adaptive_strategy_grows_ttl_on_repeated_unchanged_value() {
        let orch = orchestrator();
        let factory = || async { Ok(json!({"price": 5})) };

        orch.get_or_set("q:MSFT.US", Strategy::Adaptive, None, factory).await.unwrap();
        let first_ttl = orch.adaptive_state.get("q:MSFT.US").unwrap().current_ttl_secs;

        orch.freshness.remove("q:MSFT.US");
        orch.storage.delete("q:MSFT.US").await.unwrap();
        orch.batch_get_or_set(&["q:MSFT.US".to_string()], Strategy::Adaptive, None, |missing| async move {
            Ok(missing.into_iter().map(|k| (k, json!({"price": 5}))).collect())
        })
        .await
        .unwrap();
        let second_ttl = orch.adaptive_state.get("q:MSFT.US").unwrap().current_ttl_secs;

        assert!(second_ttl > first_ttl);
    }
}
