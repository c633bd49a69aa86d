//! The three-level Symbol Mapper Cache (§4.B). L1/L2/L3 are typed `lru::LruCache`s
//! guarded by independent `parking_lot::Mutex`es rather than one heterogeneous map,
//! so a read never re-parses an envelope (§9 "LRU of typed heterogeneous payloads
//! -> separate typed caches").

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::metrics::Metrics;
use crate::ports::provider::Provider;

use super::model::{BatchLookup, Direction, SymbolMappingRule};
use super::store::SymbolRuleStore;

#[derive(Debug, Clone)]
pub struct SymbolCacheConfig {
    pub l1_capacity: usize,
    pub l2_capacity: usize,
    pub l3_capacity: usize,
    /// Fraction of capacity to evict down to when a memory high-water mark trips.
    pub memory_threshold_ratio: f64,
    /// Heap-usage ratio above which eviction kicks in.
    pub high_water_mark_ratio: f64,
    /// Heap-usage ratio above which pressure is reported as `Critical`.
    pub critical_pressure_ratio: f64,
}

impl Default for SymbolCacheConfig {
    fn default() -> Self {
        Self {
            l1_capacity: 100,
            l2_capacity: 5_000,
            l3_capacity: 500,
            memory_threshold_ratio: 0.7,
            high_water_mark_ratio: 0.85,
            critical_pressure_ratio: 0.95,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressureOutcome {
    Nominal,
    Evicted,
    Critical,
}

struct CompiledProviderMap {
    native_to_standard: HashMap<String, String>,
    standard_to_native: HashMap<String, String>,
}

impl From<&SymbolMappingRule> for CompiledProviderMap {
    fn from(rule: &SymbolMappingRule) -> Self {
        let mut native_to_standard = HashMap::with_capacity(rule.entries.len());
        let mut standard_to_native = HashMap::with_capacity(rule.entries.len());
        for entry in &rule.entries {
            native_to_standard.insert(entry.provider_symbol.clone(), entry.standard_symbol.clone());
            standard_to_native.insert(entry.standard_symbol.clone(), entry.provider_symbol.clone());
        }
        Self { native_to_standard, standard_to_native }
    }
}

#[derive(Default)]
struct CacheStats {
    l1_hits: AtomicU64,
    l1_misses: AtomicU64,
    l2_hits: AtomicU64,
    l2_misses: AtomicU64,
    l3_hits: AtomicU64,
    l3_misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l3_hits: u64,
    pub l3_misses: u64,
}

type L2Key = (String, Direction, String);
type L3Key = (String, Direction, u64);

pub struct SymbolMapperCache {
    store: Arc<dyn SymbolRuleStore>,
    metrics: Arc<dyn Metrics>,
    config: SymbolCacheConfig,
    l1: Mutex<LruCache<String, Arc<CompiledProviderMap>>>,
    l2: Mutex<LruCache<L2Key, String>>,
    l3: Mutex<LruCache<L3Key, BatchLookup>>,
    stats: CacheStats,
}

fn cap(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n.max(1)).expect("capacity is at least 1")
}

/// FNV-1a over the direction tag and each symbol in order, so the same batch in
/// the same order always hashes the same way within a process (§4.B "stable-hash").
fn stable_hash(direction: Direction, symbols: &[String]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    let tag: u8 = match direction {
        Direction::ToStandard => 0,
        Direction::FromStandard => 1,
    };
    hash = (hash ^ tag as u64).wrapping_mul(PRIME);
    for symbol in symbols {
        for byte in symbol.bytes() {
            hash = (hash ^ byte as u64).wrapping_mul(PRIME);
        }
        hash = (hash ^ 0xff).wrapping_mul(PRIME);
    }
    hash
}

impl SymbolMapperCache {
    pub fn new(store: Arc<dyn SymbolRuleStore>, metrics: Arc<dyn Metrics>, config: SymbolCacheConfig) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(cap(config.l1_capacity))),
            l2: Mutex::new(LruCache::new(cap(config.l2_capacity))),
            l3: Mutex::new(LruCache::new(cap(config.l3_capacity))),
            store,
            metrics,
            config,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            l1_hits: self.stats.l1_hits.load(Ordering::Relaxed),
            l1_misses: self.stats.l1_misses.load(Ordering::Relaxed),
            l2_hits: self.stats.l2_hits.load(Ordering::Relaxed),
            l2_misses: self.stats.l2_misses.load(Ordering::Relaxed),
            l3_hits: self.stats.l3_hits.load(Ordering::Relaxed),
            l3_misses: self.stats.l3_misses.load(Ordering::Relaxed),
        }
    }

    pub async fn to_standard(&self, provider: &Provider, native_symbols: &[String]) -> GatewayResult<BatchLookup> {
        self.lookup_batch(provider, native_symbols, Direction::ToStandard).await
    }

    pub async fn from_standard(&self, provider: &Provider, standard_symbols: &[String]) -> GatewayResult<BatchLookup> {
        self.lookup_batch(provider, standard_symbols, Direction::FromStandard).await
    }

    async fn lookup_batch(
        &self,
        provider: &Provider,
        symbols: &[String],
        direction: Direction,
    ) -> GatewayResult<BatchLookup> {
        let hash = stable_hash(direction, symbols);
        let l3_key = (provider.0.clone(), direction, hash);
        if let Some(cached) = self.l3.lock().get(&l3_key).cloned() {
            self.stats.l3_hits.fetch_add(1, Ordering::Relaxed);
            self.metrics.increment("symbol_cache_l3_hit", &[("provider", &provider.0)]);
            return Ok(BatchLookup { cache_hits: cached.mapping.len() as u64, ..cached });
        }
        self.stats.l3_misses.fetch_add(1, Ordering::Relaxed);

        let mut mapping = std::collections::BTreeMap::new();
        let mut failed = Vec::new();
        let mut cache_hits = 0u64;
        let mut residual = Vec::new();

        {
            let mut l2 = self.l2.lock();
            for symbol in symbols {
                let key = (provider.0.clone(), direction, symbol.clone());
                match l2.get(&key) {
                    Some(mapped) => {
                        mapping.insert(symbol.clone(), mapped.clone());
                        cache_hits += 1;
                        self.stats.l2_hits.fetch_add(1, Ordering::Relaxed);
                    }
                    None => {
                        self.stats.l2_misses.fetch_add(1, Ordering::Relaxed);
                        residual.push(symbol.clone());
                    }
                }
            }
        }

        if !residual.is_empty() {
            let compiled = self.load_provider_map(provider).await?;
            let mut l2 = self.l2.lock();
            for symbol in residual {
                let resolved = match direction {
                    Direction::ToStandard => compiled.native_to_standard.get(&symbol),
                    Direction::FromStandard => compiled.standard_to_native.get(&symbol),
                };
                match resolved {
                    Some(mapped) => {
                        mapping.insert(symbol.clone(), mapped.clone());
                        l2.put((provider.0.clone(), direction, symbol), mapped.clone());
                    }
                    None => failed.push(symbol),
                }
            }
        }

        let result = BatchLookup { mapping, failed, cache_hits };
        self.l3.lock().put(l3_key, result.clone());
        Ok(result)
    }

    async fn load_provider_map(&self, provider: &Provider) -> GatewayResult<Arc<CompiledProviderMap>> {
        if let Some(hit) = self.l1.lock().get(&provider.0).cloned() {
            self.stats.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.stats.l1_misses.fetch_add(1, Ordering::Relaxed);

        let rule = self.store.get(provider).await?.ok_or_else(|| {
            GatewayError::new(
                codes::SYMBOL_TRANSFORMER_BUSINESS_PROVIDER_RULES_NOT_FOUND,
                format!("no symbol mapping rule set found for provider '{provider}'"),
            )
        })?;
        let compiled = Arc::new(CompiledProviderMap::from(&rule));
        self.l1.lock().put(provider.0.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Drops the provider's L1 entry and every L2/L3 entry keyed under it. Called
    /// on `create`/`update`/`delete` change-stream events for that provider.
    pub fn invalidate_provider(&self, provider: &Provider) {
        self.l1.lock().pop(&provider.0);

        let mut l2 = self.l2.lock();
        let stale: Vec<L2Key> = l2.iter().filter(|(k, _)| k.0 == provider.0).map(|(k, _)| k.clone()).collect();
        for key in stale {
            l2.pop(&key);
        }
        drop(l2);

        let mut l3 = self.l3.lock();
        let stale: Vec<L3Key> = l3.iter().filter(|(k, _)| k.0 == provider.0).map(|(k, _)| k.clone()).collect();
        for key in stale {
            l3.pop(&key);
        }
    }

    /// Drops L2 entries naming `standard_symbol` for `provider` in either direction,
    /// and every L3 batch result for that provider (a batch may or may not have
    /// included the symbol; we cannot tell without decoding it, so it is dropped
    /// conservatively).
    pub fn invalidate_entry(&self, provider: &Provider, standard_symbol: &str) {
        let mut l2 = self.l2.lock();
        let stale: Vec<L2Key> = l2
            .iter()
            .filter(|(key, mapped)| {
                key.0 == provider.0
                    && ((key.1 == Direction::FromStandard && key.2 == standard_symbol)
                        || (key.1 == Direction::ToStandard && mapped.as_str() == standard_symbol))
            })
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            l2.pop(&key);
        }
        drop(l2);

        let mut l3 = self.l3.lock();
        let stale: Vec<L3Key> = l3.iter().filter(|(k, _)| k.0 == provider.0).map(|(k, _)| k.clone()).collect();
        for key in stale {
            l3.pop(&key);
        }
    }

    /// Drops every cached entry across all three layers. Used when a change-stream
    /// watcher lags and can no longer tell which providers it missed updates for.
    pub fn clear_all(&self) {
        self.l1.lock().clear();
        self.l2.lock().clear();
        self.l3.lock().clear();
    }

    /// Evicts L2/L3 down to `memory_threshold_ratio` of capacity once `usage_ratio`
    /// crosses the high-water mark (§4.B "Memory safety").
    pub fn enforce_memory_pressure(&self, usage_ratio: f64) -> MemoryPressureOutcome {
        if usage_ratio <= self.config.high_water_mark_ratio {
            return MemoryPressureOutcome::Nominal;
        }

        let l2_target = (self.config.l2_capacity as f64 * self.config.memory_threshold_ratio) as usize;
        let mut l2 = self.l2.lock();
        while l2.len() > l2_target {
            if l2.pop_lru().is_none() {
                break;
            }
        }
        drop(l2);

        let l3_target = (self.config.l3_capacity as f64 * self.config.memory_threshold_ratio) as usize;
        let mut l3 = self.l3.lock();
        while l3.len() > l3_target {
            if l3.pop_lru().is_none() {
                break;
            }
        }
        drop(l3);

        if usage_ratio >= self.config.critical_pressure_ratio {
            MemoryPressureOutcome::Critical
        } else {
            MemoryPressureOutcome::Evicted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::metrics::NoopMetrics;
    use crate::symbol::model::SymbolMapEntry;
    use crate::symbol::store::DocStoreSymbolRuleStore;
    use crate::testutil::InMemoryDocStore;

    async fn seeded_cache() -> SymbolMapperCache {
        let docs = Arc::new(InMemoryDocStore::new());
        let store = Arc::new(DocStoreSymbolRuleStore::new(docs));
        let rule = SymbolMappingRule {
            provider: Provider::new("acme"),
            entries: vec![
                SymbolMapEntry { standard_symbol: "700.HK".into(), provider_symbol: "700".into() },
                SymbolMapEntry { standard_symbol: "700.HK".into(), provider_symbol: "0700".into() },
                SymbolMapEntry { standard_symbol: "AAPL.US".into(), provider_symbol: "AAPL".into() },
            ],
            version: 1,
        };
        store.put(&rule).await.unwrap();
        SymbolMapperCache::new(store, Arc::new(NoopMetrics), SymbolCacheConfig::default())
    }

    #[tokio::test]
    async fn s1_batch_resolves_and_caches_on_rerun() {
        let cache = seeded_cache().await;
        let provider = Provider::new("acme");
        let symbols: Vec<String> =
            ["700", "0700", "AAPL", "MSFT"].iter().map(|s| s.to_string()).collect();

        let first = cache.to_standard(&provider, &symbols).await.unwrap();
        assert_eq!(first.mapping.get("700").unwrap(), "700.HK");
        assert_eq!(first.mapping.get("AAPL").unwrap(), "AAPL.US");
        assert_eq!(first.failed, vec!["MSFT".to_string()]);
        assert_eq!(first.cache_hits, 0);

        let second = cache.to_standard(&provider, &symbols).await.unwrap();
        assert_eq!(second.mapping.len(), 3);
        assert_eq!(second.cache_hits, 3);
    }

    #[tokio::test]
    async fn invalidate_provider_clears_all_layers() {
        let cache = seeded_cache().await;
        let provider = Provider::new("acme");
        let symbols = vec!["700".to_string()];
        cache.to_standard(&provider, &symbols).await.unwrap();
        assert_eq!(cache.stats().l1_misses, 1);

        cache.invalidate_provider(&provider);
        cache.to_standard(&provider, &symbols).await.unwrap();
        assert_eq!(cache.stats().l1_misses, 2);
    }

    #[test]
    fn stable_hash_is_order_and_direction_sensitive() {
        let a = vec!["700".to_string(), "AAPL".to_string()];
        let b = vec!["AAPL".to_string(), "700".to_string()];
        assert_ne!(stable_hash(Direction::ToStandard, &a), stable_hash(Direction::ToStandard, &b));
        assert_ne!(
            stable_hash(Direction::ToStandard, &a),
            stable_hash(Direction::FromStandard, &a)
        );
        assert_eq!(stable_hash(Direction::ToStandard, &a), stable_hash(Direction::ToStandard, &a.clone()));
    }
}
