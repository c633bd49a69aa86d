//! Component C: Data Mapper Cache (§4.C). A thin KV-backed cache over three rule
//! namespaces, protecting its SCAN-based invalidation paths with the shared
//! `support::circuit_breaker` (grounded directly on the teacher's
//! `route_quality::mitigation::CircuitBreaker`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::clock::Clock;
use crate::ports::kvstore::KVStore;
use crate::ports::metrics::Metrics;
use crate::ports::provider::Provider;
use crate::rules::{ApiType, MappingRule, RuleListType};
use crate::support::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

use super::keys::{best_rule_key, provider_rules_key, provider_wildcard_patterns, rule_by_id_key};

const SCAN_COUNT_FLOOR: usize = 10;
const SCAN_COUNT_CEILING: usize = 1000;
const SCAN_COUNT_INITIAL: usize = 100;

#[derive(Debug, Clone)]
pub struct DataMapperCacheConfig {
    pub default_ttl_secs: u64,
    pub max_keys_prevention: usize,
    pub scan_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for DataMapperCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_keys_prevention: 5_000,
            scan_timeout: Duration::from_millis(500),
            breaker: CircuitBreakerConfig { failure_threshold: 5, success_threshold: 3, cooldown: Duration::from_secs(30) },
        }
    }
}

#[derive(Default)]
struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
    operations: AtomicU64,
    response_time_total_micros: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DataMapperCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub operations: u64,
    pub avg_response_time_micros: f64,
    pub last_reset_time_millis: i64,
}

pub struct DataMapperCache {
    kv: Arc<dyn KVStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    config: DataMapperCacheConfig,
    breaker: CircuitBreaker,
    scan_count: AtomicUsize,
    stats: Stats,
    last_reset_millis: AtomicU64,
    /// Patterns the circuit-breaker-open fallback couldn't act on immediately;
    /// drained on the next successful SCAN window (§4.C "deferred batch-delete queue").
    deferred_deletes: Mutex<Vec<String>>,
}

impl DataMapperCache {
    pub fn new(
        kv: Arc<dyn KVStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        config: DataMapperCacheConfig,
    ) -> Self {
        let breaker = CircuitBreaker::new(config.breaker);
        let now = clock.now_millis();
        Self {
            kv,
            clock,
            metrics,
            config,
            breaker,
            scan_count: AtomicUsize::new(SCAN_COUNT_INITIAL),
            stats: Stats::default(),
            last_reset_millis: AtomicU64::new(now as u64),
            deferred_deletes: Mutex::new(Vec::new()),
        }
    }

    pub fn stats(&self) -> DataMapperCacheStats {
        let operations = self.stats.operations.load(Ordering::Relaxed);
        let total_micros = self.stats.response_time_total_micros.load(Ordering::Relaxed);
        DataMapperCacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            operations,
            avg_response_time_micros: if operations == 0 { 0.0 } else { total_micros as f64 / operations as f64 },
            last_reset_time_millis: self.last_reset_millis.load(Ordering::Relaxed) as i64,
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    async fn timed_get(&self, key: &str) -> GatewayResult<Option<MappingRule>> {
        let start = self.clock.now_millis();
        let raw = self.kv.get(key).await?;
        self.record_operation(start);
        match raw {
            Some(bytes) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let rule = decode(&bytes)?;
                Ok(Some(rule))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn timed_get_many(&self, key: &str) -> GatewayResult<Option<Vec<MappingRule>>> {
        let start = self.clock.now_millis();
        let raw = self.kv.get(key).await?;
        self.record_operation(start);
        match raw {
            Some(bytes) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                let rules: Vec<MappingRule> = serde_json::from_slice(&bytes).map_err(decode_err)?;
                Ok(Some(rules))
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    fn record_operation(&self, start_millis: i64) {
        let elapsed_micros = ((self.clock.now_millis() - start_millis).max(0) as u64) * 1000;
        self.stats.operations.fetch_add(1, Ordering::Relaxed);
        self.stats.response_time_total_micros.fetch_add(elapsed_micros, Ordering::Relaxed);
    }

    // -- best_rule namespace --

    pub async fn cache_best_matching_rule(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
        rule: &MappingRule,
    ) -> GatewayResult<()> {
        let key = best_rule_key(provider, api_type, rule_list_type);
        self.kv.set(&key, encode(rule)?, Some(self.config.default_ttl_secs)).await
    }

    pub async fn get_cached_best_matching_rule(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
    ) -> GatewayResult<Option<MappingRule>> {
        self.timed_get(&best_rule_key(provider, api_type, rule_list_type)).await
    }

    // -- rule_by_id namespace --

    pub async fn cache_rule_by_id(&self, rule: &MappingRule) -> GatewayResult<()> {
        self.kv.set(&rule_by_id_key(&rule.id), encode(rule)?, Some(self.config.default_ttl_secs)).await
    }

    pub async fn get_cached_rule_by_id(&self, id: &str) -> GatewayResult<Option<MappingRule>> {
        self.timed_get(&rule_by_id_key(id)).await
    }

    // -- provider_rules namespace --

    pub async fn cache_provider_rules(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rules: &[MappingRule],
    ) -> GatewayResult<()> {
        let key = provider_rules_key(provider, api_type);
        let bytes = serde_json::to_vec(rules).map_err(encode_err)?;
        self.kv.set(&key, bytes, Some(self.config.default_ttl_secs)).await
    }

    pub async fn get_cached_provider_rules(
        &self,
        provider: &Provider,
        api_type: ApiType,
    ) -> GatewayResult<Option<Vec<MappingRule>>> {
        self.timed_get_many(&provider_rules_key(provider, api_type)).await
    }

    pub async fn warmup_cache(&self, rules: &[MappingRule]) -> GatewayResult<()> {
        for rule in rules {
            self.cache_rule_by_id(rule).await?;
        }
        Ok(())
    }

    // -- invalidation --

    /// Explicit-key invalidation: always drops `rule_by_id:<id>`, and if the rule's
    /// shape is known also drops its `best_rule`/`provider_rules` entries directly
    /// (no SCAN needed, since every component of the key is already known).
    pub async fn invalidate_rule_cache(&self, id: &str, rule: Option<&MappingRule>) -> GatewayResult<()> {
        self.kv.delete(&rule_by_id_key(id)).await?;
        if let Some(rule) = rule {
            self.kv
                .delete(&best_rule_key(&rule.provider, rule.api_type, rule.rule_list_type))
                .await?;
            self.kv.delete(&provider_rules_key(&rule.provider, rule.api_type)).await?;
        }
        Ok(())
    }

    /// SCAN-based invalidation of every `best_rule`/`provider_rules` entry for a
    /// provider. Guarded by the breaker per §4.C; on open, falls back to queuing the
    /// patterns for later and returns without raising.
    pub async fn invalidate_provider_cache(&self, provider: &Provider) -> GatewayResult<()> {
        for pattern in provider_wildcard_patterns(provider) {
            self.scan_and_delete(&pattern).await?;
        }
        Ok(())
    }

    pub async fn clear_all_rule_cache(&self) -> GatewayResult<()> {
        for pattern in ["best_rule:*", "provider_rules:*", "rule_by_id:*"] {
            self.scan_and_delete(pattern).await?;
        }
        Ok(())
    }

    /// Retries any patterns queued while the breaker was open. Safe to call
    /// periodically; a no-op when the breaker is still open or nothing is queued.
    pub async fn drain_deferred(&self) -> GatewayResult<()> {
        if !self.breaker.allow() {
            return Ok(());
        }
        let pending = std::mem::take(&mut *self.deferred_deletes.lock());
        for pattern in pending {
            self.scan_and_delete(&pattern).await?;
        }
        Ok(())
    }

    async fn scan_and_delete(&self, pattern: &str) -> GatewayResult<()> {
        if !self.breaker.allow() {
            self.deferred_deletes.lock().push(pattern.to_string());
            return Ok(());
        }

        let count = self.scan_count.load(Ordering::Relaxed).clamp(SCAN_COUNT_FLOOR, SCAN_COUNT_CEILING);
        let budget = count.min(self.config.max_keys_prevention);

        let outcome = tokio::time::timeout(self.config.scan_timeout, self.kv.scan(pattern, budget)).await;

        match outcome {
            Ok(Ok(keys)) => {
                self.breaker.record_success();
                // Low density (far fewer keys than requested) means the pattern is
                // sparse; widen the page for next time. A full page suggests we may be
                // truncating, so leave it alone rather than growing unboundedly.
                if keys.len() < budget / 2 {
                    let widened = (self.scan_count.load(Ordering::Relaxed) * 2).min(SCAN_COUNT_CEILING);
                    self.scan_count.store(widened, Ordering::Relaxed);
                }
                for key in keys {
                    self.kv.delete(&key).await?;
                }
                Ok(())
            }
            Ok(Err(err)) => {
                self.breaker.record_failure();
                self.metrics.increment("data_mapper_scan_failure", &[]);
                Err(err)
            }
            Err(_timeout) => {
                self.breaker.record_failure();
                let narrowed = (self.scan_count.load(Ordering::Relaxed) / 2).max(SCAN_COUNT_FLOOR);
                self.scan_count.store(narrowed, Ordering::Relaxed);
                self.metrics.increment("data_mapper_scan_timeout", &[]);
                if self.breaker.state() == CircuitState::Open {
                    self.deferred_deletes.lock().push(pattern.to_string());
                    Ok(())
                } else {
                    Err(GatewayError::new(
                        codes::DATA_MAPPER_SYSTEM_SCAN_CIRCUIT_OPEN,
                        format!("SCAN over pattern '{pattern}' timed out"),
                    ))
                }
            }
        }
    }
}

fn encode(rule: &MappingRule) -> GatewayResult<Vec<u8>> {
    serde_json::to_vec(rule).map_err(encode_err)
}

fn decode(bytes: &[u8]) -> GatewayResult<MappingRule> {
    serde_json::from_slice(bytes).map_err(decode_err)
}

fn encode_err(e: serde_json::Error) -> GatewayError {
    GatewayError::new(
        codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
        format!("cannot serialize cached rule: {e}"),
    )
}

fn decode_err(e: serde_json::Error) -> GatewayError {
    GatewayError::new(
        codes::DATA_MAPPER_BUSINESS_RULE_NOT_FOUND,
        format!("cached rule entry is corrupted: {e}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::metrics::NoopMetrics;
    use crate::rules::{FieldMapping, RuleStatus, Transform};
    use crate::testutil::InMemoryKVStore;

    fn rule(id: &str) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            provider: Provider::new("acme"),
            api_type: ApiType::Stream,
            rule_list_type: RuleListType::QuoteFields,
            is_default: true,
            status: RuleStatus::Active,
            field_mappings: vec![FieldMapping {
                source_path: "last_done".into(),
                target_path: "last_price".into(),
                transform: Transform::None,
            }],
            version: 1,
            updated_at_millis: 0,
        }
    }

    fn cache() -> DataMapperCache {
        let clock = Arc::new(FixedClock::new(0));
        let kv = Arc::new(InMemoryKVStore::new(Arc::new({
            let clock = clock.clone();
            move || clock.now_millis()
        })));
        DataMapperCache::new(kv, clock, Arc::new(NoopMetrics), DataMapperCacheConfig::default())
    }

    #[tokio::test]
    async fn caches_and_retrieves_by_id() {
        let cache = cache();
        let r = rule("r1");
        cache.cache_rule_by_id(&r).await.unwrap();
        let fetched = cache.get_cached_rule_by_id("r1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "r1");
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn invalidate_with_known_rule_deletes_all_three_keys() {
        let cache = cache();
        let r = rule("r1");
        cache.cache_rule_by_id(&r).await.unwrap();
        cache
            .cache_best_matching_rule(&r.provider, r.api_type, r.rule_list_type, &r)
            .await
            .unwrap();
        cache.cache_provider_rules(&r.provider, r.api_type, &[r.clone()]).await.unwrap();

        cache.invalidate_rule_cache(&r.id, Some(&r)).await.unwrap();

        assert!(cache.get_cached_rule_by_id("r1").await.unwrap().is_none());
        assert!(cache
            .get_cached_best_matching_rule(&r.provider, r.api_type, r.rule_list_type)
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .get_cached_provider_rules(&r.provider, r.api_type)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn invalidate_provider_cache_uses_scan() {
        let cache = cache();
        let r = rule("r1");
        cache
            .cache_best_matching_rule(&r.provider, r.api_type, r.rule_list_type, &r)
            .await
            .unwrap();

        cache.invalidate_provider_cache(&r.provider).await.unwrap();
        assert!(cache
            .get_cached_best_matching_rule(&r.provider, r.api_type, r.rule_list_type)
            .await
            .unwrap()
            .is_none());
    }
}
