//! Storage Port configuration (§4.D).

use std::time::Duration;

use crate::support::circuit_breaker::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    CacheOnly,
    PersistentOnly,
    Both,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub write_policy: WritePolicy,
    pub default_ttl_secs: u64,
    pub compression_threshold_bytes: usize,
    /// Whether a durable-store hit that missed the fast cache is written back into it.
    pub refill_cache_on_read_through: bool,
    pub max_keys_prevention: usize,
    pub scan_timeout: Duration,
    pub breaker: CircuitBreakerConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            write_policy: WritePolicy::Both,
            default_ttl_secs: 300,
            compression_threshold_bytes: 4096,
            refill_cache_on_read_through: true,
            max_keys_prevention: 5_000,
            scan_timeout: Duration::from_millis(500),
            breaker: CircuitBreakerConfig { failure_threshold: 5, success_threshold: 3, cooldown: Duration::from_secs(30) },
        }
    }
}
