//! In-process `KVStore` (§1 "Persistent storage engines (Redis, MongoDB) ...
//! accessed through `KVStore` and `DocStore` ports" — a concrete Redis-backed
//! adapter is out of scope, but the binary still needs a real fast-cache
//! implementation to run). Backed by `dashmap` rather than a single global
//! `RwLock<HashMap<..>>` so hot keys under concurrent `get`/`set` do not serialize
//! against unrelated keys (§5 "Shared-resource policy").

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::GatewayResult;
use crate::ports::clock::Clock;
use crate::ports::kvstore::KVStore;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

/// A `KVStore` good enough to stand in for a single-node Redis: TTL-aware,
/// prefix-scannable, no persistence across restarts. Production deployments with
/// multiple gateway instances sharing one fast-cache tier should substitute a real
/// Redis-backed `KVStore` behind this same port.
pub struct MemoryKVStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
}

impl MemoryKVStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), clock }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KVStore for MemoryKVStore {
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            Some(entry) => entry.expires_at.map(|exp| now > exp).unwrap_or(false),
            None => return Ok(None),
        };
        if expired {
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(self.entries.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> GatewayResult<()> {
        let expires_at = ttl_seconds.map(|ttl| self.clock.now_millis() + (ttl as i64) * 1000);
        self.entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>> {
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(prefix))
            .take(limit)
            .collect())
    }

    async fn ping(&self) -> GatewayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;

    #[tokio::test]
    async fn ttl_boundary_matches_storage_semantics() {
        let clock = Arc::new(FixedClock::new(1_000));
        let store = MemoryKVStore::new(clock.clone());
        store.set("k", b"v".to_vec(), Some(10)).await.unwrap();

        clock.set(1_000 + 10_000);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.set(1_000 + 10_001);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_matches_prefix_wildcard() {
        let clock = Arc::new(FixedClock::new(0));
        let store = MemoryKVStore::new(clock);
        store.set("stream_cache_warm:700.HK", b"1".to_vec(), None).await.unwrap();
        store.set("stream_cache_warm:AAPL.US", b"2".to_vec(), None).await.unwrap();
        store.set("best_rule:acme:stream:quote_fields", b"3".to_vec(), None).await.unwrap();

        let mut keys = store.scan("stream_cache_warm:*", 10).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["stream_cache_warm:700.HK".to_string(), "stream_cache_warm:AAPL.US".to_string()]);
    }
}
