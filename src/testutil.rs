//! In-memory port fakes used by component unit tests and the cross-component
//! integration tests under `tests/`. Not behind a cfg gate so integration test
//! binaries (which compile this crate as an ordinary dependency) can use them too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::docstore::{DocChangeEvent, DocChangeKind, DocStore};
use crate::ports::kvstore::KVStore;
use crate::ports::provider::{Provider, ProviderAdapter, ProviderEvent};

/// In-memory `KVStore`. TTLs are evaluated against an injected `Clock` reading, not
/// wall-clock time, so tests can assert boundary behaviour deterministically.
pub struct InMemoryKVStore {
    entries: RwLock<HashMap<String, Entry>>,
    now_millis: Arc<dyn Fn() -> i64 + Send + Sync>,
    fail_next: std::sync::atomic::AtomicBool,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<i64>,
}

impl InMemoryKVStore {
    pub fn new(now_millis: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            now_millis,
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Makes the next operation return a transient external error, to exercise
    /// retry/backoff paths.
    pub fn fail_next_call(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> Option<GatewayError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Some(GatewayError::new(
                codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE,
                "injected test failure",
            ))
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KVStore for InMemoryKVStore {
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let now = (self.now_millis)();
        let mut entries = self.entries.write();
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.map(|exp| now > exp).unwrap_or(false) {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(entry.value.clone()))
                }
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> GatewayResult<()> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let now = (self.now_millis)();
        let expires_at = ttl_seconds.map(|ttl| now + (ttl as i64) * 1000);
        self.entries.write().insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> GatewayResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn scan(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>> {
        if let Some(e) = self.take_failure() {
            return Err(e);
        }
        let prefix = pattern.trim_end_matches('*');
        let entries = self.entries.read();
        Ok(entries.keys().filter(|k| k.starts_with(prefix)).take(limit).cloned().collect())
    }

    async fn ping(&self) -> GatewayResult<()> {
        Ok(())
    }
}

/// In-memory `DocStore` with a broadcast-based change stream.
pub struct InMemoryDocStore {
    docs: RwLock<HashMap<String, HashMap<String, Value>>>,
    watchers: RwLock<HashMap<String, broadcast::Sender<DocChangeEvent>>>,
}

impl Default for InMemoryDocStore {
    fn default() -> Self {
        Self { docs: RwLock::new(HashMap::new()), watchers: RwLock::new(HashMap::new()) }
    }
}

impl InMemoryDocStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, collection: &str) -> broadcast::Sender<DocChangeEvent> {
        let mut watchers = self.watchers.write();
        watchers
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl DocStore for InMemoryDocStore {
    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Value>> {
        Ok(self.docs.read().get(collection).and_then(|c| c.get(id).cloned()))
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> GatewayResult<()> {
        let existed = self
            .docs
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc)
            .is_some();
        let _ = self.sender(collection).send(DocChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind: if existed { DocChangeKind::Updated } else { DocChangeKind::Created },
        });
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<()> {
        if let Some(c) = self.docs.write().get_mut(collection) {
            c.remove(id);
        }
        let _ = self.sender(collection).send(DocChangeEvent {
            collection: collection.to_string(),
            id: id.to_string(),
            kind: DocChangeKind::Deleted,
        });
        Ok(())
    }

    async fn list(&self, collection: &str) -> GatewayResult<Vec<Value>> {
        Ok(self.docs.read().get(collection).map(|c| c.values().cloned().collect()).unwrap_or_default())
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<DocChangeEvent> {
        self.sender(collection).subscribe()
    }
}

/// A scripted `ProviderAdapter`: `fetch` returns whatever was registered via
/// `set_response`, and `push` drives the event stream.
pub struct FakeProviderAdapter {
    provider: Provider,
    responses: RwLock<HashMap<String, Value>>,
    tx: broadcast::Sender<ProviderEvent>,
    fetch_calls: AtomicU64,
}

impl FakeProviderAdapter {
    pub fn new(provider: impl Into<String>) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            provider: Provider::new(provider),
            responses: RwLock::new(HashMap::new()),
            tx,
            fetch_calls: AtomicU64::new(0),
        }
    }

    pub fn set_response(&self, native_symbol: &str, raw: Value) {
        self.responses.write().insert(native_symbol.to_string(), raw);
    }

    pub fn push(&self, event: ProviderEvent) {
        let _ = self.tx.send(event);
    }

    pub fn fetch_call_count(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProviderAdapter {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    async fn fetch(&self, native_symbols: &[String]) -> GatewayResult<Value> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let responses = self.responses.read();
        let items: Vec<Value> = native_symbols
            .iter()
            .filter_map(|s| responses.get(s).cloned())
            .collect();
        Ok(Value::Array(items))
    }

    fn events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn kv_store_respects_ttl_boundary() {
        let clock_ms = Arc::new(std::sync::atomic::AtomicI64::new(1_000));
        let clock_ms_clone = clock_ms.clone();
        let store = InMemoryKVStore::new(Arc::new(move || clock_ms_clone.load(Ordering::SeqCst)));

        store.set("k", b"v".to_vec(), Some(10)).await.unwrap();
        clock_ms.store(1_000 + 10_000, Ordering::SeqCst);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock_ms.store(1_000 + 10_001, Ordering::SeqCst);
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn doc_store_watch_sees_put_and_delete() {
        let store = InMemoryDocStore::new();
        let mut rx = store.watch("rules");
        store.put("rules", "r1", serde_json::json!({"a":1})).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, DocChangeKind::Created);
        store.delete("rules", "r1").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, DocChangeKind::Deleted);
    }
}
