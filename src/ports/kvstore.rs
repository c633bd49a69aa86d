//! Fast cache backend port (Redis-like semantics).
//!
//! The Storage Port (Component D) composes this with `DocStore` internally; callers
//! outside `storage` should go through `storage::StoragePort`, not this trait directly.

use async_trait::async_trait;

use crate::error::GatewayResult;

#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> GatewayResult<()>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;

    async fn exists(&self, key: &str) -> GatewayResult<bool>;

    /// SCAN-style pattern iteration. `pattern` uses `*` as a wildcard. Implementations
    /// are expected to bound work internally; callers (Component C) additionally wrap
    /// this in a circuit breaker.
    async fn scan(&self, pattern: &str, limit: usize) -> GatewayResult<Vec<String>>;

    async fn ping(&self) -> GatewayResult<()>;
}
