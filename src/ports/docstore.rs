//! Durable document store port (MongoDB-like semantics) plus a change-stream watch.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct DocChangeEvent {
    pub collection: String,
    pub id: String,
    pub kind: DocChangeKind,
}

#[async_trait]
pub trait DocStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Value>>;

    async fn put(&self, collection: &str, id: &str, doc: Value) -> GatewayResult<()>;

    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<()>;

    async fn list(&self, collection: &str) -> GatewayResult<Vec<Value>>;

    /// A change-stream watcher, consumed by Component B's invalidation logic.
    /// Subscribers that lag behind the broadcast buffer miss events; callers should
    /// treat a `RecvError::Lagged` as "invalidate everything for this collection".
    fn watch(&self, collection: &str) -> broadcast::Receiver<DocChangeEvent>;
}
