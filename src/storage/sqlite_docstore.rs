//! Durable `DocStore` backed by SQLite (§1: MongoDB itself is out of scope, but the
//! gateway still needs a real durable backend to run against). One table per
//! process, `collection`/`id` composite key, document body stored as JSON text.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so every call hops to a blocking
//! thread via `spawn_blocking` and takes a `std::sync::Mutex` around the connection,
//! the same pattern the teacher uses for its own SQLite-backed stores.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::docstore::{DocChangeEvent, DocChangeKind, DocStore};
use crate::support::circuit_breaker::CircuitBreaker;

use dashmap::DashMap;

const WATCH_CHANNEL_CAPACITY: usize = 256;

pub struct SqliteDocStore {
    conn: Arc<Mutex<Connection>>,
    watchers: DashMap<String, broadcast::Sender<DocChangeEvent>>,
    breaker: CircuitBreaker,
}

impl SqliteDocStore {
    pub fn open(path: impl AsRef<Path>) -> GatewayResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(sqlite_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )
        .map_err(sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: DashMap::new(),
            breaker: CircuitBreaker::new(Default::default()),
        })
    }

    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory().map_err(sqlite_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );",
        )
        .map_err(sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: DashMap::new(),
            breaker: CircuitBreaker::new(Default::default()),
        })
    }

    fn sender(&self, collection: &str) -> broadcast::Sender<DocChangeEvent> {
        self.watchers
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .clone()
    }
}

fn sqlite_err(err: rusqlite::Error) -> GatewayError {
    GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, format!("sqlite error: {err}"))
}

#[async_trait]
impl DocStore for SqliteDocStore {
    async fn get(&self, collection: &str, id: &str) -> GatewayResult<Option<Value>> {
        if !self.breaker.allow() {
            return Err(GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, "durable store circuit open"));
        }
        let conn = self.conn.clone();
        let (collection, id) = (collection.to_string(), id.to_string());
        let result = tokio::task::spawn_blocking(move || -> Result<Option<String>, rusqlite::Error> {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            conn.query_row(
                "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
        .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("blocking task join failed: {err}")))?;

        match result {
            Ok(body) => {
                self.breaker.record_success();
                body.map(|text| serde_json::from_str(&text).map_err(|err| {
                    GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("corrupt document body: {err}"))
                }))
                .transpose()
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(sqlite_err(err))
            }
        }
    }

    async fn put(&self, collection: &str, id: &str, doc: Value) -> GatewayResult<()> {
        if !self.breaker.allow() {
            return Err(GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, "durable store circuit open"));
        }
        let body = serde_json::to_string(&doc)
            .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("document is not serializable: {err}")))?;

        let conn = self.conn.clone();
        let (collection_for_query, id_for_query) = (collection.to_string(), id.to_string());
        let existed = tokio::task::spawn_blocking(move || -> Result<bool, rusqlite::Error> {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            let existed: bool = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection_for_query, id_for_query],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            conn.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE SET body = excluded.body",
                params![collection_for_query, id_for_query, body],
            )?;
            Ok(existed)
        })
        .await
        .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("blocking task join failed: {err}")))?;

        match existed {
            Ok(existed) => {
                self.breaker.record_success();
                let _ = self.sender(collection).send(DocChangeEvent {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    kind: if existed { DocChangeKind::Updated } else { DocChangeKind::Created },
                });
                Ok(())
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(sqlite_err(err))
            }
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> GatewayResult<()> {
        if !self.breaker.allow() {
            return Err(GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, "durable store circuit open"));
        }
        let conn = self.conn.clone();
        let (collection_for_query, id_for_query) = (collection.to_string(), id.to_string());
        let result = tokio::task::spawn_blocking(move || -> Result<(), rusqlite::Error> {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            conn.execute("DELETE FROM documents WHERE collection = ?1 AND id = ?2", params![collection_for_query, id_for_query])?;
            Ok(())
        })
        .await
        .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("blocking task join failed: {err}")))?;

        match result {
            Ok(()) => {
                self.breaker.record_success();
                let _ = self.sender(collection).send(DocChangeEvent {
                    collection: collection.to_string(),
                    id: id.to_string(),
                    kind: DocChangeKind::Deleted,
                });
                Ok(())
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(sqlite_err(err))
            }
        }
    }

    async fn list(&self, collection: &str) -> GatewayResult<Vec<Value>> {
        if !self.breaker.allow() {
            return Err(GatewayError::new(codes::STORAGE_EXTERNAL_BACKEND_UNAVAILABLE, "durable store circuit open"));
        }
        let conn = self.conn.clone();
        let collection = collection.to_string();
        let result = tokio::task::spawn_blocking(move || -> Result<Vec<String>, rusqlite::Error> {
            let conn = conn.lock().expect("sqlite connection mutex poisoned");
            let mut stmt = conn.prepare("SELECT body FROM documents WHERE collection = ?1")?;
            let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
        .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("blocking task join failed: {err}")))?;

        match result {
            Ok(bodies) => {
                self.breaker.record_success();
                bodies
                    .into_iter()
                    .map(|text| {
                        serde_json::from_str(&text)
                            .map_err(|err| GatewayError::new(codes::STORAGE_SYSTEM_INTERNAL, format!("corrupt document body: {err}")))
                    })
                    .collect()
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(sqlite_err(err))
            }
        }
    }

    fn watch(&self, collection: &str) -> broadcast::Receiver<DocChangeEvent> {
        self.sender(collection).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqliteDocStore::open_in_memory().unwrap();
        store.put("rules", "r1", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("rules", "r1").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn put_twice_emits_created_then_updated() {
        let store = SqliteDocStore::open_in_memory().unwrap();
        let mut rx = store.watch("rules");
        store.put("rules", "r1", json!({"a": 1})).await.unwrap();
        store.put("rules", "r1", json!({"a": 2})).await.unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind, DocChangeKind::Created);
        assert_eq!(second.kind, DocChangeKind::Updated);
    }

    #[tokio::test]
    async fn delete_removes_document() {
        let store = SqliteDocStore::open_in_memory().unwrap();
        store.put("rules", "r1", json!({"a": 1})).await.unwrap();
        store.delete("rules", "r1").await.unwrap();
        assert_eq!(store.get("rules", "r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_returns_all_documents_in_collection() {
        let store = SqliteDocStore::open_in_memory().unwrap();
        store.put("rules", "r1", json!({"a": 1})).await.unwrap();
        store.put("rules", "r2", json!({"a": 2})).await.unwrap();
        store.put("other", "r3", json!({"a": 3})).await.unwrap();

        let docs = store.list("rules").await.unwrap();
        assert_eq!(docs.len(), 2);
    }
}
