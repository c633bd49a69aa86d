//! Change-stream invalidation watcher (§4.B "Invalidation"). Subscribes to the
//! durable symbol-mapping-rule collection and evicts the affected provider's L1
//! entry plus dependent L2/L3 entries on every create/update/delete.
//!
//! Modeled on the edge receiver's reconnect loop: a lagged receiver is treated the
//! same as a dropped connection — back off, then resubscribe and treat every
//! document in the collection as potentially changed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::ports::docstore::DocStore;
use crate::ports::provider::Provider;

use super::cache::SymbolMapperCache;

const SYMBOL_RULES_COLLECTION: &str = "symbol_mapping_rules";
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

pub async fn run_invalidation_watcher(
    cache: Arc<SymbolMapperCache>,
    docs: Arc<dyn DocStore>,
    max_reconnect_delay: Duration,
) {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        let mut rx = docs.watch(SYMBOL_RULES_COLLECTION);
        backoff = INITIAL_BACKOFF;

        loop {
            match rx.recv().await {
                Ok(event) => {
                    backoff = INITIAL_BACKOFF;
                    info!(provider = %event.id, kind = ?event.kind, "symbol mapping rule changed");
                    cache.invalidate_provider(&Provider::new(event.id));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "symbol mapping rule watcher lagged; invalidating everything");
                    cache.clear_all();
                }
                Err(RecvError::Closed) => break,
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_reconnect_delay);
    }
}
