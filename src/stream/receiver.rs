//! Component F: Stream Receiver (§4.F). Owns per-connection state and per-symbol
//! subscriber sets, and is the single point where a provider push becomes a
//! transformed, cached, fanned-out `tick` message.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::orchestrator::{SmartCacheOrchestrator, Strategy};
use crate::ports::provider::ProviderEvent;
use crate::ports::{
    Clock, Market, Metrics, RecoveryDataMessage, RecoveryDeliverySink, RecoveryFailureMessage, RecoveryPort,
    RecoveryRequest, TransformerPort,
};
use crate::rules::{ApiType, RuleListType};
use crate::symbol::{is_valid_standard_symbol, SymbolMapperCache};

use super::backpressure::OutboundMessage;
use super::connection::ConnectionState;
use super::model::{
    ClientReconnectRequest, ClientReconnectResponse, RecoveryStrategy, RejectedSymbol, SubscribeAck, SubscribeRequest,
    TickMessage,
};

#[derive(Debug, Clone)]
pub struct StreamReceiverConfig {
    pub outbound_queue_capacity: usize,
    pub max_recovery_window: Duration,
}

impl Default for StreamReceiverConfig {
    fn default() -> Self {
        Self { outbound_queue_capacity: 256, max_recovery_window: Duration::from_secs(300) }
    }
}

/// Publishes the set of client ids subscribed to a symbol via `ArcSwap` (§9
/// "copy-on-write snapshots"): a dispatch loop reads one snapshot and iterates it
/// without racing a concurrent subscribe/unsubscribe.
struct SymbolSubscribers(ArcSwap<Vec<String>>);

impl SymbolSubscribers {
    fn empty() -> Self {
        Self(ArcSwap::from_pointee(Vec::new()))
    }

    fn snapshot(&self) -> Arc<Vec<String>> {
        self.0.load_full()
    }

    fn add(&self, client_id: &str) {
        self.0.rcu(|current| {
            if current.iter().any(|c| c == client_id) {
                current.clone()
            } else {
                let mut next = (**current).clone();
                next.push(client_id.to_string());
                Arc::new(next)
            }
        });
    }

    fn remove(&self, client_id: &str) {
        self.0.rcu(|current| {
            if current.iter().any(|c| c == client_id) {
                Arc::new(current.iter().filter(|c| c.as_str() != client_id).cloned().collect())
            } else {
                current.clone()
            }
        });
    }
}

pub struct StreamReceiver {
    symbol_mapper: Arc<SymbolMapperCache>,
    transformer: Arc<dyn TransformerPort>,
    orchestrator: Arc<SmartCacheOrchestrator>,
    recovery: Arc<dyn RecoveryPort>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn Metrics>,
    config: StreamReceiverConfig,
    connections: DashMap<String, Arc<ConnectionState>>,
    subscribers: DashMap<String, SymbolSubscribers>,
}

impl StreamReceiver {
    pub fn new(
        symbol_mapper: Arc<SymbolMapperCache>,
        transformer: Arc<dyn TransformerPort>,
        orchestrator: Arc<SmartCacheOrchestrator>,
        recovery: Arc<dyn RecoveryPort>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn Metrics>,
        config: StreamReceiverConfig,
    ) -> Self {
        Self {
            symbol_mapper,
            transformer,
            orchestrator,
            recovery,
            clock,
            metrics,
            config,
            connections: DashMap::new(),
            subscribers: DashMap::new(),
        }
    }

    pub async fn subscribe(&self, client_id: &str, request: SubscribeRequest) -> GatewayResult<SubscribeAck> {
        let mut confirmed = Vec::new();
        let mut rejected = Vec::new();
        let mut format_valid = Vec::new();

        for symbol in &request.symbols {
            if is_valid_standard_symbol(symbol) {
                format_valid.push(symbol.clone());
            } else {
                rejected.push(RejectedSymbol { symbol: symbol.clone(), reason: "invalid_format".to_string() });
            }
        }

        if let Some(provider) = &request.preferred_provider {
            let provider = crate::ports::Provider::new(provider.clone());
            let lookup = self.symbol_mapper.from_standard(&provider, &format_valid).await?;
            for symbol in &format_valid {
                if lookup.mapping.contains_key(symbol) {
                    confirmed.push(symbol.clone());
                } else {
                    rejected.push(RejectedSymbol { symbol: symbol.clone(), reason: "no_provider_mapping".to_string() });
                }
            }
        } else {
            confirmed.extend(format_valid);
        }

        let connection = self.connections.entry(client_id.to_string()).or_insert_with(|| {
            Arc::new(ConnectionState::new(
                client_id.to_string(),
                request.ws_capability_type,
                request.preferred_provider.clone(),
                self.config.outbound_queue_capacity,
                self.clock.now_millis(),
            ))
        });
        connection.subscribe(confirmed.iter().cloned());

        for symbol in &confirmed {
            self.subscribers.entry(symbol.clone()).or_insert_with(SymbolSubscribers::empty).add(client_id);
        }

        self.metrics.increment("stream_receiver_subscriptions", &[]);
        Ok(SubscribeAck {
            success: !confirmed.is_empty(),
            confirmed_symbols: confirmed,
            rejected_symbols: rejected,
            server_timestamp: self.clock.now_millis(),
        })
    }

    pub fn unsubscribe(&self, client_id: &str, symbols: &[String]) {
        if let Some(connection) = self.connections.get(client_id) {
            connection.unsubscribe(symbols);
        }
        for symbol in symbols {
            if let Some(subscribers) = self.subscribers.get(symbol) {
                subscribers.remove(client_id);
            }
        }
    }

    /// Maps, transforms, caches, and dispatches a single provider push (§4.F).
    pub async fn on_provider_event(&self, event: ProviderEvent) -> GatewayResult<()> {
        let lookup = self.symbol_mapper.to_standard(&event.provider, std::slice::from_ref(&event.native_symbol)).await?;
        let Some(standard_symbol) = lookup.mapping.get(&event.native_symbol).cloned() else {
            warn!(provider = %event.provider, native_symbol = %event.native_symbol, "no standard mapping for provider push, dropping");
            return Ok(());
        };

        let outcome = self.transformer.transform(&event.provider, ApiType::Stream, RuleListType::QuoteFields, &event.raw).await?;
        let Some(canonical) = outcome.records.into_iter().next() else {
            return Ok(());
        };

        let key = format!("stream_cache_warm:{standard_symbol}");
        let market = market_for_symbol(&standard_symbol);
        self.orchestrator.put(&key, Strategy::StrongTimeliness, market, canonical.clone()).await?;

        let Some(subscribers) = self.subscribers.get(&standard_symbol) else {
            return Ok(());
        };
        let now = self.clock.now_millis();
        let tick = TickMessage { symbol: standard_symbol.clone(), timestamp: now, data: canonical };
        let payload = serde_json::to_value(&tick).unwrap_or(serde_json::Value::Null);

        for client_id in subscribers.snapshot().iter() {
            let Some(connection) = self.connections.get(client_id) else { continue };
            connection.touch(now);
            if !connection.dispatch_allowed() {
                continue;
            }
            let evicted = connection.enqueue(OutboundMessage { is_recovery: false, payload: payload.clone() });
            if evicted {
                self.metrics.increment("stream_receiver_memory_warning", &[]);
            }
            connection.record_dispatch_success();
        }
        Ok(())
    }

    pub async fn reconnect(&self, request: ClientReconnectRequest) -> GatewayResult<ClientReconnectResponse> {
        let now = self.clock.now_millis();
        let window_millis = self.config.max_recovery_window.as_millis() as i64;
        let elapsed = now - request.last_receive_timestamp;

        if elapsed > window_millis {
            return Err(recovery_window_exceeded());
        }

        if let Some(connection) = self.connections.get(&request.client_id) {
            connection.subscribe(request.symbols.iter().cloned());
            for symbol in &request.symbols {
                self.subscribers.entry(symbol.clone()).or_insert_with(SymbolSubscribers::empty).add(&request.client_id);
            }
        }

        let (job_id, acceptance) = self
            .recovery
            .submit(RecoveryRequest {
                client_id: request.client_id.clone(),
                symbols: request.symbols.clone(),
                from_millis: request.last_receive_timestamp,
                to_millis: now,
            })
            .await?;

        Ok(ClientReconnectResponse {
            recovery_strategy: RecoveryStrategy {
                will_recover: true,
                time_range: Some((request.last_receive_timestamp, now)),
                estimated_data_points: acceptance.estimated_data_points,
                recovery_job_id: Some(job_id),
            },
            server_time: now,
        })
    }

    pub fn connected_clients(&self) -> HashSet<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Drains whatever is queued for `client_id`'s websocket writer. Called from
    /// the writer task's poll loop, not from `on_provider_event`, so a slow writer
    /// never blocks the dispatch path.
    pub fn drain_outbound(&self, client_id: &str) -> Vec<OutboundMessage> {
        match self.connections.get(client_id) {
            Some(connection) => connection.drain_outbound(),
            None => Vec::new(),
        }
    }

    /// Tears down a client's connection and removes it from every symbol it was
    /// subscribed to. Called once the websocket closes.
    pub fn disconnect(&self, client_id: &str) {
        if let Some((_, connection)) = self.connections.remove(client_id) {
            for symbol in connection.subscriptions() {
                if let Some(subscribers) = self.subscribers.get(&symbol) {
                    subscribers.remove(client_id);
                }
            }
        }
    }
}

/// Routes a `RecoveryJob`'s output (Component G) into the owning client's outbound
/// queue, tagged `is_recovery` so back-pressure eviction never drops it first.
#[async_trait]
impl RecoveryDeliverySink for StreamReceiver {
    async fn deliver_batch(&self, client_id: &str, message: RecoveryDataMessage) {
        if let Some(connection) = self.connections.get(client_id) {
            let payload = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
            connection.enqueue(OutboundMessage { is_recovery: true, payload });
        }
    }

    async fn deliver_failure(&self, client_id: &str, message: RecoveryFailureMessage) {
        if let Some(connection) = self.connections.get(client_id) {
            let payload = serde_json::to_value(&message).unwrap_or(serde_json::Value::Null);
            connection.enqueue(OutboundMessage { is_recovery: true, payload });
        }
    }
}

fn recovery_window_exceeded() -> GatewayError {
    GatewayError::new(codes::STREAM_CACHE_BUSINESS_RECOVERY_WINDOW_EXCEEDED, "recovery window exceeded")
}

/// Derives the trading market from a standard symbol's suffix (§3), for the
/// `MARKET_AWARE`-adjacent TTL lookup on provider-push writes. Bare US symbols
/// (no suffix, per the `US_BARE` regex gate) default to `Market::US`.
fn market_for_symbol(symbol: &str) -> Option<Market> {
    match symbol.rsplit('.').next() {
        Some("HK") => Some(Market::HK),
        Some("US") => Some(Market::US),
        Some("SH") => Some(Market::SH),
        Some("SZ") => Some(Market::SZ),
        Some("SG") => Some(Market::SG),
        _ if !symbol.contains('.') => Some(Market::US),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::docstore::DocStore;
    use crate::ports::kvstore::KVStore;
    use crate::ports::metrics::NoopMetrics;
    use crate::ports::provider::Provider;
    use crate::ports::{MarketState, MarketStatusResult, RecoveryAcceptance};
    use crate::rules::ApplyOutcome;
    use crate::storage::{StorageConfig, StoragePort};
    use crate::symbol::{SymbolCacheConfig, SymbolMapperCache, SymbolMapEntry, SymbolMappingRule, SymbolRuleStore};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct FixedRuleStore(Vec<SymbolMappingRule>);

    #[async_trait]
    impl SymbolRuleStore for FixedRuleStore {
        async fn get(&self, provider: &Provider) -> GatewayResult<Option<SymbolMappingRule>> {
            Ok(self.0.iter().find(|r| &r.provider == provider).cloned())
        }

        async fn put(&self, _rule: &SymbolMappingRule) -> GatewayResult<()> {
            Ok(())
        }

        async fn delete(&self, _provider: &Provider) -> GatewayResult<()> {
            Ok(())
        }
    }

    struct EchoTransformer;

    #[async_trait]
    impl TransformerPort for EchoTransformer {
        async fn transform(
            &self,
            _provider: &Provider,
            _api_type: ApiType,
            _rule_list_type: RuleListType,
            raw: &serde_json::Value,
        ) -> GatewayResult<ApplyOutcome> {
            Ok(ApplyOutcome { records: vec![raw.clone()], warnings: Vec::new() })
        }
    }

    struct StubMarketStatus;

    #[async_trait]
    impl crate::ports::MarketStatusPort for StubMarketStatus {
        async fn status(&self, market: Market) -> GatewayResult<MarketStatusResult> {
            Ok(MarketStatusResult { market, state: MarketState::Trading, confidence: 1.0 })
        }
    }

    struct CountingRecovery {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecoveryPort for CountingRecovery {
        async fn submit(&self, _request: RecoveryRequest) -> GatewayResult<(String, RecoveryAcceptance)> {
            let n = self.calls.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            Ok((format!("job-{n}"), RecoveryAcceptance { estimated_data_points: 42 }))
        }
    }

    fn receiver() -> StreamReceiver {
        let store: Arc<dyn SymbolRuleStore> = Arc::new(FixedRuleStore(vec![SymbolMappingRule {
            provider: Provider::new("longport"),
            entries: vec![SymbolMapEntry { standard_symbol: "700.HK".to_string(), provider_symbol: "700".to_string() }],
            version: 1,
        }]));
        let metrics = Arc::new(NoopMetrics);
        let symbol_mapper = Arc::new(SymbolMapperCache::new(store, metrics.clone(), SymbolCacheConfig::default()));
        let docstore: Arc<dyn DocStore> = Arc::new(crate::testutil::InMemoryDocStore::new());
        let kvstore: Arc<dyn KVStore> = Arc::new(crate::testutil::InMemoryKVStore::new(Arc::new(|| 1_000_000i64)));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(1_000_000));
        let storage = Arc::new(StoragePort::new(kvstore, docstore, clock.clone(), metrics.clone(), StorageConfig::default()));
        let market_status: Arc<dyn crate::ports::MarketStatusPort> = Arc::new(StubMarketStatus);
        let orchestrator = SmartCacheOrchestrator::new(storage, market_status, clock.clone(), metrics.clone(), Default::default());
        let transformer: Arc<dyn TransformerPort> = Arc::new(EchoTransformer);
        let recovery: Arc<dyn RecoveryPort> = Arc::new(CountingRecovery { calls: AtomicU32::new(0) });
        StreamReceiver::new(symbol_mapper, transformer, orchestrator, recovery, clock, metrics, StreamReceiverConfig::default())
    }

    #[tokio::test]
    async fn subscribe_confirms_format_valid_symbols_without_preferred_provider() {
        let receiver = receiver();
        let ack = receiver
            .subscribe(
                "client-1",
                SubscribeRequest {
                    symbols: vec!["700.HK".to_string(), "not a symbol".to_string()],
                    ws_capability_type: super::super::model::WsCapabilityType::Quote,
                    preferred_provider: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(ack.confirmed_symbols, vec!["700.HK".to_string()]);
        assert_eq!(ack.rejected_symbols.len(), 1);
        assert_eq!(ack.rejected_symbols[0].reason, "invalid_format");
    }

    #[tokio::test]
    async fn subscribe_rejects_symbols_with_no_provider_mapping() {
        let receiver = receiver();
        let ack = receiver
            .subscribe(
                "client-1",
                SubscribeRequest {
                    symbols: vec!["700.HK".to_string(), "AAPL.US".to_string()],
                    ws_capability_type: super::super::model::WsCapabilityType::Quote,
                    preferred_provider: Some("longport".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(ack.confirmed_symbols, vec!["700.HK".to_string()]);
        assert_eq!(ack.rejected_symbols[0].reason, "no_provider_mapping");
    }

    #[tokio::test]
    async fn provider_event_dispatches_to_subscribed_client() {
        let receiver = receiver();
        receiver
            .subscribe(
                "client-1",
                SubscribeRequest {
                    symbols: vec!["700.HK".to_string()],
                    ws_capability_type: super::super::model::WsCapabilityType::Quote,
                    preferred_provider: Some("longport".to_string()),
                },
            )
            .await
            .unwrap();

        receiver
            .on_provider_event(ProviderEvent {
                provider: Provider::new("longport"),
                native_symbol: "700".to_string(),
                raw: json!({ "last_done": "123.45" }),
                received_at_millis: 1_000_000,
            })
            .await
            .unwrap();

        let connection = receiver.connections.get("client-1").unwrap();
        assert_eq!(connection.drain_outbound().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_within_window_accepts_and_submits_recovery() {
        let receiver = receiver();
        let response = receiver
            .reconnect(ClientReconnectRequest {
                client_id: "client-1".to_string(),
                last_receive_timestamp: 1_000_000 - 30_000,
                symbols: vec!["700.HK".to_string()],
            })
            .await
            .unwrap();
        assert!(response.recovery_strategy.will_recover);
        assert_eq!(response.recovery_strategy.estimated_data_points, 42);
    }

    #[tokio::test]
    async fn reconnect_beyond_max_window_is_rejected() {
        let receiver = receiver();
        let err = receiver
            .reconnect(ClientReconnectRequest {
                client_id: "client-1".to_string(),
                last_receive_timestamp: 1_000_000 - receiver.config.max_recovery_window.as_millis() as i64 - 1,
                symbols: vec!["700.HK".to_string()],
            })
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::STREAM_CACHE_BUSINESS_RECOVERY_WINDOW_EXCEEDED);
    }
}
