//! Market data gateway binary: wires every component behind its port, brings up
//! the axum HTTP/WebSocket surface, and runs until a shutdown signal drains
//! in-flight work.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::get,
    Router,
};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketdata_gateway::config::{AppConfig, LogFormat};
use marketdata_gateway::data_mapper_cache::DataMapperCache;
use marketdata_gateway::error::{codes, GatewayError, GatewayResult};
use marketdata_gateway::orchestrator::SmartCacheOrchestrator;
use marketdata_gateway::ports::{
    Clock, Metrics, RecoveryAcceptance, RecoveryPort, RecoveryRequest, RecorderMetrics, SystemClock,
};
use marketdata_gateway::recovery::RecoveryEngine;
use marketdata_gateway::rules::{DocStoreRuleStore, RuleEngine};
use marketdata_gateway::storage::{MemoryKVStore, SqliteDocStore, StoragePort};
use marketdata_gateway::stream::{ClientReconnectRequest, StreamReceiver, SubscribeRequest};
use marketdata_gateway::symbol::{DocStoreSymbolRuleStore, SymbolMapperCache};
use marketdata_gateway::transformer::TransformerService;

/// Bootstrap-only adapter that breaks the `StreamReceiver` <-> `RecoveryEngine`
/// construction cycle: `StreamReceiver` needs a `RecoveryPort` at construction time,
/// but the only real `RecoveryPort` (`RecoveryEngine`) needs a `RecoveryDeliverySink`
/// that `StreamReceiver` itself implements. This forwards to the real engine once
/// `set` is called, which happens synchronously during startup, before the listener
/// accepts any connection — so there is no real race to resolve.
struct DeferredRecoveryPort {
    inner: OnceCell<Arc<dyn RecoveryPort>>,
}

impl DeferredRecoveryPort {
    fn new() -> Self {
        Self { inner: OnceCell::new() }
    }

    fn set(&self, port: Arc<dyn RecoveryPort>) {
        self.inner
            .set(port)
            .unwrap_or_else(|_| panic!("DeferredRecoveryPort::set called more than once"));
    }
}

#[async_trait::async_trait]
impl RecoveryPort for DeferredRecoveryPort {
    async fn submit(&self, request: RecoveryRequest) -> GatewayResult<(String, RecoveryAcceptance)> {
        match self.inner.get() {
            Some(port) => port.submit(request).await,
            None => Err(GatewayError::new(
                codes::STREAM_CACHE_SYSTEM_CIRCUIT_OPEN,
                "recovery engine not yet wired",
            )),
        }
    }
}

#[derive(Clone)]
struct AppState {
    stream_receiver: Arc<StreamReceiver>,
}

fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketdata_gateway=info,tower_http=info".into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().compact())
                .init();
        }
    }
}

fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One task per connected client: an inbound arm that decodes `subscribe` /
/// `reconnect` / `unsubscribe` frames per §6, and an outbound poll arm that
/// drains whatever `StreamReceiver` queued for this client (provider ticks,
/// recovery batches) and tags each with its wire `"type"`.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = uuid::Uuid::new_v4().to_string();
    info!(client_id = %client_id, "client connected");

    let mut outbound_poll = tokio::time::interval(Duration::from_millis(50));

    loop {
        tokio::select! {
            _ = outbound_poll.tick() => {
                for message in state.stream_receiver.drain_outbound(&client_id) {
                    let tagged = tag_outbound(message);
                    if socket.send(Message::Text(tagged.to_string())).await.is_err() {
                        state.stream_receiver.disconnect(&client_id);
                        return;
                    }
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = handle_client_frame(&state, &client_id, &text, &mut socket).await {
                            warn!(client_id = %client_id, %err, "failed to handle client frame");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        state.stream_receiver.disconnect(&client_id);
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(client_id = %client_id, %err, "websocket error");
                        state.stream_receiver.disconnect(&client_id);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(client_id = %client_id, "client disconnected");
}

fn tag_outbound(message: marketdata_gateway::stream::OutboundMessage) -> Value {
    let mut payload = message.payload;
    let tag = if message.is_recovery { "recovery" } else { "tick" };
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("type".to_string(), json!(tag));
    }
    payload
}

async fn handle_client_frame(state: &AppState, client_id: &str, text: &str, socket: &mut WebSocket) -> anyhow::Result<()> {
    let envelope: Value = serde_json::from_str(text)?;
    let msg_type = envelope.get("type").and_then(Value::as_str).unwrap_or_default();

    match msg_type {
        "subscribe" => {
            let request: SubscribeRequest = serde_json::from_value(envelope)?;
            let ack = state.stream_receiver.subscribe(client_id, request).await?;
            let mut payload = serde_json::to_value(&ack)?;
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("type".to_string(), json!("subscribe_ack"));
            }
            socket.send(Message::Text(payload.to_string())).await?;
        }
        "unsubscribe" => {
            let symbols: Vec<String> = envelope
                .get("symbols")
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default();
            state.stream_receiver.unsubscribe(client_id, &symbols);
        }
        "reconnect" => {
            let request: ClientReconnectRequest = serde_json::from_value(envelope)?;
            let response = state.stream_receiver.reconnect(request).await?;
            let mut payload = serde_json::to_value(&response)?;
            if let Some(obj) = payload.as_object_mut() {
                obj.insert("type".to_string(), json!("reconnect_ack"));
            }
            socket.send(Message::Text(payload.to_string())).await?;
        }
        other => {
            debug!(client_id, msg_type = other, "ignoring unrecognized frame type");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(config.log_format);

    if let Err(err) = install_metrics_exporter(config.metrics_addr) {
        warn!(%err, "failed to install prometheus exporter, continuing without metrics scrape endpoint");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let metrics: Arc<dyn Metrics> = Arc::new(RecorderMetrics);

    // Component D: Storage Port, over a SQLite durable tier and an in-process fast
    // cache (a real Redis-backed KVStore is out of scope; see DESIGN.md).
    let durable = Arc::new(SqliteDocStore::open(&config.sqlite_path)?);
    let fast = Arc::new(MemoryKVStore::new(clock.clone()));
    let storage = Arc::new(StoragePort::new(fast, durable.clone(), clock.clone(), metrics.clone(), config.storage));

    // Component A: Rule Store & Mapping Engine.
    let rule_store: Arc<dyn marketdata_gateway::rules::RuleStore> = Arc::new(DocStoreRuleStore::new(durable.clone()));
    let rule_engine = Arc::new(RuleEngine::new(rule_store));

    // Component C: Data Mapper Cache. Its own `KVStore` namespace (`best_rule:*`,
    // `rule_by_id:*`, ...), independent of the Storage Port's fast tier.
    let data_mapper_kv: Arc<dyn marketdata_gateway::ports::KVStore> = Arc::new(MemoryKVStore::new(clock.clone()));
    let data_mapper_cache =
        Arc::new(DataMapperCache::new(data_mapper_kv, clock.clone(), metrics.clone(), config.data_mapper_cache));

    // Component B: Symbol Mapper Cache, with its background invalidation watcher.
    let symbol_rule_store: Arc<dyn marketdata_gateway::symbol::SymbolRuleStore> =
        Arc::new(DocStoreSymbolRuleStore::new(durable.clone()));
    let symbol_mapper = Arc::new(SymbolMapperCache::new(symbol_rule_store, metrics.clone(), config.symbol_cache));
    tokio::spawn(marketdata_gateway::symbol::run_invalidation_watcher(
        symbol_mapper.clone(),
        durable.clone(),
        Duration::from_secs(30),
    ));

    // Component H: Market Status Service.
    let market_status = Arc::new(marketdata_gateway::market_status::MarketStatusService::with_default_schedules(
        clock.clone(),
        None,
    ));

    // Component E: Smart Cache Orchestrator.
    let orchestrator =
        SmartCacheOrchestrator::new(storage.clone(), market_status, clock.clone(), metrics.clone(), config.orchestrator);

    // Component I: Transformer Service.
    let transformer = Arc::new(TransformerService::new(rule_engine, data_mapper_cache, config.transformer));

    // Components F & G are mutually dependent (§2). Build F with a deferred
    // recovery port, then build G with F as its delivery sink, then resolve F's
    // deferred port onto the real G.
    let deferred_recovery = Arc::new(DeferredRecoveryPort::new());
    let recovery_port: Arc<dyn RecoveryPort> = deferred_recovery.clone();
    let stream_receiver = Arc::new(StreamReceiver::new(
        symbol_mapper,
        transformer,
        orchestrator,
        recovery_port,
        clock.clone(),
        metrics.clone(),
        config.stream_receiver,
    ));

    let delivery_sink: Arc<dyn marketdata_gateway::ports::RecoveryDeliverySink> = stream_receiver.clone();
    let recovery_engine = RecoveryEngine::new(storage, durable, delivery_sink, clock, metrics, config.recovery_engine);
    let resolved_recovery_port: Arc<dyn RecoveryPort> = Arc::new(recovery_engine);
    deferred_recovery.set(resolved_recovery_port);

    let state = AppState { stream_receiver };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "market data gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.graceful_shutdown_timeout))
        .await?;

    Ok(())
}

/// Accept-no-new-work happens implicitly once `axum::serve` stops accepting on
/// `ctrl_c`; this just bounds how long the process waits afterward before the
/// runtime is torn down out from under any still-draining task (§5 "graceful
/// shutdown: ... drain up to gracefulShutdownTimeout ... force-abort").
async fn shutdown_signal(drain_timeout: Duration) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining in-flight work");
    tokio::time::sleep(drain_timeout).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_outbound_marks_tick_and_recovery_distinctly() {
        let tick = tag_outbound(marketdata_gateway::stream::OutboundMessage { is_recovery: false, payload: json!({"symbol": "700.HK"}) });
        assert_eq!(tick["type"], json!("tick"));

        let recovery = tag_outbound(marketdata_gateway::stream::OutboundMessage { is_recovery: true, payload: json!({"recovery_batch": 1}) });
        assert_eq!(recovery["type"], json!("recovery"));
    }
}
