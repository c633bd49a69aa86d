//! Per-connection state (§4.F): subscribed symbols, liveness, dispatch circuit
//! breaker, and the bounded outbound queue. One instance per connected client.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::stream::backpressure::{OutboundMessage, OutboundQueue};
use crate::stream::model::{Health, WsCapabilityType};
use crate::support::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

/// Dispatch breaker opens on five consecutive failures (the breaker's own rule)
/// OR ten cumulative errors (tracked independently here, tripped via `force_open`).
const CUMULATIVE_ERROR_TRIP: u32 = 10;
const HEARTBEAT_LIVENESS_MILLIS: i64 = 2 * 60 * 1000;
const ACTIVITY_LIVENESS_MILLIS: i64 = 30 * 60 * 1000;

pub struct ConnectionState {
    pub client_id: String,
    pub ws_capability_type: WsCapabilityType,
    pub preferred_provider: Option<String>,
    subscriptions: RwLock<HashSet<String>>,
    last_receive_ts: AtomicI64,
    cumulative_errors: AtomicU32,
    breaker: CircuitBreaker,
    outbound: Mutex<OutboundQueue>,
}

impl ConnectionState {
    pub fn new(
        client_id: String,
        ws_capability_type: WsCapabilityType,
        preferred_provider: Option<String>,
        outbound_queue_capacity: usize,
        now_millis: i64,
    ) -> Self {
        Self {
            client_id,
            ws_capability_type,
            preferred_provider,
            subscriptions: RwLock::new(HashSet::new()),
            last_receive_ts: AtomicI64::new(now_millis),
            cumulative_errors: AtomicU32::new(0),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 5,
                success_threshold: 3,
                cooldown: std::time::Duration::from_secs(60),
            }),
            outbound: Mutex::new(OutboundQueue::new(outbound_queue_capacity)),
        }
    }

    pub fn subscribe(&self, symbols: impl IntoIterator<Item = String>) {
        let mut subs = self.subscriptions.write();
        subs.extend(symbols);
    }

    pub fn unsubscribe(&self, symbols: &[String]) {
        let mut subs = self.subscriptions.write();
        for symbol in symbols {
            subs.remove(symbol);
        }
    }

    pub fn subscriptions(&self) -> HashSet<String> {
        self.subscriptions.read().clone()
    }

    pub fn touch(&self, now_millis: i64) {
        self.last_receive_ts.store(now_millis, Ordering::Relaxed);
    }

    pub fn last_receive_ts(&self) -> i64 {
        self.last_receive_ts.load(Ordering::Relaxed)
    }

    pub fn dispatch_allowed(&self) -> bool {
        self.breaker.allow()
    }

    pub fn record_dispatch_success(&self) {
        self.breaker.record_success();
    }

    pub fn record_dispatch_failure(&self) {
        self.breaker.record_failure();
        let total = self.cumulative_errors.fetch_add(1, Ordering::Relaxed) + 1;
        if total >= CUMULATIVE_ERROR_TRIP {
            self.breaker.force_open();
        }
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Enqueues `msg` for this connection's writer task; returns `true` if an
    /// eviction occurred under back-pressure.
    pub fn enqueue(&self, msg: OutboundMessage) -> bool {
        self.outbound.lock().push(msg)
    }

    pub fn drain_outbound(&self) -> Vec<OutboundMessage> {
        self.outbound.lock().drain()
    }

    pub fn health(&self, now_millis: i64) -> Health {
        if self.breaker_state() == CircuitState::Open {
            return Health::Critical;
        }
        let age = now_millis - self.last_receive_ts();
        if age > ACTIVITY_LIVENESS_MILLIS {
            return Health::Critical;
        }
        let cumulative = self.cumulative_errors.load(Ordering::Relaxed);
        if self.breaker_state() == CircuitState::HalfOpen || cumulative >= CUMULATIVE_ERROR_TRIP / 2 {
            return Health::Poor;
        }
        if age > HEARTBEAT_LIVENESS_MILLIS {
            return Health::Good;
        }
        Health::Excellent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnectionState {
        ConnectionState::new("c1".to_string(), WsCapabilityType::Quote, None, 8, 0)
    }

    #[test]
    fn fresh_connection_is_excellent() {
        let state = conn();
        assert_eq!(state.health(0), Health::Excellent);
    }

    #[test]
    fn ten_cumulative_errors_force_opens_independent_of_consecutive_count() {
        let state = conn();
        for _ in 0..9 {
            state.record_dispatch_failure();
            state.record_dispatch_success();
        }
        assert_eq!(state.breaker_state(), CircuitState::Closed);
        state.record_dispatch_failure();
        assert_eq!(state.breaker_state(), CircuitState::Open);
        assert_eq!(state.health(0), Health::Critical);
    }

    #[test]
    fn subscribe_then_unsubscribe_is_symmetric() {
        let state = conn();
        state.subscribe(["700.HK".to_string(), "AAPL.US".to_string()]);
        assert_eq!(state.subscriptions().len(), 2);
        state.unsubscribe(&["700.HK".to_string()]);
        assert_eq!(state.subscriptions(), HashSet::from(["AAPL.US".to_string()]));
    }
}
