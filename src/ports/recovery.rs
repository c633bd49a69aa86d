//! Recovery Engine port (§4.F/§4.G). The Stream Receiver (F) hands off a recovery
//! request on reconnect; the concrete Recovery Engine implementation lives in
//! `recovery` (Component G). Split out as a port so F does not depend on G's
//! internals (mirrors `ports::market_status`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub client_id: String,
    pub symbols: Vec<String>,
    pub from_millis: i64,
    pub to_millis: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecoveryAcceptance {
    pub estimated_data_points: u64,
}

#[async_trait]
pub trait RecoveryPort: Send + Sync {
    /// Accepts a recovery request and returns the job id plus a rough estimate of
    /// how many data points will be replayed. Rejects (per §4.G step 1) if the
    /// requested window exceeds `maxRecoveryWindow`.
    async fn submit(&self, request: RecoveryRequest) -> GatewayResult<(String, RecoveryAcceptance)>;
}

/// One batch of replayed data for a `RecoveryJob` (§4.G step 3 / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryDataMessage {
    pub recovery_batch: u32,
    pub total_batches: u32,
    pub timestamp: i64,
    pub time_range: (i64, i64),
    pub is_last_batch: bool,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Resubscribe,
    RetryLater,
    ContactSupport,
}

/// Terminal unrecoverable-error message for a `RecoveryJob` (§4.G step 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryFailureMessage {
    pub action: RecoveryAction,
    pub message: String,
}

/// Where a `RecoveryJob`'s output is delivered. Implemented by the Stream Receiver
/// (F), which knows how to route a client id to its outbound queue; split out so
/// the Recovery Engine (G) does not depend on F's connection/subscription types.
#[async_trait]
pub trait RecoveryDeliverySink: Send + Sync {
    async fn deliver_batch(&self, client_id: &str, message: RecoveryDataMessage);
    async fn deliver_failure(&self, client_id: &str, message: RecoveryFailureMessage);
}
