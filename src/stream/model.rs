//! Wire-visible message shapes for the stream receiver's push protocol (§6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsCapabilityType {
    Quote,
    Depth,
    Trade,
    Broker,
    Kline,
}

/// Per-connection health grade (§3 "Subscription"), derived from error counters
/// and liveness windows; used as an eviction priority under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Excellent,
    Good,
    Poor,
    Critical,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeRequest {
    pub symbols: Vec<String>,
    pub ws_capability_type: WsCapabilityType,
    pub preferred_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedSymbol {
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeAck {
    pub success: bool,
    pub confirmed_symbols: Vec<String>,
    pub rejected_symbols: Vec<RejectedSymbol>,
    pub server_timestamp: i64,
}

/// Server push carrying a transformed canonical payload for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct TickMessage {
    pub symbol: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientReconnectRequest {
    pub client_id: String,
    pub last_receive_timestamp: i64,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStrategy {
    pub will_recover: bool,
    pub time_range: Option<(i64, i64)>,
    pub estimated_data_points: u64,
    pub recovery_job_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientReconnectResponse {
    pub recovery_strategy: RecoveryStrategy,
    pub server_time: i64,
}
