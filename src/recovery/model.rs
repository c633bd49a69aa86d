//! Recovery Engine data model (§3 "RecoveryJob").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryJobState {
    Pending,
    Active,
    Completed,
    Failed,
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryJob {
    pub id: String,
    pub client_id: String,
    pub symbols: Vec<String>,
    pub from_millis: i64,
    pub to_millis: i64,
    pub state: RecoveryJobState,
    pub batches_sent: u32,
    pub data_points_recovered: u64,
    pub created_at_millis: i64,
}

/// One archived tick, sourced from the durable archive for points outside the
/// Smart Cache Orchestrator's recent-window coverage (§4.G step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedTick {
    pub symbol: String,
    pub timestamp_millis: i64,
    pub data: Value,
}
