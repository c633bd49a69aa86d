//! Wire-visible request/response shapes for Component I (§4.I, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ports::provider::Provider;
use crate::rules::{ApiType, RuleListType};

#[derive(Debug, Clone, Deserialize)]
pub struct TransformRequest {
    pub provider: Provider,
    pub api_type: ApiType,
    pub rule_list_type: RuleListType,
    pub raw: Value,
}

/// Statistics built for a single `transform`/`transform_batch` call (§4.I).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformMetadata {
    pub records_processed: u64,
    pub fields_transformed: u64,
    pub transformations_applied: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformResult {
    pub data: Value,
    pub metadata: TransformMetadata,
}
