//! Transformer Service port (§4.F/§4.I). The Stream Receiver (F) transforms each
//! inbound provider push through this port; the concrete implementation lives in
//! `transformer` (Component I), which composes the Rule Store (A) and Data Mapper
//! Cache (C). Split out so F does not depend on I's internals.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::GatewayResult;
use crate::ports::provider::Provider;
use crate::rules::{ApiType, ApplyOutcome, RuleListType};

#[async_trait]
pub trait TransformerPort: Send + Sync {
    async fn transform(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
        raw: &Value,
    ) -> GatewayResult<ApplyOutcome>;
}
