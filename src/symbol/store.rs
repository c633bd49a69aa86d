//! Durable `SymbolMappingRule` persistence — one document per provider (§3).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::docstore::DocStore;
use crate::ports::provider::Provider;

use super::model::SymbolMappingRule;

const COLLECTION: &str = "symbol_mapping_rules";

#[async_trait]
pub trait SymbolRuleStore: Send + Sync {
    async fn get(&self, provider: &Provider) -> GatewayResult<Option<SymbolMappingRule>>;
    async fn put(&self, rule: &SymbolMappingRule) -> GatewayResult<()>;
    async fn delete(&self, provider: &Provider) -> GatewayResult<()>;
}

pub struct DocStoreSymbolRuleStore {
    docs: Arc<dyn DocStore>,
}

impl DocStoreSymbolRuleStore {
    pub fn new(docs: Arc<dyn DocStore>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl SymbolRuleStore for DocStoreSymbolRuleStore {
    async fn get(&self, provider: &Provider) -> GatewayResult<Option<SymbolMappingRule>> {
        match self.docs.get(COLLECTION, &provider.0).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc).map_err(|e| {
                GatewayError::new(
                    codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                    format!("stored symbol mapping rule for '{provider}' is malformed: {e}"),
                )
            })?)),
            None => Ok(None),
        }
    }

    async fn put(&self, rule: &SymbolMappingRule) -> GatewayResult<()> {
        let doc = serde_json::to_value(rule).map_err(|e| {
            GatewayError::new(
                codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                format!("symbol mapping rule for '{}' does not serialize: {e}", rule.provider),
            )
        })?;
        self.docs.put(COLLECTION, &rule.provider.0, doc).await
    }

    async fn delete(&self, provider: &Provider) -> GatewayResult<()> {
        self.docs.delete(COLLECTION, &provider.0).await
    }
}
