//! Persistence for `MappingRule`s (§3). Rules are documents: the store is a thin,
//! typed wrapper over a `DocStore`, the same pattern used for every other durable
//! record in this gateway.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::docstore::DocStore;
use crate::ports::provider::Provider;

use super::model::{ApiType, MappingRule, RuleListType};

const COLLECTION: &str = "mapping_rules";

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn get(&self, id: &str) -> GatewayResult<Option<MappingRule>>;
    async fn put(&self, rule: &MappingRule) -> GatewayResult<()>;
    async fn delete(&self, id: &str) -> GatewayResult<()>;
    async fn list_by_provider(
        &self,
        provider: &Provider,
        api_type: ApiType,
    ) -> GatewayResult<Vec<MappingRule>>;
    async fn list_all(&self) -> GatewayResult<Vec<MappingRule>>;
}

pub struct DocStoreRuleStore {
    docs: Arc<dyn DocStore>,
}

impl DocStoreRuleStore {
    pub fn new(docs: Arc<dyn DocStore>) -> Self {
        Self { docs }
    }
}

#[async_trait]
impl RuleStore for DocStoreRuleStore {
    async fn get(&self, id: &str) -> GatewayResult<Option<MappingRule>> {
        match self.docs.get(COLLECTION, id).await? {
            Some(doc) => Ok(Some(decode(doc)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, rule: &MappingRule) -> GatewayResult<()> {
        let doc = serde_json::to_value(rule).map_err(|e| {
            GatewayError::new(
                codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                format!("rule '{}' does not serialize: {e}", rule.id),
            )
        })?;
        self.docs.put(COLLECTION, &rule.id, doc).await
    }

    async fn delete(&self, id: &str) -> GatewayResult<()> {
        self.docs.delete(COLLECTION, id).await
    }

    async fn list_by_provider(
        &self,
        provider: &Provider,
        api_type: ApiType,
    ) -> GatewayResult<Vec<MappingRule>> {
        Ok(self
            .list_all()
            .await?
            .into_iter()
            .filter(|r| &r.provider == provider && r.api_type == api_type)
            .collect())
    }

    async fn list_all(&self) -> GatewayResult<Vec<MappingRule>> {
        self.docs
            .list(COLLECTION)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }
}

fn decode(doc: serde_json::Value) -> GatewayResult<MappingRule> {
    serde_json::from_value(doc).map_err(|e| {
        GatewayError::new(
            codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
            format!("stored rule document is malformed: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{FieldMapping, RuleStatus, Transform};
    use crate::testutil::InMemoryDocStore;

    fn sample(id: &str, is_default: bool) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            provider: Provider::new("acme"),
            api_type: ApiType::Stream,
            rule_list_type: RuleListType::QuoteFields,
            is_default,
            status: RuleStatus::Active,
            field_mappings: vec![FieldMapping {
                source_path: "last_done".into(),
                target_path: "last_price".into(),
                transform: Transform::None,
            }],
            version: 1,
            updated_at_millis: 0,
        }
    }

    #[tokio::test]
    async fn put_get_and_filter_by_provider() {
        let docs = Arc::new(InMemoryDocStore::new());
        let store = DocStoreRuleStore::new(docs);
        store.put(&sample("r1", true)).await.unwrap();
        store.put(&sample("r2", false)).await.unwrap();

        assert!(store.get("r1").await.unwrap().is_some());
        let listed = store.list_by_provider(&Provider::new("acme"), ApiType::Stream).await.unwrap();
        assert_eq!(listed.len(), 2);

        let other = store.list_by_provider(&Provider::new("other"), ApiType::Stream).await.unwrap();
        assert!(other.is_empty());
    }
}
