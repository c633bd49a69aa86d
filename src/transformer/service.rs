//! Component I: Transformer Service (§4.I). End-to-end orchestration for a single
//! request: finds the best matching rule (consulting the Data Mapper Cache (C)
//! before falling back to the Rule Engine (A)), applies it, and builds the
//! `{recordsProcessed, fieldsTransformed, transformationsApplied}` statistics the
//! spec names.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::try_join_all;
use serde_json::Value;

use crate::data_mapper_cache::DataMapperCache;
use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::provider::Provider;
use crate::ports::transformer::TransformerPort;
use crate::rules::engine::{ApplyOutcome, CompiledRule};
use crate::rules::model::Transform;
use crate::rules::{ApiType, RuleEngine, RuleListType};

use super::model::{TransformMetadata, TransformRequest, TransformResult};

#[derive(Debug, Clone, Copy)]
pub struct TransformerConfig {
    pub max_batch_size: usize,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self { max_batch_size: 500 }
    }
}

#[derive(Debug, Default)]
pub struct TransformerStats {
    pub records_processed: u64,
    pub fields_transformed: u64,
    pub rules_applied: u64,
}

#[derive(Default)]
struct AtomicStats {
    records_processed: AtomicU64,
    fields_transformed: AtomicU64,
    rules_applied: AtomicU64,
}

pub struct TransformerService {
    rule_engine: Arc<RuleEngine>,
    data_mapper_cache: Arc<DataMapperCache>,
    config: TransformerConfig,
    stats: AtomicStats,
}

impl TransformerService {
    pub fn new(rule_engine: Arc<RuleEngine>, data_mapper_cache: Arc<DataMapperCache>, config: TransformerConfig) -> Self {
        Self { rule_engine, data_mapper_cache, config, stats: AtomicStats::default() }
    }

    pub fn stats(&self) -> TransformerStats {
        TransformerStats {
            records_processed: self.stats.records_processed.load(Ordering::Relaxed),
            fields_transformed: self.stats.fields_transformed.load(Ordering::Relaxed),
            rules_applied: self.stats.rules_applied.load(Ordering::Relaxed),
        }
    }

    /// Finds the best rule for `(provider, api_type, rule_list_type)`, preferring
    /// the Data Mapper Cache's cached copy over the Rule Engine's own lookup, and
    /// populating the cache on a miss (§4.C/§4.I).
    async fn resolve_rule(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
    ) -> GatewayResult<Arc<CompiledRule>> {
        if let Some(rule) = self.data_mapper_cache.get_cached_best_matching_rule(provider, api_type, rule_list_type).await? {
            return self.rule_engine.compile(rule).await;
        }

        match self.rule_engine.find_best_matching(provider, api_type, rule_list_type).await? {
            Some(compiled) => {
                self.data_mapper_cache
                    .cache_best_matching_rule(provider, api_type, rule_list_type, &compiled.rule)
                    .await?;
                Ok(compiled)
            }
            None => Err(GatewayError::new(
                codes::SYMBOL_TRANSFORMER_BUSINESS_RULE_NOT_FOUND,
                format!("no active rule for {provider}/{api_type:?}/{rule_list_type:?}"),
            )
            .retryable(false)),
        }
    }

    /// Applies `compiled` to `raw`, producing statistics alongside the canonical
    /// payload. A single record collapses to a bare object; more than one (the
    /// elementwise case) becomes a JSON array.
    fn apply_compiled(&self, compiled: &CompiledRule, raw: &Value) -> GatewayResult<TransformResult> {
        let outcome: ApplyOutcome = self.rule_engine.apply(compiled, raw)?;
        let metadata = build_metadata(compiled, &outcome);

        self.stats.records_processed.fetch_add(metadata.records_processed, Ordering::Relaxed);
        self.stats.fields_transformed.fetch_add(metadata.fields_transformed, Ordering::Relaxed);
        self.stats.rules_applied.fetch_add(1, Ordering::Relaxed);

        let data = match outcome.records.len() {
            1 => outcome.records.into_iter().next().unwrap(),
            _ => Value::Array(outcome.records),
        };
        Ok(TransformResult { data, metadata })
    }

    pub async fn transform(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
        raw: &Value,
    ) -> GatewayResult<TransformResult> {
        let compiled = self.resolve_rule(provider, api_type, rule_list_type).await?;
        self.apply_compiled(&compiled, raw)
    }

    /// Groups requests by `(provider, api_type, rule_list_type)` so one rule
    /// lookup serves every member of the group, then applies the group's members
    /// concurrently (§4.I "group requests are applied in parallel").
    pub async fn transform_batch(&self, items: Vec<TransformRequest>) -> GatewayResult<Vec<TransformResult>> {
        if items.len() > self.config.max_batch_size {
            return Err(GatewayError::new(
                codes::SYMBOL_TRANSFORMER_BUSINESS_BATCH_SIZE_EXCEEDED,
                format!("batch of {} exceeds the maximum of {}", items.len(), self.config.max_batch_size),
            )
            .retryable(false));
        }

        let mut groups: std::collections::HashMap<(Provider, ApiType, RuleListType), Vec<usize>> = std::collections::HashMap::new();
        for (index, item) in items.iter().enumerate() {
            groups.entry((item.provider.clone(), item.api_type, item.rule_list_type)).or_default().push(index);
        }

        let mut results: Vec<Option<TransformResult>> = (0..items.len()).map(|_| None).collect();

        for ((provider, api_type, rule_list_type), indices) in groups {
            let compiled = self.resolve_rule(&provider, api_type, rule_list_type).await?;
            let applied = try_join_all(indices.into_iter().map(|index| {
                let compiled = compiled.clone();
                let raw = items[index].raw.clone();
                async move { Ok::<_, GatewayError>((index, self.apply_compiled(&compiled, &raw)?)) }
            }))
            .await?;

            for (index, result) in applied {
                results[index] = Some(result);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every index populated by its group")).collect())
    }
}

#[async_trait]
impl TransformerPort for TransformerService {
    async fn transform(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
        raw: &Value,
    ) -> GatewayResult<ApplyOutcome> {
        let compiled = self.resolve_rule(provider, api_type, rule_list_type).await?;
        self.rule_engine.apply(&compiled, raw)
    }
}

fn build_metadata(compiled: &CompiledRule, outcome: &ApplyOutcome) -> TransformMetadata {
    let records_processed = outcome.records.len() as u64;
    let fields_transformed = outcome
        .records
        .iter()
        .map(|r| r.as_object().map(|o| o.len()).unwrap_or(0) as u64)
        .sum();

    let transformations_applied: Vec<String> = compiled
        .rule
        .field_mappings
        .iter()
        .filter_map(|fm| transform_kind_name(&fm.transform))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect();

    TransformMetadata { records_processed, fields_transformed, transformations_applied }
}

fn transform_kind_name(transform: &Transform) -> Option<&'static str> {
    match transform {
        Transform::None => None,
        Transform::Multiply { .. } => Some("multiply"),
        Transform::Divide { .. } => Some("divide"),
        Transform::Add { .. } => Some("add"),
        Transform::Subtract { .. } => Some("subtract"),
        Transform::Format { .. } => Some("format"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;
    use crate::ports::metrics::NoopMetrics;
    use crate::rules::model::{FieldMapping, MappingRule, RuleStatus};
    use crate::rules::store::DocStoreRuleStore;
    use crate::testutil::{InMemoryDocStore, InMemoryKVStore};
    use crate::data_mapper_cache::DataMapperCacheConfig;
    use serde_json::json;

    fn rule(id: &str) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            provider: Provider::new("acme"),
            api_type: ApiType::Stream,
            rule_list_type: RuleListType::QuoteFields,
            is_default: true,
            status: RuleStatus::Active,
            field_mappings: vec![
                FieldMapping { source_path: "last_done".into(), target_path: "last_price".into(), transform: Transform::Multiply { value: 1.0 } },
                FieldMapping { source_path: "volume".into(), target_path: "volume".into(), transform: Transform::None },
            ],
            version: 1,
            updated_at_millis: 0,
        }
    }

    fn service() -> (TransformerService, Arc<dyn crate::rules::RuleStore>) {
        let docs = Arc::new(InMemoryDocStore::new());
        let store: Arc<dyn crate::rules::RuleStore> = Arc::new(DocStoreRuleStore::new(docs));
        let rule_engine = Arc::new(RuleEngine::new(store.clone()));
        let clock = Arc::new(FixedClock::new(0));
        let kv = Arc::new(InMemoryKVStore::new({
            let clock = clock.clone();
            Arc::new(move || clock.now_millis())
        }));
        let data_mapper_cache = Arc::new(DataMapperCache::new(kv, clock, Arc::new(NoopMetrics), DataMapperCacheConfig::default()));
        (TransformerService::new(rule_engine, data_mapper_cache, TransformerConfig::default()), store)
    }

    #[tokio::test]
    async fn transform_builds_metadata_from_applied_rule() {
        let (service, store) = service();
        store.put(&rule("r1")).await.unwrap();

        let result = service
            .transform(&Provider::new("acme"), ApiType::Stream, RuleListType::QuoteFields, &json!({"last_done": "1.5", "volume": 100}))
            .await
            .unwrap();

        assert_eq!(result.metadata.records_processed, 1);
        assert_eq!(result.metadata.fields_transformed, 2);
        assert_eq!(result.metadata.transformations_applied, vec!["multiply".to_string()]);
    }

    #[tokio::test]
    async fn missing_rule_is_a_business_error() {
        let (service, _store) = service();
        let err = service
            .transform(&Provider::new("nobody"), ApiType::Stream, RuleListType::QuoteFields, &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::SYMBOL_TRANSFORMER_BUSINESS_RULE_NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_larger_than_cap_is_rejected() {
        let service = TransformerService::new(
            Arc::new(RuleEngine::new(Arc::new(DocStoreRuleStore::new(Arc::new(InMemoryDocStore::new()))))),
            Arc::new(DataMapperCache::new(
                Arc::new(InMemoryKVStore::new(Arc::new(|| 0))),
                Arc::new(FixedClock::new(0)),
                Arc::new(NoopMetrics),
                DataMapperCacheConfig::default(),
            )),
            TransformerConfig { max_batch_size: 1 },
        );
        let items = vec![
            TransformRequest { provider: Provider::new("acme"), api_type: ApiType::Stream, rule_list_type: RuleListType::QuoteFields, raw: json!({}) },
            TransformRequest { provider: Provider::new("acme"), api_type: ApiType::Stream, rule_list_type: RuleListType::QuoteFields, raw: json!({}) },
        ];
        let err = service.transform_batch(items).await.unwrap_err();
        assert_eq!(err.code, codes::SYMBOL_TRANSFORMER_BUSINESS_BATCH_SIZE_EXCEEDED);
    }
}
