//! The rule engine (§3/§4.A): compiles `MappingRule`s once, picks the best
//! matching rule for a `(provider, api_type, rule_list_type)` triple, and applies
//! a compiled rule to a raw provider payload.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::provider::Provider;

use super::model::{ApiType, FieldMapping, MappingRule, RuleListType};
use super::path::{self, CompiledPath};
use super::store::RuleStore;
use super::transform;

struct CompiledMapping {
    source: CompiledPath,
    target: CompiledPath,
    transform: super::model::Transform,
}

/// A `MappingRule` with every path pre-parsed. Cheap to apply repeatedly; expensive
/// enough to compile (string splitting, dangerous-key checks) that it's cached.
pub struct CompiledRule {
    pub rule: MappingRule,
    mappings: Vec<CompiledMapping>,
}

/// The result of applying one rule to one raw payload: zero or more canonical
/// records (more than one when a mapping targets an elementwise array field) plus
/// any non-fatal warnings collected along the way (§3 "apply semantics").
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub records: Vec<serde_json::Value>,
    pub warnings: Vec<String>,
}

pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    compiled: DashMap<String, Arc<CompiledRule>>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self { store, compiled: DashMap::new() }
    }

    /// Drops every cached compiled rule. Call after any rule mutation, or when a
    /// `DocStore` change-stream event names the rules collection.
    pub fn invalidate_all(&self) {
        self.compiled.clear();
    }

    pub fn invalidate(&self, rule_id: &str) {
        self.compiled.remove(rule_id);
    }

    async fn compiled_rule(&self, rule: MappingRule) -> GatewayResult<Arc<CompiledRule>> {
        if let Some(hit) = self.compiled.get(&rule.id) {
            if hit.rule.version == rule.version {
                return Ok(hit.clone());
            }
        }
        let mappings = compile_mappings(&rule.field_mappings)?;
        let compiled = Arc::new(CompiledRule { rule: rule.clone(), mappings });
        self.compiled.insert(rule.id.clone(), compiled.clone());
        Ok(compiled)
    }

    /// Compiles an already-fetched rule, e.g. one a caller read from the Data
    /// Mapper Cache (C) rather than the rule store directly.
    pub async fn compile(&self, rule: MappingRule) -> GatewayResult<Arc<CompiledRule>> {
        self.compiled_rule(rule).await
    }

    pub async fn find_by_id(&self, id: &str) -> GatewayResult<Option<Arc<CompiledRule>>> {
        match self.store.get(id).await? {
            Some(rule) => Ok(Some(self.compiled_rule(rule).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_by_provider(
        &self,
        provider: &Provider,
        api_type: ApiType,
    ) -> GatewayResult<Vec<MappingRule>> {
        self.store.list_by_provider(provider, api_type).await
    }

    /// Among active rules for `(provider, api_type, rule_list_type)`, prefers a
    /// non-default rule (most specific) over the provider's default rule, and the
    /// newest version when several candidates tie.
    pub async fn find_best_matching(
        &self,
        provider: &Provider,
        api_type: ApiType,
        rule_list_type: RuleListType,
    ) -> GatewayResult<Option<Arc<CompiledRule>>> {
        let candidates: Vec<MappingRule> = self
            .store
            .list_by_provider(provider, api_type)
            .await?
            .into_iter()
            .filter(|r| r.rule_list_type == rule_list_type && r.is_active())
            .collect();

        let best = candidates
            .into_iter()
            .max_by_key(|r| (!r.is_default, r.version));

        match best {
            Some(rule) => Ok(Some(self.compiled_rule(rule).await?)),
            None => Ok(None),
        }
    }

    /// Applies a compiled rule to a raw payload, producing canonical records.
    ///
    /// - If `raw` is itself an array, each element is treated as one record.
    /// - Else, if any field mapping's source path contains a `[]` wildcard, the
    ///   array it resolves to drives the elementwise output length.
    /// - Else, `raw` maps to exactly one record.
    pub fn apply(&self, rule: &CompiledRule, raw: &serde_json::Value) -> GatewayResult<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        let record_roots: Vec<&serde_json::Value> = if let Some(items) = raw.as_array() {
            items.iter().collect()
        } else {
            vec![raw]
        };

        for root in record_roots {
            let elementwise_len = rule
                .mappings
                .iter()
                .find_map(|m| path::array_length_at(root, &m.source));

            match elementwise_len {
                Some(len) => {
                    for idx in 0..len {
                        let record = self.apply_one(rule, root, Some(idx), &mut outcome.warnings)?;
                        outcome.records.push(record);
                    }
                }
                None => {
                    let record = self.apply_one(rule, root, None, &mut outcome.warnings)?;
                    outcome.records.push(record);
                }
            }
        }

        Ok(outcome)
    }

    fn apply_one(
        &self,
        rule: &CompiledRule,
        root: &serde_json::Value,
        wildcard_index: Option<usize>,
        warnings: &mut Vec<String>,
    ) -> GatewayResult<serde_json::Value> {
        if !root.is_object() && !root.is_array() {
            return Err(GatewayError::new(
                codes::SYMBOL_TRANSFORMER_VALIDATION_INVALID_DATA_FORMAT,
                format!("raw payload for rule '{}' is neither object nor array", rule.rule.id),
            )
            .retryable(false));
        }

        let mut out = serde_json::Value::Object(Default::default());
        for mapping in &rule.mappings {
            if !mapping.source.within_depth {
                warnings.push(format!(
                    "source path '{}' exceeds the maximum traversal depth",
                    mapping.source.raw
                ));
                continue;
            }
            let Some(raw_value) = path::resolve(root, &mapping.source, wildcard_index) else {
                continue;
            };
            let (value, warning) = transform::apply(&mapping.transform, &raw_value);
            if let Some(w) = warning {
                warnings.push(format!("{}: {w}", mapping.target.raw));
            }
            path::write(&mut out, &mapping.target, value);
        }
        Ok(out)
    }
}

fn compile_mappings(field_mappings: &[FieldMapping]) -> GatewayResult<Vec<CompiledMapping>> {
    field_mappings
        .iter()
        .map(|fm| {
            Ok(CompiledMapping {
                source: path::compile(&fm.source_path)?,
                target: path::compile(&fm.target_path)?,
                transform: fm.transform.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{RuleStatus, Transform};
    use crate::rules::store::DocStoreRuleStore;
    use crate::testutil::InMemoryDocStore;
    use serde_json::json;

    fn rule(id: &str, is_default: bool, version: u32, mappings: Vec<FieldMapping>) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            provider: Provider::new("acme"),
            api_type: ApiType::Stream,
            rule_list_type: RuleListType::QuoteFields,
            is_default,
            status: RuleStatus::Active,
            field_mappings: mappings,
            version,
            updated_at_millis: 0,
        }
    }

    #[tokio::test]
    async fn prefers_specific_rule_over_default() {
        let docs = Arc::new(InMemoryDocStore::new());
        let store: Arc<dyn RuleStore> = Arc::new(DocStoreRuleStore::new(docs));
        store.put(&rule("default", true, 1, vec![])).await.unwrap();
        store.put(&rule("specific", false, 1, vec![])).await.unwrap();

        let engine = RuleEngine::new(store);
        let best = engine
            .find_best_matching(&Provider::new("acme"), ApiType::Stream, RuleListType::QuoteFields)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.rule.id, "specific");
    }

    #[tokio::test]
    async fn apply_maps_scalar_and_elementwise_records() {
        let docs = Arc::new(InMemoryDocStore::new());
        let store: Arc<dyn RuleStore> = Arc::new(DocStoreRuleStore::new(docs));
        let mappings = vec![FieldMapping {
            source_path: "secu_quote[].last_done".into(),
            target_path: "last_price".into(),
            transform: Transform::Multiply { value: 100.0 },
        }];
        store.put(&rule("r1", true, 1, mappings)).await.unwrap();

        let engine = RuleEngine::new(store.clone());
        let compiled = engine.find_by_id("r1").await.unwrap().unwrap();

        let raw = json!({"secu_quote": [{"last_done": "1.5"}, {"last_done": "2.0"}]});
        let outcome = engine.apply(&compiled, &raw).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0]["last_price"], json!(150.0));
        assert_eq!(outcome.records[1]["last_price"], json!(200.0));
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn missing_source_field_is_silently_omitted() {
        let docs = Arc::new(InMemoryDocStore::new());
        let store: Arc<dyn RuleStore> = Arc::new(DocStoreRuleStore::new(docs));
        let mappings = vec![FieldMapping {
            source_path: "does_not_exist".into(),
            target_path: "out".into(),
            transform: Transform::None,
        }];
        store.put(&rule("r1", true, 1, mappings)).await.unwrap();

        let engine = RuleEngine::new(store);
        let compiled = engine.find_by_id("r1").await.unwrap().unwrap();
        let outcome = engine.apply(&compiled, &json!({"other": 1})).unwrap();
        assert_eq!(outcome.records, vec![json!({})]);
    }
}
