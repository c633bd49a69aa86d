//! Stable key formats for the rule cache namespaces (§6 "Key formats").

use crate::ports::provider::Provider;
use crate::rules::{ApiType, RuleListType};

fn api_type_str(api_type: ApiType) -> &'static str {
    match api_type {
        ApiType::Rest => "rest",
        ApiType::Stream => "stream",
    }
}

fn rule_list_type_str(rule_list_type: RuleListType) -> &'static str {
    match rule_list_type {
        RuleListType::QuoteFields => "quote_fields",
        RuleListType::BasicInfoFields => "basic_info_fields",
        RuleListType::IndexFields => "index_fields",
        RuleListType::MarketStatusFields => "market_status_fields",
    }
}

pub fn best_rule_key(provider: &Provider, api_type: ApiType, rule_list_type: RuleListType) -> String {
    format!(
        "best_rule:{}:{}:{}",
        provider,
        api_type_str(api_type),
        rule_list_type_str(rule_list_type)
    )
}

pub fn rule_by_id_key(id: &str) -> String {
    format!("rule_by_id:{id}")
}

pub fn provider_rules_key(provider: &Provider, api_type: ApiType) -> String {
    format!("provider_rules:{}:{}", provider, api_type_str(api_type))
}

/// SCAN pattern covering every `best_rule`/`provider_rules` entry for a provider,
/// regardless of `apiType`/`ruleListType` (§4.C "invalidateProviderCache").
pub fn provider_wildcard_patterns(provider: &Provider) -> [String; 2] {
    [format!("best_rule:{provider}:*"), format!("provider_rules:{provider}:*")]
}
