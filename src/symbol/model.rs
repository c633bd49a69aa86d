//! Symbol mapping data model (§3 "SymbolMapEntry").

use serde::{Deserialize, Serialize};

use crate::ports::provider::Provider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    ToStandard,
    FromStandard,
}

/// One `(provider, standardSymbol) <-> (providerSymbol)` pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMapEntry {
    pub standard_symbol: String,
    pub provider_symbol: String,
}

/// The durable document a provider's whole symbol table is sourced from — one
/// document holds every entry for that provider (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMappingRule {
    pub provider: Provider,
    pub entries: Vec<SymbolMapEntry>,
    pub version: u32,
}

/// The result shape shared by `toStandard`/`fromStandard` (§4.B).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchLookup {
    pub mapping: std::collections::BTreeMap<String, String>,
    pub failed: Vec<String>,
    pub cache_hits: u64,
}
