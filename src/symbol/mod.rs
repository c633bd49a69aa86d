//! Component B: Symbol Mapper Cache (§4.B).

pub mod cache;
pub mod model;
pub mod regex_gates;
pub mod store;
pub mod watcher;

pub use cache::{CacheStatsSnapshot, MemoryPressureOutcome, SymbolCacheConfig, SymbolMapperCache};
pub use model::{BatchLookup, Direction, SymbolMapEntry, SymbolMappingRule};
pub use regex_gates::is_valid_standard_symbol;
pub use store::{DocStoreSymbolRuleStore, SymbolRuleStore};
pub use watcher::run_invalidation_watcher;
