//! Component A: Rule Store & Mapping Engine (§3/§4.A).

pub mod engine;
pub mod model;
pub mod path;
pub mod store;
pub mod transform;

pub use engine::{ApplyOutcome, CompiledRule, RuleEngine};
pub use model::{ApiType, FieldMapping, MappingRule, RuleListType, RuleStatus, Transform};
pub use store::{DocStoreRuleStore, RuleStore};
