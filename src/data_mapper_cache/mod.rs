//! Component C: Data Mapper Cache (§4.C).

pub mod cache;
pub mod keys;

pub use cache::{DataMapperCache, DataMapperCacheConfig, DataMapperCacheStats};
