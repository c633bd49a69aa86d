//! Component I: Transformer Service (§4.I).

pub mod model;
pub mod service;

pub use model::{TransformMetadata, TransformRequest, TransformResult};
pub use service::{TransformerConfig, TransformerService, TransformerStats};
