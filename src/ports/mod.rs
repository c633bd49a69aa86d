//! External collaborators as explicit, constructor-injected ports.
//!
//! Per SPEC_FULL §9 ("singletons → explicit ports"), `KVStore`, `DocStore`,
//! `ProviderAdapter`, `Metrics`, and `Clock` are trait objects threaded into each
//! component as `Arc<dyn Trait>`. Production wiring lives in `main.rs`; test doubles
//! live in `testutil`.

pub mod clock;
pub mod docstore;
pub mod kvstore;
pub mod market_status;
pub mod metrics;
pub mod principal;
pub mod provider;
pub mod recovery;
pub mod transformer;

pub use clock::Clock;
pub use docstore::DocStore;
pub use kvstore::KVStore;
pub use market_status::{Market, MarketState, MarketStatusPort, MarketStatusResult};
pub use metrics::Metrics;
pub use principal::{Capability, Principal};
pub use provider::{Provider, ProviderAdapter, ProviderEvent};
pub use recovery::{
    RecoveryAcceptance, RecoveryAction, RecoveryDataMessage, RecoveryDeliverySink, RecoveryFailureMessage,
    RecoveryPort, RecoveryRequest,
};
pub use transformer::TransformerPort;
