//! Upstream provider SDK port. LongPort, iEx, TwelveData etc. are all accessed
//! through this one trait; only their interface appears here (§1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::GatewayResult;

/// A provider identifier. Providers are configuration-driven, not a closed enum,
/// since new upstreams are onboarded by adding mapping rules, not by recompiling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Provider(pub String);

impl Provider {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Provider {
    fn from(s: &str) -> Self {
        Provider(s.to_string())
    }
}

/// A single push event from a provider's streaming feed, still in provider-native
/// shape; mapping to standard symbol and canonical payload happens downstream.
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub provider: Provider,
    pub native_symbol: String,
    pub raw: Value,
    pub received_at_millis: i64,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// REST-style fetch of the raw (un-mapped) payload for a batch of provider-native
    /// symbols.
    async fn fetch(&self, native_symbols: &[String]) -> GatewayResult<Value>;

    /// Subscribe to this provider's push stream. Implementations fan out a single
    /// upstream connection to all subscribers via a broadcast channel.
    fn events(&self) -> broadcast::Receiver<ProviderEvent>;
}
