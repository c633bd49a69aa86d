//! Market Status port (§3, §4.E, §4.H). The orchestrator (E) consults this to pick
//! `MARKET_AWARE` TTLs; the concrete implementation lives in `market_status`
//! (Component H). Split out as a port so E does not depend on H's internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GatewayResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Market(pub &'static str);

impl Market {
    pub const HK: Market = Market("HK");
    pub const US: Market = Market("US");
    pub const SH: Market = Market("SH");
    pub const SZ: Market = Market("SZ");
    pub const SG: Market = Market("SG");
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    PreMarket,
    Trading,
    LunchBreak,
    AfterHours,
    Closed,
    Weekend,
    Holiday,
}

impl MarketState {
    /// Whether the market is open enough that data should use the short
    /// "open-market" TTL under the `MARKET_AWARE` strategy (§4.E).
    pub fn is_open_for_caching(self) -> bool {
        matches!(self, MarketState::Trading | MarketState::PreMarket | MarketState::AfterHours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketStatusResult {
    pub market: Market,
    pub state: MarketState,
    pub confidence: f64,
}

#[async_trait]
pub trait MarketStatusPort: Send + Sync {
    async fn status(&self, market: Market) -> GatewayResult<MarketStatusResult>;
}
