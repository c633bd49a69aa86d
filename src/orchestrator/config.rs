//! Strategy selection and tuning knobs for the Smart Cache Orchestrator (§4.E).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    StrongTimeliness,
    WeakTimeliness,
    MarketAware,
    NoCache,
    Adaptive,
}

#[derive(Debug, Clone, Copy)]
pub struct StrongTimelinessConfig {
    pub ttl: Duration,
    /// Fraction of TTL remaining at which a background refresh is scheduled.
    pub background_refresh_ratio: f64,
    /// Refresh unconditionally after this much wall time regardless of age.
    pub force_refresh_interval: Duration,
}

impl Default for StrongTimelinessConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            background_refresh_ratio: 0.3,
            force_refresh_interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WeakTimelinessConfig {
    pub ttl: Duration,
    pub background_refresh_ratio: f64,
    pub min_update_interval: Duration,
}

impl Default for WeakTimelinessConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(300), background_refresh_ratio: 0.2, min_update_interval: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MarketAwareConfig {
    pub open_market_ttl: Duration,
    pub closed_market_ttl: Duration,
    pub market_status_check_interval: Duration,
}

impl Default for MarketAwareConfig {
    fn default() -> Self {
        Self {
            open_market_ttl: Duration::from_secs(30),
            closed_market_ttl: Duration::from_secs(1800),
            market_status_check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub base_ttl: Duration,
    pub min_ttl: Duration,
    pub max_ttl: Duration,
    pub adaptation_factor: f64,
    pub change_detection_window: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            base_ttl: Duration::from_secs(60),
            min_ttl: Duration::from_secs(10),
            max_ttl: Duration::from_secs(600),
            adaptation_factor: 1.5,
            change_detection_window: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub strong_timeliness: StrongTimelinessConfig,
    pub weak_timeliness: WeakTimelinessConfig,
    pub market_aware: MarketAwareConfig,
    pub adaptive: AdaptiveConfig,
    /// Per-wait timeout for a coalesced `getOrSet` caller (§5).
    pub operation_timeout: Duration,
    /// Whether a fetch failure falls back to the last-known cached value.
    pub enable_fallback: bool,
    /// Starting bound for `maxConcurrentOperations`; the adaptive controller
    /// grows/shrinks it at runtime between `[base, min(base*2, 32)]`.
    pub base_max_concurrent_operations: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strong_timeliness: StrongTimelinessConfig::default(),
            weak_timeliness: WeakTimelinessConfig::default(),
            market_aware: MarketAwareConfig::default(),
            adaptive: AdaptiveConfig::default(),
            operation_timeout: Duration::from_secs(5),
            enable_fallback: true,
            base_max_concurrent_operations: 8,
        }
    }
}
