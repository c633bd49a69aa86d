//! Component E: Smart Cache Orchestrator (§3/§4.E).

pub mod adaptive;
pub mod cache;
pub mod coalescing;
pub mod config;

pub use adaptive::AdaptiveConcurrencyController;
pub use cache::{GetOrSetOutcome, SmartCacheOrchestrator, Source};
pub use coalescing::CoalescingLocks;
pub use config::{AdaptiveConfig, MarketAwareConfig, OrchestratorConfig, Strategy, StrongTimelinessConfig, WeakTimelinessConfig};
