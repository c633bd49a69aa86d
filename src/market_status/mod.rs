//! Component H: Market Status Service (§4.H).

pub mod schedule;
pub mod service;

pub use schedule::{MinuteOfDay, TradingSchedule};
pub use service::{MarketStatusService, ProviderStatusHint, RecommendationMode};
