//! Component H: Market Status Service (§4.H). Classifies a market's trading
//! session from a configured schedule, optionally merges an upstream provider's
//! own view, and recommends a cache TTL for a given freshness mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use dashmap::DashMap;

use crate::error::{codes, GatewayError, GatewayResult};
use crate::ports::clock::Clock;
use crate::ports::market_status::{Market, MarketState, MarketStatusPort, MarketStatusResult};

use super::schedule::{MinuteOfDay, TradingSchedule};

const RESULT_CACHE_TRADING_TTL_MILLIS: i64 = 60_000;
const RESULT_CACHE_OTHER_TTL_MILLIS: i64 = 600_000;

/// Disagreement between the locally-computed state and a provider hint lowers
/// `confidence` to this value; the provider's state wins either way (§4.H step 3).
const DISAGREEMENT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendationMode {
    Realtime,
    Analytical,
}

/// An optional upstream source of the provider's own view of a market's state.
/// Split out so `MarketStatusService` does not require one to function; when
/// absent, classification is purely schedule-driven.
#[async_trait]
pub trait ProviderStatusHint: Send + Sync {
    async fn hint(&self, market: Market) -> Option<MarketState>;
}

struct CachedResult {
    inserted_at_millis: i64,
    result: MarketStatusResult,
}

pub struct MarketStatusService {
    schedules: HashMap<Market, TradingSchedule>,
    clock: Arc<dyn Clock>,
    provider_hint: Option<Arc<dyn ProviderStatusHint>>,
    result_cache: DashMap<Market, CachedResult>,
}

impl MarketStatusService {
    pub fn new(
        schedules: HashMap<Market, TradingSchedule>,
        clock: Arc<dyn Clock>,
        provider_hint: Option<Arc<dyn ProviderStatusHint>>,
    ) -> Self {
        Self { schedules, clock, provider_hint, result_cache: DashMap::new() }
    }

    /// The default schedule set for the markets named in the symbol regex gates
    /// (§6): HK, US, SH/SZ (one mainland China schedule, as both exchanges share
    /// trading hours), SG.
    pub fn with_default_schedules(clock: Arc<dyn Clock>, provider_hint: Option<Arc<dyn ProviderStatusHint>>) -> Self {
        let mut schedules = HashMap::new();
        schedules.insert(Market::HK, TradingSchedule::hong_kong());
        schedules.insert(Market::US, TradingSchedule::us_equities());
        schedules.insert(Market::SH, TradingSchedule::china_mainland());
        schedules.insert(Market::SZ, TradingSchedule::china_mainland());
        schedules.insert(Market::SG, TradingSchedule::singapore());
        Self::new(schedules, clock, provider_hint)
    }

    /// Recommended cache TTL for a mode/state pair, per the static table §4.H
    /// describes ("for a given mode and resulting state, a TTL from a static
    /// table").
    pub fn recommended_ttl(mode: RecommendationMode, state: MarketState) -> Duration {
        use MarketState::*;
        match (mode, state) {
            (RecommendationMode::Realtime, Trading) => Duration::from_secs(2),
            (RecommendationMode::Realtime, PreMarket | AfterHours | LunchBreak) => Duration::from_secs(10),
            (RecommendationMode::Realtime, Closed | Weekend | Holiday) => Duration::from_secs(300),
            (RecommendationMode::Analytical, Trading) => Duration::from_secs(60),
            (RecommendationMode::Analytical, PreMarket | AfterHours | LunchBreak) => Duration::from_secs(300),
            (RecommendationMode::Analytical, Closed | Weekend | Holiday) => Duration::from_secs(3600),
        }
    }

    fn classify(&self, market: Market, now_millis: i64) -> GatewayResult<MarketState> {
        let schedule = self.schedules.get(&market).ok_or_else(|| {
            GatewayError::new(
                codes::SMART_CACHE_BUSINESS_MARKET_NOT_CONFIGURED,
                format!("no trading schedule configured for market {market}"),
            )
        })?;

        let utc = Utc.timestamp_millis_opt(now_millis).single().unwrap_or_else(Utc::now);
        let local = utc.with_timezone(&schedule.timezone);

        if !schedule.trading_days.contains(&local.weekday()) {
            return Ok(MarketState::Weekend);
        }

        let minute = local.hour() * 60 + local.minute();
        Ok(classify_minute(schedule, minute))
    }

    async fn merge_with_provider(&self, market: Market, local_state: MarketState) -> (MarketState, f64) {
        let Some(hint) = &self.provider_hint else {
            return (local_state, 1.0);
        };
        match hint.hint(market).await {
            Some(provider_state) if provider_state != local_state => (provider_state, DISAGREEMENT_CONFIDENCE),
            Some(provider_state) => (provider_state, 1.0),
            None => (local_state, 1.0),
        }
    }

    fn result_cache_ttl_millis(state: MarketState) -> i64 {
        if state == MarketState::Trading {
            RESULT_CACHE_TRADING_TTL_MILLIS
        } else {
            RESULT_CACHE_OTHER_TTL_MILLIS
        }
    }
}

fn in_session(minute: u32, window: (MinuteOfDay, MinuteOfDay)) -> bool {
    minute >= window.0 .0 && minute < window.1 .0
}

fn classify_minute(schedule: &TradingSchedule, minute: u32) -> MarketState {
    if let Some(window) = schedule.pre_market {
        if in_session(minute, window) {
            return MarketState::PreMarket;
        }
    }
    if in_session(minute, schedule.morning_session) {
        return MarketState::Trading;
    }
    if let Some(window) = schedule.lunch_break {
        if in_session(minute, window) {
            return MarketState::LunchBreak;
        }
    }
    if let Some(window) = schedule.afternoon_session {
        if in_session(minute, window) {
            return MarketState::Trading;
        }
    }
    if let Some(window) = schedule.after_hours {
        if in_session(minute, window) {
            return MarketState::AfterHours;
        }
    }
    MarketState::Closed
}

#[async_trait]
impl MarketStatusPort for MarketStatusService {
    async fn status(&self, market: Market) -> GatewayResult<MarketStatusResult> {
        let now_millis = self.clock.now_millis();

        if let Some(cached) = self.result_cache.get(&market) {
            if now_millis - cached.inserted_at_millis < Self::result_cache_ttl_millis(cached.result.state) {
                return Ok(cached.result);
            }
        }

        let local_state = self.classify(market, now_millis)?;
        let (state, confidence) = self.merge_with_provider(market, local_state).await;
        let result = MarketStatusResult { market, state, confidence };

        self.result_cache.insert(market, CachedResult { inserted_at_millis: now_millis, result });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::clock::FixedClock;

    fn millis_at(year: i32, month: u32, day: u32, hour: u32, minute: u32, tz: chrono_tz::Tz) -> i64 {
        tz.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap().with_timezone(&Utc).timestamp_millis()
    }

    #[tokio::test]
    async fn classifies_morning_session_as_trading() {
        let clock = Arc::new(FixedClock::new(millis_at(2026, 1, 5, 10, 0, chrono_tz::Asia::Hong_Kong)));
        let service = MarketStatusService::with_default_schedules(clock, None);
        let result = service.status(Market::HK).await.unwrap();
        assert_eq!(result.state, MarketState::Trading);
        assert_eq!(result.confidence, 1.0);
    }

    #[tokio::test]
    async fn classifies_lunch_break() {
        let clock = Arc::new(FixedClock::new(millis_at(2026, 1, 5, 12, 30, chrono_tz::Asia::Hong_Kong)));
        let service = MarketStatusService::with_default_schedules(clock, None);
        let result = service.status(Market::HK).await.unwrap();
        assert_eq!(result.state, MarketState::LunchBreak);
    }

    #[tokio::test]
    async fn classifies_weekend() {
        // 2026-01-03 is a Saturday.
        let clock = Arc::new(FixedClock::new(millis_at(2026, 1, 3, 10, 0, chrono_tz::Asia::Hong_Kong)));
        let service = MarketStatusService::with_default_schedules(clock, None);
        let result = service.status(Market::HK).await.unwrap();
        assert_eq!(result.state, MarketState::Weekend);
    }

    #[tokio::test]
    async fn us_equities_has_no_lunch_break() {
        let clock = Arc::new(FixedClock::new(millis_at(2026, 1, 5, 12, 0, chrono_tz::America::New_York)));
        let service = MarketStatusService::with_default_schedules(clock, None);
        let result = service.status(Market::US).await.unwrap();
        assert_eq!(result.state, MarketState::Trading);
    }

    struct AlwaysClosedHint;
    #[async_trait]
    impl ProviderStatusHint for AlwaysClosedHint {
        async fn hint(&self, _market: Market) -> Option<MarketState> {
            Some(MarketState::Closed)
        }
    }

    #[tokio::test]
    async fn provider_disagreement_wins_but_lowers_confidence() {
        let clock = Arc::new(FixedClock::new(millis_at(2026, 1, 5, 10, 0, chrono_tz::Asia::Hong_Kong)));
        let service = MarketStatusService::with_default_schedules(clock, Some(Arc::new(AlwaysClosedHint)));
        let result = service.status(Market::HK).await.unwrap();
        assert_eq!(result.state, MarketState::Closed);
        assert_eq!(result.confidence, DISAGREEMENT_CONFIDENCE);
    }

    #[tokio::test]
    async fn unconfigured_market_is_a_business_error() {
        let clock = Arc::new(FixedClock::new(0));
        let service = MarketStatusService::new(HashMap::new(), clock, None);
        let err = service.status(Market::HK).await.unwrap_err();
        assert_eq!(err.code, codes::SMART_CACHE_BUSINESS_MARKET_NOT_CONFIGURED);
    }

    #[test]
    fn recommended_ttl_table_matches_mode_and_state() {
        assert_eq!(MarketStatusService::recommended_ttl(RecommendationMode::Realtime, MarketState::Trading), Duration::from_secs(2));
        assert_eq!(
            MarketStatusService::recommended_ttl(RecommendationMode::Analytical, MarketState::Closed),
            Duration::from_secs(3600)
        );
    }
}
