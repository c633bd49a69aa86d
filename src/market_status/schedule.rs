//! Per-market trading schedules (§4.H step 1): timezone, trading days, and the
//! minute-of-day session boundaries used to classify `now()`.

use chrono::Weekday;
use chrono_tz::Tz;

/// Minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MinuteOfDay(pub u32);

impl MinuteOfDay {
    pub const fn hm(hour: u32, minute: u32) -> Self {
        Self(hour * 60 + minute)
    }
}

fn weekdays() -> Vec<Weekday> {
    vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]
}

/// A market's trading calendar: which days it trades, and the minute-of-day
/// window for each session. `chrono_tz::Tz` carries DST transitions, so no
/// separate daylight-saving handling is needed here.
#[derive(Debug, Clone)]
pub struct TradingSchedule {
    pub timezone: Tz,
    pub trading_days: Vec<Weekday>,
    pub pre_market: Option<(MinuteOfDay, MinuteOfDay)>,
    pub morning_session: (MinuteOfDay, MinuteOfDay),
    pub lunch_break: Option<(MinuteOfDay, MinuteOfDay)>,
    pub afternoon_session: Option<(MinuteOfDay, MinuteOfDay)>,
    pub after_hours: Option<(MinuteOfDay, MinuteOfDay)>,
}

impl TradingSchedule {
    /// HKEX: pre-open 09:00-09:30, morning 09:30-12:00, lunch 12:00-13:00,
    /// afternoon 13:00-16:00.
    pub fn hong_kong() -> Self {
        Self {
            timezone: chrono_tz::Asia::Hong_Kong,
            trading_days: weekdays(),
            pre_market: Some((MinuteOfDay::hm(9, 0), MinuteOfDay::hm(9, 30))),
            morning_session: (MinuteOfDay::hm(9, 30), MinuteOfDay::hm(12, 0)),
            lunch_break: Some((MinuteOfDay::hm(12, 0), MinuteOfDay::hm(13, 0))),
            afternoon_session: Some((MinuteOfDay::hm(13, 0), MinuteOfDay::hm(16, 0))),
            after_hours: None,
        }
    }

    /// US equities (NYSE/Nasdaq): pre-market 04:00-09:30, regular 09:30-16:00,
    /// after-hours 16:00-20:00. No lunch break.
    pub fn us_equities() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            trading_days: weekdays(),
            pre_market: Some((MinuteOfDay::hm(4, 0), MinuteOfDay::hm(9, 30))),
            morning_session: (MinuteOfDay::hm(9, 30), MinuteOfDay::hm(16, 0)),
            lunch_break: None,
            afternoon_session: None,
            after_hours: Some((MinuteOfDay::hm(16, 0), MinuteOfDay::hm(20, 0))),
        }
    }

    /// Shanghai/Shenzhen: morning 09:30-11:30, lunch, afternoon 13:00-15:00.
    pub fn china_mainland() -> Self {
        Self {
            timezone: chrono_tz::Asia::Shanghai,
            trading_days: weekdays(),
            pre_market: None,
            morning_session: (MinuteOfDay::hm(9, 30), MinuteOfDay::hm(11, 30)),
            lunch_break: Some((MinuteOfDay::hm(11, 30), MinuteOfDay::hm(13, 0))),
            afternoon_session: Some((MinuteOfDay::hm(13, 0), MinuteOfDay::hm(15, 0))),
            after_hours: None,
        }
    }

    /// SGX: morning 09:00-12:00, lunch, afternoon 13:00-17:00.
    pub fn singapore() -> Self {
        Self {
            timezone: chrono_tz::Asia::Singapore,
            trading_days: weekdays(),
            pre_market: None,
            morning_session: (MinuteOfDay::hm(9, 0), MinuteOfDay::hm(12, 0)),
            lunch_break: Some((MinuteOfDay::hm(12, 0), MinuteOfDay::hm(13, 0))),
            afternoon_session: Some((MinuteOfDay::hm(13, 0), MinuteOfDay::hm(17, 0))),
            after_hours: None,
        }
    }
}
