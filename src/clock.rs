// =============================================================================
// Clock/Calendar — millisecond-UTC to wall-clock conversion and time windows
// =============================================================================
//
// The engine trades against one fixed zone (America/Los_Angeles). All
// set-membership tests (`excluded_times`, `allowed_trading_hours`) are
// precomputed once at startup as `HashSet<String>` over "HH:MM:SS" strings so
// that per-bar evaluation never recomputes a zone conversion more than once.
// =============================================================================

use std::collections::HashSet;

use chrono::{TimeZone, Timelike};
use chrono_tz::Tz;

/// A half-open-by-convention time-of-day range, "HH:MM:SS" inclusive on both
/// ends, expanded at a given step. A range whose end wraps past midnight
/// (`end < start`) is split into two passes: `start..24:00:00` and
/// `00:00:00..end`.
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: (u32, u32, u32),
    pub end: (u32, u32, u32),
}

impl TimeRange {
    pub const fn new(start: (u32, u32, u32), end: (u32, u32, u32)) -> Self {
        Self { start, end }
    }

    fn to_secs(t: (u32, u32, u32)) -> u32 {
        t.0 * 3600 + t.1 * 60 + t.2
    }

    /// Expand this range into a set of "HH:MM:SS" strings, stepping by
    /// `interval_sec`.
    pub fn expand(&self, interval_sec: u32, out: &mut HashSet<String>) {
        let start = Self::to_secs(self.start);
        let end = Self::to_secs(self.end);

        if start <= end {
            let mut t = start;
            while t <= end {
                out.insert(format_hms(t));
                t += interval_sec;
            }
        } else {
            let mut t = start;
            while t < 24 * 3600 {
                out.insert(format_hms(t));
                t += interval_sec;
            }
            let mut t = 0;
            while t <= end {
                out.insert(format_hms(t));
                t += interval_sec;
            }
        }
    }
}

fn format_hms(total_sec: u32) -> String {
    let h = total_sec / 3600;
    let m = (total_sec % 3600) / 60;
    let s = total_sec % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// Session-boundary windows during which trading is suppressed, at
/// one-second granularity (checked against arbitrary bar-close seconds).
pub fn excluded_time_ranges() -> Vec<TimeRange> {
    vec![
        TimeRange::new((16, 59, 0), (4, 2, 0)), // wraps midnight
        TimeRange::new((5, 59, 0), (6, 2, 0)),
        TimeRange::new((6, 27, 0), (6, 33, 0)),
        TimeRange::new((12, 59, 0), (13, 3, 0)),
    ]
}

/// The window in which a buy intent may be recorded, at sixty-second
/// (per-minute) granularity — distinct from the excluded-time sets above,
/// which use one-second granularity because they gate arbitrary second bars.
pub fn allowed_trading_hours_range() -> TimeRange {
    TimeRange::new((6, 3, 0), (14, 55, 0))
}

/// Precomputed wall-clock windows for one engine instance.
pub struct Clock {
    tz: Tz,
    excluded_times: HashSet<String>,
    allowed_trading_hours: HashSet<String>,
}

impl Clock {
    pub fn new(tz: Tz) -> Self {
        let mut excluded_times = HashSet::new();
        for range in excluded_time_ranges() {
            range.expand(1, &mut excluded_times);
        }

        let mut allowed_trading_hours = HashSet::new();
        allowed_trading_hours_range().expand(60, &mut allowed_trading_hours);

        Self {
            tz,
            excluded_times,
            allowed_trading_hours,
        }
    }

    /// Construct the clock for the fixed zone this engine trades against.
    pub fn los_angeles() -> Self {
        Self::new(chrono_tz::America::Los_Angeles)
    }

    /// Convert an epoch-millisecond timestamp to `(cal_d, cal_t)` in the
    /// configured zone.
    pub fn to_cal(&self, timestamp_ms: i64) -> (String, String) {
        let dt = self.tz.timestamp_millis_opt(timestamp_ms).single().unwrap_or_else(|| {
            // Ambiguous/nonexistent local time (DST fold) — fall back to the
            // earliest valid mapping rather than panicking on bad input.
            self.tz
                .timestamp_millis_opt(timestamp_ms)
                .earliest()
                .unwrap_or_else(|| self.tz.timestamp_opt(0, 0).unwrap())
        });
        (dt.format("%Y-%m-%d").to_string(), dt.format("%H:%M:%S").to_string())
    }

    pub fn cal_t(&self, timestamp_ms: i64) -> String {
        self.to_cal(timestamp_ms).1
    }

    pub fn is_excluded(&self, cal_t: &str) -> bool {
        self.excluded_times.contains(cal_t)
    }

    pub fn is_allowed_trading_hour(&self, cal_t: &str) -> bool {
        self.allowed_trading_hours.contains(cal_t)
    }

    /// Classify a "HH:MM:SS" wall-clock time into a market session, used for
    /// order-type selection (§4.4.3). Returns `None` for a timestamp outside
    /// all three named sessions — an invariant violation the caller must
    /// treat as a class-5 error (abort the action, log loudly).
    pub fn session(&self, cal_t: &str) -> Option<crate::types::MarketSession> {
        use crate::types::MarketSession;

        let secs = parse_hms_secs(cal_t)?;
        let pre = (1 * 3600, 6 * 3600 + 29 * 60 + 59);
        let normal = (6 * 3600 + 30 * 60, 12 * 3600 + 59 * 60 + 59);
        let after = (13 * 3600, 16 * 3600 + 59 * 60 + 59);

        if secs >= pre.0 && secs <= pre.1 {
            Some(MarketSession::PreMarket)
        } else if secs >= normal.0 && secs <= normal.1 {
            Some(MarketSession::Normal)
        } else if secs >= after.0 && secs <= after.1 {
            Some(MarketSession::AfterMarket)
        } else {
            None
        }
    }
}

fn parse_hms_secs(cal_t: &str) -> Option<u32> {
    let mut parts = cal_t.split(':');
    let h: u32 = parts.next()?.parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    Some(h * 3600 + m * 60 + s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_cal_t_allowed() {
        let clock = Clock::los_angeles();
        assert!(clock.is_allowed_trading_hour("06:03:00"));
        assert!(!clock.is_allowed_trading_hour("06:02:59"));
    }

    #[test]
    fn excluded_time_one_second_granularity() {
        let clock = Clock::los_angeles();
        assert!(clock.is_excluded("12:59:30"));
        assert!(clock.is_excluded("12:59:00"));
        assert!(clock.is_excluded("13:03:00"));
        assert!(!clock.is_excluded("13:04:00"));
    }

    #[test]
    fn excluded_time_wraps_midnight() {
        let clock = Clock::los_angeles();
        assert!(clock.is_excluded("23:30:00"));
        assert!(clock.is_excluded("00:00:00"));
        assert!(clock.is_excluded("04:02:00"));
        assert!(!clock.is_excluded("04:03:00"));
        assert!(!clock.is_excluded("16:58:59"));
        assert!(clock.is_excluded("16:59:00"));
    }

    #[test]
    fn session_classification() {
        let clock = Clock::los_angeles();
        assert_eq!(clock.session("01:00:00"), Some(crate::types::MarketSession::PreMarket));
        assert_eq!(clock.session("06:30:00"), Some(crate::types::MarketSession::Normal));
        assert_eq!(clock.session("13:00:00"), Some(crate::types::MarketSession::AfterMarket));
        assert_eq!(clock.session("00:30:00"), None);
    }

    #[test]
    fn to_cal_roundtrips_a_known_instant() {
        let clock = Clock::los_angeles();
        // 2024-01-01T00:00:00Z — well inside PST (UTC-8).
        let (_d, t) = clock.to_cal(1704067200000);
        assert_eq!(t, "16:00:00");
    }
}
