//! Staleness guard - flags streaming entries that lag the wall clock
//!
//! Advisory only: a stale entry is still returned to the caller. Trading halts
//! and price-limit locks stop the feed, which is the usual cause.

use chrono::NaiveTime;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::core::{Clock, Freshness, SystemClock, Timestamped};

pub struct StalenessGuard {
    threshold: Duration,
    clock: Arc<dyn Clock>,
    stale_count: AtomicU64,
}

impl StalenessGuard {
    pub fn new(threshold: Duration) -> Self {
        Self::with_clock(threshold, Arc::new(SystemClock))
    }

    pub fn with_clock(threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold,
            clock,
            stale_count: AtomicU64::new(0),
        }
    }

    /// Classify `entry` against the current time of day, warning when stale
    pub fn check<E: Timestamped>(&self, entry: &E) -> Freshness {
        let now = self.clock.time_of_day();
        let event_time = entry.event_time();
        let freshness = classify(event_time, now, self.threshold);

        if freshness == Freshness::Stale {
            self.stale_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                code = %entry.code(),
                event_time = %event_time.format("%H:%M:%S"),
                now = %now.format("%H:%M:%S"),
                "streaming data lags wall clock; trading halt or price limit likely"
            );
        }
        freshness
    }

    /// Number of stale classifications so far
    pub fn stale_count(&self) -> u64 {
        self.stale_count.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

/// Stale iff `now - event_time` is strictly greater than `threshold`.
///
/// Only times of day are compared, at microsecond resolution. A negative gap
/// (entry ahead of the clock, or a wrap past midnight) counts as ordinary.
pub fn classify(event_time: NaiveTime, now: NaiveTime, threshold: Duration) -> Freshness {
    // A time-of-day difference is under one day and always fits
    let elapsed_us = now.signed_duration_since(event_time).num_microseconds().unwrap_or(0);
    let threshold_us = i64::try_from(threshold.as_micros()).unwrap_or(i64::MAX);
    if elapsed_us > threshold_us {
        Freshness::Stale
    } else {
        Freshness::Ordinary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{InstrumentCode, PriceEntry};

    struct FixedClock(NaiveTime);

    impl Clock for FixedClock {
        fn time_of_day(&self) -> NaiveTime {
            self.0
        }
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn entry_at(time: NaiveTime) -> PriceEntry {
        PriceEntry {
            code: InstrumentCode::new("005930"),
            time,
            last: 70_000,
            open: 69_500,
            high: 70_100,
            low: 69_400,
        }
    }

    const TEN_SECS: Duration = Duration::from_secs(10);

    #[test]
    fn test_classify_boundaries() {
        let now = hms(9, 0, 15);
        assert_eq!(classify(hms(9, 0, 15), now, TEN_SECS), Freshness::Ordinary);
        assert_eq!(classify(hms(9, 0, 6), now, TEN_SECS), Freshness::Ordinary);
        // Exactly at the threshold is still ordinary
        assert_eq!(classify(hms(9, 0, 5), now, TEN_SECS), Freshness::Ordinary);
        assert_eq!(classify(hms(9, 0, 4), now, TEN_SECS), Freshness::Stale);
    }

    #[test]
    fn test_future_and_midnight_wrap_are_ordinary() {
        assert_eq!(classify(hms(9, 0, 20), hms(9, 0, 0), TEN_SECS), Freshness::Ordinary);
        assert_eq!(classify(hms(23, 59, 55), hms(0, 0, 30), TEN_SECS), Freshness::Ordinary);
    }

    #[test]
    fn test_sub_millisecond_overrun_is_stale() {
        let now = hms(9, 0, 15);
        let just_over = NaiveTime::from_hms_micro_opt(9, 0, 4, 999_600).unwrap();
        let just_under = NaiveTime::from_hms_micro_opt(9, 0, 5, 400).unwrap();
        assert_eq!(classify(just_over, now, TEN_SECS), Freshness::Stale);
        assert_eq!(classify(just_under, now, TEN_SECS), Freshness::Ordinary);
    }

    #[test]
    fn test_guard_records_stale_reads() {
        let guard = StalenessGuard::with_clock(TEN_SECS, Arc::new(FixedClock(hms(9, 0, 15))));

        assert_eq!(guard.check(&entry_at(hms(9, 0, 0))), Freshness::Stale);
        assert_eq!(guard.check(&entry_at(hms(9, 0, 14))), Freshness::Ordinary);
        assert_eq!(guard.stale_count(), 1);
    }
}
