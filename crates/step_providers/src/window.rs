//! Time windows, calendar-day helpers and bucket arithmetic.
//!
//! Calendar days are local-time days; instants are carried as UTC.

use chrono::{
    DateTime, Datelike, Local, Months, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How far back the pedometer keeps data, in days.
pub const SHORT_RANGE_HORIZON_DAYS: i64 = 7;

/// Half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The whole local calendar day `date`.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: start_of_day(date),
            end: start_of_day(next_day(date)),
        }
    }

    /// From the start of the local day containing `now` up to `now`.
    pub fn today(now: DateTime<Utc>) -> Self {
        Self {
            start: start_of_day(local_date(now)),
            end: now,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Local date of the window start.
    pub fn start_date(&self) -> NaiveDate {
        local_date(self.start)
    }

    /// Local date of the last instant inside the window.
    pub fn last_date(&self) -> NaiveDate {
        if self.is_empty() {
            return self.start_date();
        }
        local_date(self.end - TimeDelta::nanoseconds(1))
    }

    /// Clamp `t` so it does not run past the window end.
    pub fn clamp_end(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        t.min(self.end)
    }
}

/// Local midnight of `date`, as a UTC instant.
///
/// When midnight falls into a DST gap the UTC midnight of the same date is used.
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

pub fn local_date(t: DateTime<Utc>) -> NaiveDate {
    t.with_timezone(&Local).date_naive()
}

pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(NaiveDate::MAX)
}

/// Whole calendar days from `date` up to `today`; negative for future dates.
pub fn days_before(date: NaiveDate, today: NaiveDate) -> i64 {
    today.signed_duration_since(date).num_days()
}

/// Whether `date` is still inside the pedometer's retention horizon.
pub fn within_short_range_horizon(date: NaiveDate, today: NaiveDate) -> bool {
    days_before(date, today) <= SHORT_RANGE_HORIZON_DAYS
}

/// Bucket width for aggregate queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum BucketGranularity {
    Day,
    Week,
    Month,
    Year,
}

impl BucketGranularity {
    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            BucketGranularity::Day => date,
            BucketGranularity::Week => date
                .checked_sub_signed(TimeDelta::days(i64::from(
                    date.weekday().num_days_from_monday(),
                )))
                .unwrap_or(date),
            BucketGranularity::Month => date.with_day(1).unwrap_or(date),
            BucketGranularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// First day of the bucket after the one starting at `start`.
    pub fn next_start(self, start: NaiveDate) -> NaiveDate {
        let next = match self {
            BucketGranularity::Day => start.succ_opt(),
            BucketGranularity::Week => start.checked_add_signed(TimeDelta::days(7)),
            BucketGranularity::Month => start.checked_add_months(Months::new(1)),
            BucketGranularity::Year => start.checked_add_months(Months::new(12)),
        };
        next.unwrap_or(NaiveDate::MAX)
    }

    /// Window covered by the bucket starting at `start`.
    pub fn bucket_window(self, start: NaiveDate) -> TimeWindow {
        TimeWindow::new(start_of_day(start), start_of_day(self.next_start(start)))
    }
}

/// Source of "now". Injected so day arithmetic can be pinned in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        local_date(self.now())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_window_is_half_open() {
        let w = TimeWindow::day(date(2025, 3, 10));
        assert_eq!(w.end - w.start, TimeDelta::days(1));
        assert_eq!(w.start_date(), date(2025, 3, 10));
        assert_eq!(w.last_date(), date(2025, 3, 10));
        assert_eq!(local_date(w.end), date(2025, 3, 11));
    }

    #[test]
    fn today_window_ends_at_now() {
        let now = start_of_day(date(2025, 3, 10)) + TimeDelta::hours(15);
        let w = TimeWindow::today(now);
        assert_eq!(w.end, now);
        assert_eq!(w.start, start_of_day(date(2025, 3, 10)));
    }

    #[test]
    fn horizon_includes_seventh_day_only() {
        let today = date(2025, 3, 10);
        assert!(within_short_range_horizon(date(2025, 3, 3), today));
        assert!(!within_short_range_horizon(date(2025, 3, 2), today));
        assert!(within_short_range_horizon(date(2025, 3, 12), today));
    }

    #[test]
    fn week_buckets_start_on_monday() {
        // 2025-03-13 is a Thursday.
        let start = BucketGranularity::Week.bucket_start(date(2025, 3, 13));
        assert_eq!(start, date(2025, 3, 10));
        assert_eq!(BucketGranularity::Week.next_start(start), date(2025, 3, 17));
    }

    #[test]
    fn bucket_starts_stay_in_range_at_calendar_limits() {
        for g in [
            BucketGranularity::Day,
            BucketGranularity::Week,
            BucketGranularity::Month,
            BucketGranularity::Year,
        ] {
            assert_eq!(g.bucket_start(NaiveDate::MIN), NaiveDate::MIN, "{g:?}");
            assert_eq!(g.next_start(NaiveDate::MAX), NaiveDate::MAX, "{g:?}");
        }
    }

    #[test]
    fn month_and_year_buckets_roll_over() {
        let m = BucketGranularity::Month.bucket_start(date(2024, 12, 31));
        assert_eq!(m, date(2024, 12, 1));
        assert_eq!(BucketGranularity::Month.next_start(m), date(2025, 1, 1));
        let y = BucketGranularity::Year.bucket_start(date(2024, 6, 15));
        assert_eq!(y, date(2024, 1, 1));
        assert_eq!(BucketGranularity::Year.next_start(y), date(2025, 1, 1));
    }
}
