//! Window boundaries for windowed commitment evaluation.
//!
//! All arithmetic happens in UTC. Sub-day windows truncate to multiples of
//! their length since the unix epoch, days snap to midnight, weeks to Monday
//! and months to the first (or to the billing anchor's day of month).

use crate::domain::events::BucketUsage;
use crate::error::{BillingError, Result};
use chrono::{
    DateTime, Datelike, Duration, DurationRound, Months, NaiveDate, NaiveTime, Timelike, Utc,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowSize {
    Minute,
    #[serde(rename = "15MIN")]
    FifteenMinutes,
    #[serde(rename = "30MIN")]
    ThirtyMinutes,
    Hour,
    #[serde(rename = "3HOUR")]
    ThreeHours,
    #[serde(rename = "6HOUR")]
    SixHours,
    #[serde(rename = "12HOUR")]
    TwelveHours,
    Day,
    Week,
    Month,
}

impl WindowSize {
    /// Fixed length for sub-day windows; `None` for calendar windows.
    fn fixed_length(&self) -> Option<Duration> {
        match self {
            WindowSize::Minute => Some(Duration::minutes(1)),
            WindowSize::FifteenMinutes => Some(Duration::minutes(15)),
            WindowSize::ThirtyMinutes => Some(Duration::minutes(30)),
            WindowSize::Hour => Some(Duration::hours(1)),
            WindowSize::ThreeHours => Some(Duration::hours(3)),
            WindowSize::SixHours => Some(Duration::hours(6)),
            WindowSize::TwelveHours => Some(Duration::hours(12)),
            WindowSize::Day | WindowSize::Week | WindowSize::Month => None,
        }
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WindowSize::Minute => "MINUTE",
            WindowSize::FifteenMinutes => "15MIN",
            WindowSize::ThirtyMinutes => "30MIN",
            WindowSize::Hour => "HOUR",
            WindowSize::ThreeHours => "3HOUR",
            WindowSize::SixHours => "6HOUR",
            WindowSize::TwelveHours => "12HOUR",
            WindowSize::Day => "DAY",
            WindowSize::Week => "WEEK",
            WindowSize::Month => "MONTH",
        };
        write!(f, "{}", name)
    }
}

fn overflow(t: DateTime<Utc>, size: WindowSize) -> BillingError {
    BillingError::InvalidPeriod {
        message: format!("{} window arithmetic overflowed at {}", size, t),
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Midnight of `day` in the given month, clamped to the month's last day.
fn clamped_month_day(year: i32, month: u32, day: u32) -> Option<DateTime<Utc>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let last_day = first
        .checked_add_months(Months::new(1))?
        .pred_opt()?
        .day();
    NaiveDate::from_ymd_opt(year, month, day.min(last_day)).map(midnight)
}

fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + month as i32 - 1 + delta;
    (index.div_euclid(12), index.rem_euclid(12) as u32 + 1)
}

/// Start of the window containing `t`.
pub fn align_start(
    t: DateTime<Utc>,
    size: WindowSize,
    anchor: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    if let Some(length) = size.fixed_length() {
        return t.duration_trunc(length).map_err(|_| overflow(t, size));
    }

    match size {
        WindowSize::Day => Ok(midnight(t.date_naive())),
        WindowSize::Week => {
            let back = Duration::days(i64::from(t.weekday().num_days_from_monday()));
            t.date_naive()
                .checked_sub_signed(back)
                .map(midnight)
                .ok_or_else(|| overflow(t, size))
        }
        WindowSize::Month => match anchor {
            Some(anchor) => {
                let current = clamped_month_day(t.year(), t.month(), anchor.day())
                    .ok_or_else(|| overflow(t, size))?;
                if current <= t {
                    return Ok(current);
                }
                let (year, month) = shift_month(t.year(), t.month(), -1);
                clamped_month_day(year, month, anchor.day()).ok_or_else(|| overflow(t, size))
            }
            None => NaiveDate::from_ymd_opt(t.year(), t.month(), 1)
                .map(midnight)
                .ok_or_else(|| overflow(t, size)),
        },
        _ => Err(overflow(t, size)),
    }
}

/// Start of the window following the one starting at `start`.
pub fn next_start(
    start: DateTime<Utc>,
    size: WindowSize,
    anchor: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    let step = match size {
        WindowSize::Day => Some(Duration::days(1)),
        WindowSize::Week => Some(Duration::weeks(1)),
        WindowSize::Month => None,
        fixed => fixed.fixed_length(),
    };

    if let Some(step) = step {
        return start
            .checked_add_signed(step)
            .ok_or_else(|| overflow(start, size));
    }

    let (year, month) = shift_month(start.year(), start.month(), 1);
    let day = anchor.map_or(1, |a| a.day());
    // Keep the time of day so an unaligned start still advances by one month
    let next = clamped_month_day(year, month, day).ok_or_else(|| overflow(start, size))?;
    let time_of_day = start.time().num_seconds_from_midnight();
    Ok(next + Duration::seconds(i64::from(time_of_day)) + Duration::nanoseconds(i64::from(start.nanosecond())))
}

/// Every window start whose `[start, next)` interval intersects `[period_start, period_end)`, ascending.
pub fn expected_starts(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    size: WindowSize,
    anchor: Option<DateTime<Utc>>,
) -> Result<Vec<DateTime<Utc>>> {
    if period_end <= period_start {
        return Ok(Vec::new());
    }

    let mut starts = Vec::new();
    let mut current = align_start(period_start, size, anchor)?;
    while current < period_end {
        starts.push(current);
        current = next_start(current, size, anchor)?;
    }
    Ok(starts)
}

fn whole_second(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// Spread sparse per-window usage over every expected window of the period.
/// Missing windows count as zero. Windows are matched on whole seconds.
pub fn fill_bucketed_usage(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    size: WindowSize,
    anchor: Option<DateTime<Utc>>,
    results: &[BucketUsage],
) -> Result<Vec<Decimal>> {
    let starts = expected_starts(period_start, period_end, size, anchor)?;
    if starts.is_empty() {
        return Ok(Vec::new());
    }

    let by_window: HashMap<i64, Decimal> = results
        .iter()
        .map(|usage| (whole_second(usage.window_start), usage.value))
        .collect();

    Ok(starts
        .iter()
        .map(|start| {
            by_window
                .get(&whole_second(*start))
                .copied()
                .unwrap_or(Decimal::ZERO)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_sub_day_alignment_truncates() {
        let t = utc(2024, 5, 10, 13, 47, 29);
        assert_eq!(align_start(t, WindowSize::Minute, None).unwrap(), utc(2024, 5, 10, 13, 47, 0));
        assert_eq!(
            align_start(t, WindowSize::FifteenMinutes, None).unwrap(),
            utc(2024, 5, 10, 13, 45, 0)
        );
        assert_eq!(
            align_start(t, WindowSize::ThirtyMinutes, None).unwrap(),
            utc(2024, 5, 10, 13, 30, 0)
        );
        assert_eq!(align_start(t, WindowSize::Hour, None).unwrap(), utc(2024, 5, 10, 13, 0, 0));
        assert_eq!(
            align_start(t, WindowSize::ThreeHours, None).unwrap(),
            utc(2024, 5, 10, 12, 0, 0)
        );
        assert_eq!(
            align_start(t, WindowSize::SixHours, None).unwrap(),
            utc(2024, 5, 10, 12, 0, 0)
        );
        assert_eq!(
            align_start(t, WindowSize::TwelveHours, None).unwrap(),
            utc(2024, 5, 10, 12, 0, 0)
        );
        assert_eq!(align_start(t, WindowSize::Day, None).unwrap(), utc(2024, 5, 10, 0, 0, 0));
    }

    #[test]
    fn test_week_alignment_snaps_to_monday() {
        // 2024-05-12 is a Sunday
        let sunday = utc(2024, 5, 12, 18, 0, 0);
        assert_eq!(align_start(sunday, WindowSize::Week, None).unwrap(), utc(2024, 5, 6, 0, 0, 0));

        let monday = utc(2024, 5, 13, 0, 0, 0);
        assert_eq!(align_start(monday, WindowSize::Week, None).unwrap(), monday);
    }

    #[test]
    fn test_month_alignment_with_and_without_anchor() {
        let t = utc(2024, 3, 10, 5, 0, 0);
        assert_eq!(align_start(t, WindowSize::Month, None).unwrap(), utc(2024, 3, 1, 0, 0, 0));

        let anchor = Some(utc(2023, 11, 15, 0, 0, 0));
        assert_eq!(align_start(t, WindowSize::Month, anchor).unwrap(), utc(2024, 2, 15, 0, 0, 0));

        let later = utc(2024, 3, 20, 0, 0, 0);
        assert_eq!(
            align_start(later, WindowSize::Month, anchor).unwrap(),
            utc(2024, 3, 15, 0, 0, 0)
        );
    }

    #[test]
    fn test_month_anchor_clamps_to_short_months() {
        let anchor = Some(utc(2024, 1, 31, 0, 0, 0));
        let t = utc(2024, 2, 29, 12, 0, 0);
        let start = align_start(t, WindowSize::Month, anchor).unwrap();
        assert_eq!(start, utc(2024, 2, 29, 0, 0, 0));
        assert_eq!(
            next_start(start, WindowSize::Month, anchor).unwrap(),
            utc(2024, 3, 31, 0, 0, 0)
        );
    }

    #[test]
    fn test_expected_starts_for_three_days() {
        let starts = expected_starts(
            utc(2024, 1, 1, 0, 0, 0),
            utc(2024, 1, 4, 0, 0, 0),
            WindowSize::Day,
            None,
        )
        .unwrap();

        assert_eq!(
            starts,
            vec![
                utc(2024, 1, 1, 0, 0, 0),
                utc(2024, 1, 2, 0, 0, 0),
                utc(2024, 1, 3, 0, 0, 0)
            ]
        );
        for pair in starts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::hours(24));
        }
    }

    #[test]
    fn test_expected_starts_includes_partially_overlapping_window() {
        let starts = expected_starts(
            utc(2024, 1, 1, 10, 30, 0),
            utc(2024, 1, 1, 12, 15, 0),
            WindowSize::Hour,
            None,
        )
        .unwrap();
        assert_eq!(
            starts,
            vec![
                utc(2024, 1, 1, 10, 0, 0),
                utc(2024, 1, 1, 11, 0, 0),
                utc(2024, 1, 1, 12, 0, 0)
            ]
        );
    }

    #[test]
    fn test_expected_starts_empty_for_inverted_range() {
        let t = utc(2024, 1, 1, 0, 0, 0);
        assert!(expected_starts(t, t, WindowSize::Day, None).unwrap().is_empty());
        assert!(expected_starts(t, t - Duration::days(1), WindowSize::Day, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_fill_bucketed_usage_zero_fills_and_ignores_subsecond_jitter() {
        let jittered = utc(2024, 1, 2, 0, 0, 0) + Duration::milliseconds(250);
        let results = vec![
            BucketUsage::new(utc(2024, 1, 1, 0, 0, 0), dec!(5)),
            BucketUsage::new(jittered, dec!(7)),
        ];

        let filled = fill_bucketed_usage(
            utc(2024, 1, 1, 0, 0, 0),
            utc(2024, 1, 4, 0, 0, 0),
            WindowSize::Day,
            None,
            &results,
        )
        .unwrap();

        assert_eq!(filled, vec![dec!(5), dec!(7), dec!(0)]);
    }
}
