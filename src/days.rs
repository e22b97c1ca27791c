//! Per-local-day bucketing of normalized price points, plus anomaly checks.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::normalize::PricePoint;
use crate::time_window::local_day;

/// Valid hour counts for a local day: DST spring-forward, regular, fall-back.
pub const EXPECTED_HOURS_PER_DAY: [usize; 3] = [23, 24, 25];

/// One stored point. Serialized as the two-element array `[epoch_s, value]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(i64, f64)", into = "(i64, f64)")]
pub struct EpochPrice {
    pub epoch_s: i64,
    pub value: f64,
}

impl From<(i64, f64)> for EpochPrice {
    fn from((epoch_s, value): (i64, f64)) -> Self {
        Self { epoch_s, value }
    }
}

impl From<EpochPrice> for (i64, f64) {
    fn from(point: EpochPrice) -> Self {
        (point.epoch_s, point.value)
    }
}

/// Day buckets keyed by ISO local date (`YYYY-MM-DD`), which sorts chronologically.
pub type DayBuckets = BTreeMap<String, Vec<EpochPrice>>;

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn bucket_by_local_day(
    points: &[PricePoint],
    tz: Tz,
    start_day: NaiveDate,
    end_day: NaiveDate,
) -> DayBuckets {
    let mut days = DayBuckets::new();

    for point in points {
        let day = local_day(tz, point.instant);
        if day < start_day || day > end_day {
            continue;
        }
        days.entry(day_key(day)).or_default().push(EpochPrice {
            epoch_s: point.instant.timestamp(),
            value: point.value,
        });
    }

    for series in days.values_mut() {
        series.sort_by_key(|point| point.epoch_s);
    }

    days
}

/// Annotates anomalous days. Never drops or reorders data.
pub fn validate_days(days: &DayBuckets) -> Vec<String> {
    let mut warnings = Vec::new();

    for (day, series) in days {
        let hours = series.len();
        if !EXPECTED_HOURS_PER_DAY.contains(&hours) {
            warnings.push(format!("{day}: unexpected hours={hours}"));
        }

        if let Some(idx) = first_non_increasing_index(series) {
            warnings.push(format!("{day}: non-monotonic epoch at idx {idx}"));
        }
    }

    for warning in &warnings {
        warn!(
            component = "days",
            event = "days.validation_warning",
            warning = %warning
        );
    }

    warnings
}

fn first_non_increasing_index(series: &[EpochPrice]) -> Option<usize> {
    series
        .windows(2)
        .position(|pair| pair[1].epoch_s <= pair[0].epoch_s)
        .map(|idx| idx + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hourly(start_utc: chrono::DateTime<Utc>, hours: i64) -> Vec<PricePoint> {
        (0..hours)
            .map(|h| PricePoint {
                instant: start_utc + Duration::hours(h),
                value: 0.1 + h as f64 / 100.0,
            })
            .collect()
    }

    fn series(epochs: &[i64]) -> Vec<EpochPrice> {
        epochs
            .iter()
            .map(|epoch_s| EpochPrice {
                epoch_s: *epoch_s,
                value: 0.1,
            })
            .collect()
    }

    #[test]
    fn buckets_use_local_day_and_drop_out_of_range_points() {
        // 2024-12-31T22:00Z .. 2025-01-02T01:00Z covers the tail of Dec 31,
        // all of Jan 1 and the start of Jan 2 in Madrid.
        let start = Utc.with_ymd_and_hms(2024, 12, 31, 22, 0, 0).single().unwrap();
        let points = hourly(start, 28);

        let days = bucket_by_local_day(
            &points,
            chrono_tz::Europe::Madrid,
            date(2025, 1, 1),
            date(2025, 1, 1),
        );

        assert_eq!(days.len(), 1);
        let jan1 = &days["2025-01-01"];
        assert_eq!(jan1.len(), 24);
        assert_eq!(
            jan1[0].epoch_s,
            Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0)
                .single()
                .unwrap()
                .timestamp()
        );
        assert!(validate_days(&days).is_empty());
    }

    #[test]
    fn dst_days_hold_23_and_25_points_without_warnings() {
        let tz = chrono_tz::Europe::Madrid;
        let spring_start = Utc.with_ymd_and_hms(2025, 3, 29, 23, 0, 0).single().unwrap();
        let fall_start = Utc.with_ymd_and_hms(2025, 10, 25, 22, 0, 0).single().unwrap();

        let spring = bucket_by_local_day(
            &hourly(spring_start, 23),
            tz,
            date(2025, 3, 30),
            date(2025, 3, 30),
        );
        let fall = bucket_by_local_day(
            &hourly(fall_start, 25),
            tz,
            date(2025, 10, 26),
            date(2025, 10, 26),
        );

        assert_eq!(spring["2025-03-30"].len(), 23);
        assert_eq!(fall["2025-10-26"].len(), 25);
        assert!(validate_days(&spring).is_empty());
        assert!(validate_days(&fall).is_empty());
    }

    #[test]
    fn bucket_is_sorted_after_assignment() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        let mut points = hourly(start, 5);
        points.reverse();

        let days = bucket_by_local_day(
            &points,
            chrono_tz::Atlantic::Canary,
            date(2025, 6, 1),
            date(2025, 6, 1),
        );

        let epochs: Vec<i64> = days["2025-06-01"].iter().map(|p| p.epoch_s).collect();
        let mut sorted = epochs.clone();
        sorted.sort();
        assert_eq!(epochs, sorted);
    }

    #[test]
    fn unexpected_point_count_is_reported() {
        let mut days = DayBuckets::new();
        days.insert("2025-06-01".to_string(), series(&[1, 2, 3]));

        assert_eq!(
            validate_days(&days),
            vec!["2025-06-01: unexpected hours=3".to_string()]
        );
    }

    #[test]
    fn non_monotonic_epochs_reported_once_at_first_offending_index() {
        let mut epochs: Vec<i64> = (0..24).map(|h| h * 3_600).collect();
        epochs[5] = epochs[4];
        epochs[10] = epochs[9] - 1;
        let mut days = DayBuckets::new();
        days.insert("2025-06-02".to_string(), series(&epochs));

        let warnings = validate_days(&days);
        assert_eq!(
            warnings,
            vec!["2025-06-02: non-monotonic epoch at idx 5".to_string()]
        );
        assert_eq!(days["2025-06-02"].len(), 24);
    }

    #[test]
    fn epoch_price_serializes_as_pair() {
        let point = EpochPrice {
            epoch_s: 1_748_728_800,
            value: 0.125,
        };
        let json = serde_json::to_string(&point).unwrap();
        assert_eq!(json, "[1748728800,0.125]");

        let back: EpochPrice = serde_json::from_str("[1748728800,0]").unwrap();
        assert_eq!(back.value, 0.0);
    }
}
