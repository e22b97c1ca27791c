//! Unit-scale correction for indicator readings.
//!
//! Stage 1 divides by 1000 when the reported unit label mentions MWh.
//! Stage 2 divides the whole batch by 1000 once more when the largest corrected
//! value is still above `HEURISTIC_MAX_THRESHOLD`. Both stages apply to every
//! point of the batch, never to single points.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Largest plausible price in EUR/kWh.
pub const HEURISTIC_MAX_THRESHOLD: f64 = 10.0;

const MWH_TO_KWH_DIVISOR: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub instant: DateTime<Utc>,
    pub value: f64,
}

/// How a batch was rescaled. `unit_from_api` holds the unit exactly as the
/// API reported it, which is not always a string (ESIOS `magnitud` is a list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationMeta {
    pub unit_from_api: Value,
    pub unit_suggests_mwh: bool,
    pub heuristic_applied: bool,
    pub max_after_conversion: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    pub points: Vec<PricePoint>,
    pub meta: NormalizationMeta,
}

pub fn unit_suggests_mwh(unit_label: &str) -> bool {
    unit_label.to_lowercase().contains("mwh")
}

pub fn normalize_prices(unit_label: &str, readings: Vec<PricePoint>) -> NormalizedBatch {
    let suggests_mwh = unit_suggests_mwh(unit_label);
    let mut points = readings;

    if suggests_mwh {
        scale_batch(&mut points);
    }

    let mut max_value = batch_max(&points);
    let heuristic_applied = max_value > HEURISTIC_MAX_THRESHOLD;
    if heuristic_applied {
        scale_batch(&mut points);
        let corrected_max = batch_max(&points);
        warn!(
            component = "normalize",
            event = "normalize.heuristic_applied",
            unit = unit_label,
            max_before = max_value,
            max_after = corrected_max,
            points = points.len()
        );
        max_value = corrected_max;
    }

    NormalizedBatch {
        points,
        meta: NormalizationMeta {
            unit_from_api: Value::from(unit_label),
            unit_suggests_mwh: suggests_mwh,
            heuristic_applied,
            max_after_conversion: max_value,
        },
    }
}

fn scale_batch(points: &mut [PricePoint]) {
    for point in points {
        point.value /= MWH_TO_KWH_DIVISOR;
    }
}

fn batch_max(points: &[PricePoint]) -> f64 {
    points
        .iter()
        .map(|point| point.value)
        .reduce(f64::max)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn batch(values: &[f64]) -> Vec<PricePoint> {
        let base = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).single().unwrap();
        values
            .iter()
            .enumerate()
            .map(|(idx, value)| PricePoint {
                instant: base + chrono::Duration::hours(idx as i64),
                value: *value,
            })
            .collect()
    }

    #[test]
    fn unit_label_match_is_case_insensitive_substring() {
        assert!(unit_suggests_mwh("EUR/MWh"));
        assert!(unit_suggests_mwh("€/mwh"));
        assert!(unit_suggests_mwh("precio MWH"));
        assert!(!unit_suggests_mwh("EUR/kWh"));
        assert!(!unit_suggests_mwh(""));
    }

    #[test]
    fn mwh_label_divides_by_thousand() {
        let out = normalize_prices("EUR/MWh", batch(&[150.0]));

        assert_eq!(out.points[0].value, 0.15);
        assert!(out.meta.unit_suggests_mwh);
        assert!(!out.meta.heuristic_applied);
        assert_eq!(out.meta.max_after_conversion, 0.15);
        assert_eq!(out.meta.unit_from_api, "EUR/MWh");
    }

    #[test]
    fn implausible_max_without_label_triggers_heuristic_for_whole_batch() {
        let out = normalize_prices("€", batch(&[1234.0, 5.0, 80.0]));

        assert!(!out.meta.unit_suggests_mwh);
        assert!(out.meta.heuristic_applied);
        assert_eq!(out.meta.max_after_conversion, 1.234);
        let values: Vec<f64> = out.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.234, 0.005, 0.08]);
    }

    #[test]
    fn label_and_heuristic_can_both_fire() {
        let out = normalize_prices("EUR/MWh", batch(&[150_000.0]));

        assert!(out.meta.unit_suggests_mwh);
        assert!(out.meta.heuristic_applied);
        assert_eq!(out.meta.max_after_conversion, 0.15);
    }

    #[test]
    fn plausible_kwh_values_are_untouched() {
        let out = normalize_prices("EUR/kWh", batch(&[0.1, 0.25, 10.0]));

        assert!(!out.meta.heuristic_applied);
        assert_eq!(out.meta.max_after_conversion, 10.0);
        assert_eq!(out.points[1].value, 0.25);
    }

    #[test]
    fn empty_batch_reports_zero_max() {
        let out = normalize_prices("EUR/MWh", Vec::new());

        assert!(out.points.is_empty());
        assert!(!out.meta.heuristic_applied);
        assert_eq!(out.meta.max_after_conversion, 0.0);
    }

    #[test]
    fn normalization_is_deterministic() {
        let a = normalize_prices("EUR/MWh", batch(&[12_000.0, 45.5, -3.0]));
        let b = normalize_prices("EUR/MWh", batch(&[12_000.0, 45.5, -3.0]));
        assert_eq!(a, b);
    }
}
