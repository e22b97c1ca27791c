//! Local-calendar-day <-> UTC request window translation.
//!
//! - Every geo has exactly one IANA timezone, looked up through an explicit
//!   `GeoTimezones` mapping (no process-wide defaults).
//! - A local day range maps to `[00:00:00 of first day, 23:59:59 of last day]`
//!   local time, converted to UTC with the zone's DST rules.
//! - Multi-month ranges are split into month-aligned windows, clipped to the
//!   requested range, in chronological order.

use std::collections::BTreeMap;

use chrono::{
    DateTime, Datelike, Duration as ChronoDuration, LocalResult, Months, NaiveDate, NaiveDateTime,
    NaiveTime, SecondsFormat, TimeZone, Utc,
};
use chrono_tz::Tz;
use thiserror::Error;

use crate::archive::month_file_name;

pub const DEFAULT_GEO_TZ: Tz = chrono_tz::Europe::Madrid;
pub const CANARY_GEO_ID: u32 = 8742;

const GAP_PROBE_STEP_MINUTES: i64 = 15;
const MAX_GAP_PROBES: usize = 4 * 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoTimezones {
    default_tz: Tz,
    overrides: BTreeMap<u32, Tz>,
}

impl Default for GeoTimezones {
    fn default() -> Self {
        Self::new(DEFAULT_GEO_TZ).with_override(CANARY_GEO_ID, chrono_tz::Atlantic::Canary)
    }
}

impl GeoTimezones {
    pub fn new(default_tz: Tz) -> Self {
        Self {
            default_tz,
            overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, geo_id: u32, tz: Tz) -> Self {
        self.overrides.insert(geo_id, tz);
        self
    }

    pub fn tz_for(&self, geo_id: u32) -> Tz {
        self.overrides
            .get(&geo_id)
            .copied()
            .unwrap_or(self.default_tz)
    }
}

/// One month-aligned slice of a local date range; bounds one remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthWindow {
    pub year: i32,
    pub month: u32,
    pub start_local: NaiveDate,
    pub end_local: NaiveDate,
}

impl MonthWindow {
    pub fn archive_file_name(&self) -> String {
        month_file_name(self.year, self.month)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtcWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcWindow {
    pub fn start_iso(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Secs, false)
    }

    pub fn end_iso(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Secs, false)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeWindowError {
    #[error("local time {local} cannot be resolved in {tz}")]
    UnresolvableLocalTime { tz: String, local: NaiveDateTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEdge {
    Start,
    End,
}

pub fn month_windows(start: NaiveDate, end: NaiveDate) -> Vec<MonthWindow> {
    let mut out = Vec::new();
    if end < start {
        return out;
    }

    let mut first = first_of_month(start);
    while first <= end {
        let last = last_of_month(first);
        out.push(MonthWindow {
            year: first.year(),
            month: first.month(),
            start_local: first.max(start),
            end_local: last.min(end),
        });
        first = match last.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    out
}

pub fn utc_window_for_local_days(
    tz: Tz,
    start_day: NaiveDate,
    end_day: NaiveDate,
) -> Result<UtcWindow, TimeWindowError> {
    let start_local = start_day.and_time(NaiveTime::MIN);
    let end_local = end_day.and_time(last_second_of_day());

    let start = resolve_local(tz, start_local, WindowEdge::Start).ok_or_else(|| {
        TimeWindowError::UnresolvableLocalTime {
            tz: tz.name().to_string(),
            local: start_local,
        }
    })?;
    let end = resolve_local(tz, end_local, WindowEdge::End).ok_or_else(|| {
        TimeWindowError::UnresolvableLocalTime {
            tz: tz.name().to_string(),
            local: end_local,
        }
    })?;

    Ok(UtcWindow {
        start: start.with_timezone(&Utc),
        end: end.with_timezone(&Utc),
    })
}

fn last_second_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).expect("23:59:59 is a valid time")
}

pub fn local_day(tz: Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    local_day(tz, now)
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    NaiveDate::from_ymd_opt(year, month, 1)
        .map(|first| last_of_month(first).day())
        .unwrap_or(0)
}

pub(crate) fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).expect("day 1 exists in every month")
}

pub(crate) fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

// Ambiguous wall-clock times take the earliest instant for a start edge and the
// latest for an end edge, so the window always covers the whole local day.
// Times inside a DST gap move toward the inside of the window.
fn resolve_local(tz: Tz, local: NaiveDateTime, edge: WindowEdge) -> Option<DateTime<Tz>> {
    let step = ChronoDuration::minutes(GAP_PROBE_STEP_MINUTES);
    let mut probe = local;

    for _ in 0..MAX_GAP_PROBES {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(dt) => return Some(dt),
            LocalResult::Ambiguous(earliest, latest) => {
                return Some(match edge {
                    WindowEdge::Start => earliest,
                    WindowEdge::End => latest,
                })
            }
            LocalResult::None => {
                probe = match edge {
                    WindowEdge::Start => probe.checked_add_signed(step)?,
                    WindowEdge::End => probe.checked_sub_signed(step)?,
                };
            }
        }
    }

    None
}
