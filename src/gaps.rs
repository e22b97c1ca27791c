//! Gap detection over the current and previous month archives of one geo,
//! and the fetch range derived from it.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{Datelike, Days, Months, NaiveDate};
use tracing::{info, warn};

use crate::archive::{month_file_name, read_archive, StoredArchive};
use crate::days::day_key;
use crate::time_window::{days_in_month, first_of_month};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub missing: BTreeSet<NaiveDate>,
}

/// Missing local days in the previous and current month archives.
///
/// A month whose archive file does not exist is skipped entirely; an archive
/// that cannot be read is logged and skipped as well.
pub fn detect_missing_days(geo_dir: &Path, today: NaiveDate) -> BTreeSet<NaiveDate> {
    let current = first_of_month(today);
    let previous = current
        .checked_sub_months(Months::new(1))
        .unwrap_or(current);

    let mut missing = BTreeSet::new();
    for month_start in [previous, current] {
        let file_name = month_file_name(month_start.year(), month_start.month());
        let path = geo_dir.join(&file_name);
        if !path.exists() {
            continue;
        }

        let present = match read_archive(&path) {
            Ok(StoredArchive::Current(archive)) => archive.days,
            Ok(StoredArchive::UnsupportedSchema { found }) => {
                warn!(
                    component = "gaps",
                    event = "gaps.archive_skipped",
                    path = %path.display(),
                    schema_version = ?found
                );
                continue;
            }
            Err(err) => {
                warn!(
                    component = "gaps",
                    event = "gaps.archive_unreadable",
                    path = %path.display(),
                    error = %err
                );
                continue;
            }
        };

        let mut last_day = days_in_month(month_start.year(), month_start.month());
        if month_start == current {
            last_day = last_day.min(today.day());
        }

        for day in 1..=last_day {
            let Some(date) = month_start.with_day(day) else {
                continue;
            };
            if !present.contains_key(&day_key(date)) {
                missing.insert(date);
            }
        }
    }

    missing
}

/// `[earliest missing day, tomorrow]`, or `[tomorrow, tomorrow]` with no gaps.
pub fn plan_fetch_range(geo_dir: &Path, today: NaiveDate) -> FetchPlan {
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    let missing = detect_missing_days(geo_dir, today);

    match missing.first().copied() {
        Some(start) => {
            info!(
                component = "gaps",
                event = "gaps.detected",
                geo_dir = %geo_dir.display(),
                missing_days = missing.len(),
                start = %start,
                end = %tomorrow
            );
            FetchPlan {
                start,
                end: tomorrow,
                missing,
            }
        }
        None => {
            info!(
                component = "gaps",
                event = "gaps.none",
                geo_dir = %geo_dir.display(),
                tomorrow = %tomorrow
            );
            FetchPlan {
                start: tomorrow,
                end: tomorrow,
                missing,
            }
        }
    }
}
