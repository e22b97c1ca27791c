//! Sequential auto-fill run: plan -> fetch -> normalize -> bucket -> merge ->
//! index, one geo at a time, one month at a time.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::archive::{
    geo_dir, merge_month_file, write_archive, ArchiveError, MonthArchive, ARCHIVE_SCHEMA_VERSION,
    CANONICAL_UNIT, EPOCH_UNIT, INDEX_FILE_NAME, PVPC_INDICATOR_ID,
};
use crate::days::{bucket_by_local_day, day_key, validate_days};
use crate::esios::{FetchError, IndicatorRequest, IndicatorSource};
use crate::gaps::plan_fetch_range;
use crate::index::{rebuild_geo_index, write_geo_index, write_root_index, RootIndex};
use crate::normalize::normalize_prices;
use crate::time_window::{
    month_windows, today_in, utc_window_for_local_days, GeoTimezones, MonthWindow,
    TimeWindowError,
};

pub const DEFAULT_GEOS: [u32; 5] = [8741, 8742, 8743, 8744, 8745];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub out_dir: PathBuf,
    pub geos: Vec<u32>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub request_delay: Duration,
    pub timezones: GeoTimezones,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("data/pvpc"),
            geos: DEFAULT_GEOS.to_vec(),
            from: None,
            to: None,
            request_delay: Duration::ZERO,
            timezones: GeoTimezones::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    Explicit,
    GapDetection,
}

impl RangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::GapDetection => "gap_detection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoSyncSummary {
    pub geo_id: u32,
    pub timezone: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub range_source: RangeSource,
    pub months_written: Vec<String>,
    pub days_fetched: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub generated_at_utc: String,
    pub geos: Vec<GeoSyncSummary>,
    pub root_index_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("invalid range for geo {geo_id}: end {end} is before start {start}")]
    InvalidRange {
        geo_id: u32,
        start: NaiveDate,
        end: NaiveDate,
    },
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    TimeWindow(#[from] TimeWindowError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Runs every configured geo in order and writes the root index last.
/// The first failure aborts the run; geos finished before it stay written.
pub fn run_sync(
    cfg: &SyncConfig,
    source: &dyn IndicatorSource,
    now: DateTime<Utc>,
) -> Result<SyncReport, SyncError> {
    create_dir(&cfg.out_dir)?;
    let generated_at_utc = now.to_rfc3339_opts(SecondsFormat::Secs, false);

    info!(
        component = "sync",
        event = "sync.start",
        out_dir = %cfg.out_dir.display(),
        geos = ?cfg.geos,
        from = ?cfg.from,
        to = ?cfg.to,
        request_delay_ms = cfg.request_delay.as_millis() as u64
    );
    if cfg.from.is_none() && cfg.to.is_some() {
        warn!(
            component = "sync",
            event = "sync.to_without_from_ignored",
            to = ?cfg.to
        );
    }

    let mut root = RootIndex::new(generated_at_utc.clone());
    let mut summaries = Vec::with_capacity(cfg.geos.len());

    for &geo_id in &cfg.geos {
        let summary = sync_geo(cfg, source, geo_id, now, &generated_at_utc)?;
        root.push_geo(geo_id, summary.timezone.clone());
        summaries.push(summary);
    }

    write_root_index(&cfg.out_dir, &root)?;
    let root_index_path = cfg.out_dir.join(INDEX_FILE_NAME);
    info!(
        component = "sync",
        event = "sync.finish",
        root_index = %root_index_path.display(),
        geos = summaries.len()
    );

    Ok(SyncReport {
        generated_at_utc,
        geos: summaries,
        root_index_path,
    })
}

pub fn sync_geo(
    cfg: &SyncConfig,
    source: &dyn IndicatorSource,
    geo_id: u32,
    now: DateTime<Utc>,
    generated_at_utc: &str,
) -> Result<GeoSyncSummary, SyncError> {
    let tz = cfg.timezones.tz_for(geo_id);
    let dir = geo_dir(&cfg.out_dir, geo_id);
    create_dir(&dir)?;

    let today = today_in(tz, now);
    let (start, end, range_source) = match cfg.from {
        Some(from) => (from, cfg.to.unwrap_or(today), RangeSource::Explicit),
        None => {
            let plan = plan_fetch_range(&dir, today);
            (plan.start, plan.end, RangeSource::GapDetection)
        }
    };

    info!(
        component = "sync",
        event = "sync.geo.range",
        geo_id,
        timezone = tz.name(),
        start = %start,
        end = %end,
        range_source = range_source.as_str()
    );

    if end < start {
        return Err(SyncError::InvalidRange { geo_id, start, end });
    }

    let mut summary = GeoSyncSummary {
        geo_id,
        timezone: tz.name().to_string(),
        start,
        end,
        range_source,
        months_written: Vec::new(),
        days_fetched: 0,
        warnings: 0,
    };

    for window in month_windows(start, end) {
        let outcome = sync_month(cfg, source, geo_id, &dir, window)?;
        summary.months_written.push(outcome.file_name);
        summary.days_fetched += outcome.days_fetched;
        summary.warnings += outcome.warnings;

        if !cfg.request_delay.is_zero() {
            sleep(cfg.request_delay);
        }
    }

    let index = rebuild_geo_index(&dir, geo_id, tz.name(), generated_at_utc)?;
    write_geo_index(&dir, &index)?;
    info!(
        component = "sync",
        event = "sync.geo.index",
        geo_id,
        files = index.files.len(),
        warnings = index.warnings.len()
    );

    Ok(summary)
}

struct MonthOutcome {
    file_name: String,
    days_fetched: usize,
    warnings: usize,
}

fn sync_month(
    cfg: &SyncConfig,
    source: &dyn IndicatorSource,
    geo_id: u32,
    dir: &Path,
    window: MonthWindow,
) -> Result<MonthOutcome, SyncError> {
    let tz = cfg.timezones.tz_for(geo_id);
    let utc_window = utc_window_for_local_days(tz, window.start_local, window.end_local)?;
    let payload = source.fetch(&IndicatorRequest {
        geo_id,
        window: utc_window,
    })?;

    let fetched_readings = payload.readings.len();
    let batch = normalize_prices(&payload.unit_label, payload.readings);
    let days = bucket_by_local_day(&batch.points, tz, window.start_local, window.end_local);
    let warnings = validate_days(&days);

    let fetched_days = days.len();
    let warning_count = warnings.len();
    let month = MonthArchive {
        schema_version: ARCHIVE_SCHEMA_VERSION,
        geo_id,
        timezone: tz.name().to_string(),
        indicator: PVPC_INDICATOR_ID,
        unit: CANONICAL_UNIT.to_string(),
        epoch_unit: EPOCH_UNIT.to_string(),
        from: day_key(window.start_local),
        to: day_key(window.end_local),
        days,
        meta: batch.meta,
        warnings,
    };

    let file_name = window.archive_file_name();
    let path = dir.join(&file_name);
    let merged = merge_month_file(&path, month)?;
    write_archive(&path, &merged)?;

    info!(
        component = "sync",
        event = "sync.month.written",
        geo_id,
        file = %file_name,
        readings = fetched_readings,
        days_fetched = fetched_days,
        days_total = merged.days.len(),
        warnings = warning_count
    );

    Ok(MonthOutcome {
        file_name,
        days_fetched: fetched_days,
        warnings: warning_count,
    })
}

fn create_dir(path: &Path) -> Result<(), SyncError> {
    fs::create_dir_all(path).map_err(|source| SyncError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}
