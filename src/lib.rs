//! PVPC hourly price archive.
//!
//! Fetches the ESIOS PVPC indicator per geo and keeps a gap-free local dataset:
//! - local-day <-> UTC window translation (DST-aware, per-geo timezone)
//! - unit-scale normalization with a magnitude heuristic
//! - per-local-day bucketing and validation (23/24/25-hour days)
//! - idempotent merge into monthly JSON archives, plus derived index files
//! - gap detection over the last two months to plan backfill ranges

mod archive;
mod days;
mod esios;
mod gaps;
mod index;
mod normalize;
mod observability;
mod sync;
mod time_window;

pub use archive::{
    geo_dir, merge_archives, merge_month_file, month_file_name, read_archive, write_archive,
    ArchiveError, FieldMismatch, MonthArchive, StoredArchive, ARCHIVE_SCHEMA_VERSION,
    CANONICAL_UNIT, EPOCH_UNIT, INDEX_FILE_NAME, PVPC_INDICATOR_ID,
};
pub use days::{
    bucket_by_local_day, day_key, validate_days, DayBuckets, EpochPrice, EXPECTED_HOURS_PER_DAY,
};
pub use esios::{
    build_request_url, esios_api_key_from_env, parse_indicator_payload, EsiosClient, EsiosConfig,
    FetchError, IndicatorPayload, IndicatorRequest, IndicatorSource, ERROR_BODY_PREVIEW_CHARS,
    ESIOS_INDICATOR_URL,
};
pub use gaps::{detect_missing_days, plan_fetch_range, FetchPlan};
pub use index::{
    is_month_archive_name, rebuild_geo_index, write_geo_index, write_root_index, GeoIndex,
    IndexedArchive, RootIndex, RootIndexEntry,
};
pub use normalize::{
    normalize_prices, unit_suggests_mwh, NormalizationMeta, NormalizedBatch, PricePoint,
    HEURISTIC_MAX_THRESHOLD,
};
pub use observability::{
    init_logging, log_app_failure, log_app_finish, log_app_start, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use sync::{
    run_sync, sync_geo, GeoSyncSummary, RangeSource, SyncConfig, SyncError, SyncReport,
    DEFAULT_GEOS,
};
pub use time_window::{
    days_in_month, local_day, month_windows, today_in, utc_window_for_local_days, GeoTimezones,
    MonthWindow, TimeWindowError, UtcWindow, CANARY_GEO_ID, DEFAULT_GEO_TZ,
};
