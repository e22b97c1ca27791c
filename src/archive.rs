//! Monthly archive files (`<geo_id>/YYYY-MM.json`, schema version 2).
//!
//! Merging is key-wise on local day: a freshly fetched day replaces the stored
//! day wholesale, days only present on disk are kept. Re-running a merge with
//! the same input yields the same archive.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::days::DayBuckets;
use crate::normalize::NormalizationMeta;

pub const ARCHIVE_SCHEMA_VERSION: u64 = 2;
pub const PVPC_INDICATOR_ID: u32 = 1001;
pub const CANONICAL_UNIT: &str = "EUR/kWh";
pub const EPOCH_UNIT: &str = "s";
pub const INDEX_FILE_NAME: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthArchive {
    pub schema_version: u64,
    pub geo_id: u32,
    pub timezone: String,
    pub indicator: u32,
    pub unit: String,
    pub epoch_unit: String,
    pub from: String,
    pub to: String,
    pub days: DayBuckets,
    pub meta: NormalizationMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoredArchive {
    Current(MonthArchive),
    UnsupportedSchema { found: Option<u64> },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("existing file is not schema_version={expected}: {path} (found {found:?})")]
    SchemaVersion {
        path: PathBuf,
        expected: u64,
        found: Option<u64>,
    },
    #[error("incompatible {field} in {path}: old={old} new={new}")]
    Incompatible {
        path: PathBuf,
        field: &'static str,
        old: String,
        new: String,
    },
}

pub fn month_file_name(year: i32, month: u32) -> String {
    format!("{year:04}-{month:02}.json")
}

pub fn geo_dir(out_root: &Path, geo_id: u32) -> PathBuf {
    out_root.join(geo_id.to_string())
}

pub fn read_archive(path: &Path) -> Result<StoredArchive, ArchiveError> {
    let raw = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&raw).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let found = value.get("schema_version").and_then(Value::as_u64);
    if found != Some(ARCHIVE_SCHEMA_VERSION) {
        return Ok(StoredArchive::UnsupportedSchema { found });
    }

    let archive = serde_json::from_value(value).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(StoredArchive::Current(archive))
}

/// Merges `new` into whatever archive already lives at `path`.
///
/// Returns `new` untouched when nothing is stored yet. Fails on a schema
/// version other than 2 or on any identity field mismatch.
pub fn merge_month_file(path: &Path, new: MonthArchive) -> Result<MonthArchive, ArchiveError> {
    if !path.exists() {
        debug!(
            component = "archive",
            event = "archive.merge.new_file",
            path = %path.display()
        );
        return Ok(new);
    }

    let old = match read_archive(path)? {
        StoredArchive::Current(old) => old,
        StoredArchive::UnsupportedSchema { found } => {
            return Err(ArchiveError::SchemaVersion {
                path: path.to_path_buf(),
                expected: ARCHIVE_SCHEMA_VERSION,
                found,
            })
        }
    };

    merge_archives(old, new).map_err(|mismatch| ArchiveError::Incompatible {
        path: path.to_path_buf(),
        field: mismatch.field,
        old: mismatch.old,
        new: mismatch.new,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

pub fn merge_archives(old: MonthArchive, new: MonthArchive) -> Result<MonthArchive, FieldMismatch> {
    ensure_compatible(&old, &new)?;

    let mut merged = new;
    let mut days = old.days;
    days.append(&mut merged.days);

    if let (Some(first), Some(last)) = (days.keys().next(), days.keys().next_back()) {
        merged.from = first.clone();
        merged.to = last.clone();
    }
    merged.days = days;

    Ok(merged)
}

fn ensure_compatible(old: &MonthArchive, new: &MonthArchive) -> Result<(), FieldMismatch> {
    let pairs = [
        ("geo_id", old.geo_id.to_string(), new.geo_id.to_string()),
        ("timezone", old.timezone.clone(), new.timezone.clone()),
        ("indicator", old.indicator.to_string(), new.indicator.to_string()),
        ("unit", old.unit.clone(), new.unit.clone()),
        ("epoch_unit", old.epoch_unit.clone(), new.epoch_unit.clone()),
    ];

    for (field, old, new) in pairs {
        if old != new {
            return Err(FieldMismatch { field, old, new });
        }
    }
    Ok(())
}

pub fn write_archive(path: &Path, archive: &MonthArchive) -> Result<(), ArchiveError> {
    write_json_atomic(path, archive)?;
    info!(
        component = "archive",
        event = "archive.write",
        path = %path.display(),
        days = archive.days.len(),
        from = %archive.from,
        to = %archive.to
    );
    Ok(())
}

/// Compact JSON plus trailing newline, written through `<name>.tmp` and renamed.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), ArchiveError> {
    let mut bytes = serde_json::to_vec(value).map_err(|source| ArchiveError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    bytes.push(b'\n');

    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| INDEX_FILE_NAME.to_string());
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&bytes).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
    }

    fs::rename(&tmp_path, path).map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::days::EpochPrice;
    use tempfile::tempdir;

    fn meta() -> NormalizationMeta {
        NormalizationMeta {
            unit_from_api: Value::from("EUR/MWh"),
            unit_suggests_mwh: true,
            heuristic_applied: false,
            max_after_conversion: 0.2,
        }
    }

    fn day(epoch_base: i64, value: f64) -> Vec<EpochPrice> {
        (0..24)
            .map(|h| EpochPrice {
                epoch_s: epoch_base + h * 3_600,
                value,
            })
            .collect()
    }

    fn archive(days: &[(&str, Vec<EpochPrice>)]) -> MonthArchive {
        let mut buckets = DayBuckets::new();
        for (key, series) in days {
            buckets.insert(key.to_string(), series.clone());
        }
        MonthArchive {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            geo_id: 8741,
            timezone: "Europe/Madrid".to_string(),
            indicator: PVPC_INDICATOR_ID,
            unit: CANONICAL_UNIT.to_string(),
            epoch_unit: EPOCH_UNIT.to_string(),
            from: days.first().map(|(k, _)| k.to_string()).unwrap_or_default(),
            to: days.last().map(|(k, _)| k.to_string()).unwrap_or_default(),
            days: buckets,
            meta: meta(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn month_file_name_is_zero_padded() {
        assert_eq!(month_file_name(2025, 1), "2025-01.json");
        assert_eq!(month_file_name(2025, 12), "2025-12.json");
    }

    #[test]
    fn merge_replaces_days_wholesale_and_recomputes_bounds() {
        let old = archive(&[("2025-06-01", day(1_748_728_800, 0.1))]);
        let new = archive(&[
            ("2025-06-01", day(1_748_728_800, 0.2)),
            ("2025-06-02", day(1_748_815_200, 0.3)),
        ]);

        let merged = merge_archives(old, new.clone()).unwrap();

        assert_eq!(merged.days.len(), 2);
        assert_eq!(merged.days["2025-06-01"], new.days["2025-06-01"]);
        assert_eq!(merged.days["2025-06-02"], new.days["2025-06-02"]);
        assert_eq!(merged.from, "2025-06-01");
        assert_eq!(merged.to, "2025-06-02");
    }

    #[test]
    fn merge_keeps_days_only_present_on_disk() {
        let old = archive(&[
            ("2025-06-01", day(1_748_728_800, 0.1)),
            ("2025-06-03", day(1_748_901_600, 0.4)),
        ]);
        let mut new = archive(&[("2025-06-02", day(1_748_815_200, 0.3))]);
        new.from = "2025-06-02".to_string();
        new.to = "2025-06-02".to_string();

        let merged = merge_archives(old.clone(), new).unwrap();

        assert_eq!(merged.days["2025-06-01"], old.days["2025-06-01"]);
        assert_eq!(merged.days["2025-06-03"], old.days["2025-06-03"]);
        assert_eq!(merged.from, "2025-06-01");
        assert_eq!(merged.to, "2025-06-03");
    }

    #[test]
    fn merge_is_idempotent() {
        let old = archive(&[("2025-06-01", day(1_748_728_800, 0.1))]);
        let new = archive(&[("2025-06-02", day(1_748_815_200, 0.3))]);

        let once = merge_archives(old, new.clone()).unwrap();
        let twice = merge_archives(once.clone(), new).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn identity_field_mismatch_is_rejected() {
        let old = archive(&[("2025-06-01", day(1_748_728_800, 0.1))]);
        let mut new = old.clone();
        new.timezone = "Atlantic/Canary".to_string();

        let err = merge_archives(old, new).unwrap_err();
        assert_eq!(err.field, "timezone");
        assert_eq!(err.old, "Europe/Madrid");
        assert_eq!(err.new, "Atlantic/Canary");
    }

    #[test]
    fn merge_file_without_prior_archive_returns_new_verbatim() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("2025-06.json");
        let new = archive(&[("2025-06-02", day(1_748_815_200, 0.3))]);

        let merged = merge_month_file(&path, new.clone()).unwrap();
        assert_eq!(merged, new);
    }

    #[test]
    fn merge_file_rejects_other_schema_versions() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("2025-06.json");
        fs::write(&path, r#"{"schema_version":1,"days":{}}"#).unwrap();

        let err = merge_month_file(&path, archive(&[])).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::SchemaVersion {
                found: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn merge_file_rejects_mismatched_geo() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("2025-06.json");
        let mut stored = archive(&[("2025-06-01", day(1_748_728_800, 0.1))]);
        stored.geo_id = 8743;
        write_archive(&path, &stored).unwrap();

        let err = merge_month_file(&path, archive(&[])).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::Incompatible {
                field: "geo_id",
                ..
            }
        ));
    }

    #[test]
    fn written_archive_reads_back_and_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("8741").join("2025-06.json");
        let mut stored = archive(&[("2025-06-01", day(1_748_728_800, 0.1))]);
        stored.warnings = vec!["2025-06-01: unexpected hours=3".to_string()];

        write_archive(&path, &stored).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.ends_with("}\n"));
        assert!(raw.contains("\"days\":{\"2025-06-01\":[[1748728800,0.1],"));
        assert!(!temp.path().join("8741").join("2025-06.json.tmp").exists());
        assert_eq!(read_archive(&path).unwrap(), StoredArchive::Current(stored));
    }

    #[test]
    fn archive_with_raw_magnitude_list_meta_still_merges() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("2025-06.json");
        fs::write(
            &path,
            concat!(
                "{\"schema_version\":2,\"geo_id\":8741,\"timezone\":\"Europe/Madrid\",",
                "\"indicator\":1001,\"unit\":\"EUR/kWh\",\"epoch_unit\":\"s\",",
                "\"from\":\"2025-06-01\",\"to\":\"2025-06-01\",",
                "\"days\":{\"2025-06-01\":[[1748728800,0.1],[1748732400,0.12]]},",
                "\"meta\":{\"unit_from_api\":[{\"name\":\"Precio\",\"id\":23}],",
                "\"unit_suggests_mwh\":false,\"heuristic_applied\":true,",
                "\"max_after_conversion\":0.12},",
                "\"warnings\":[\"2025-06-01: unexpected hours=2\"]}\n"
            ),
        )
        .unwrap();

        let StoredArchive::Current(stored) = read_archive(&path).unwrap() else {
            panic!("schema 2 archive should be current");
        };
        assert!(stored.meta.unit_from_api.is_array());
        assert_eq!(stored.days["2025-06-01"][1].epoch_s, 1_748_732_400);

        let new = archive(&[("2025-06-02", day(1_748_815_200, 0.3))]);
        let merged = merge_month_file(&path, new).unwrap();
        assert_eq!(merged.days.len(), 2);
        assert_eq!(merged.days["2025-06-01"], stored.days["2025-06-01"]);
        assert_eq!(merged.from, "2025-06-01");
        assert_eq!(merged.to, "2025-06-02");
        assert_eq!(merged.meta, meta());
    }

    #[test]
    fn meta_without_optional_fields_defaults() {
        let parsed: NormalizationMeta =
            serde_json::from_str(r#"{"unit_from_api":"EUR/MWh"}"#).unwrap();
        assert_eq!(parsed.unit_from_api, Value::from("EUR/MWh"));
        assert!(!parsed.heuristic_applied);
        assert_eq!(parsed.max_after_conversion, 0.0);
    }

    #[test]
    fn warnings_field_is_omitted_when_empty() {
        let json = serde_json::to_string(&archive(&[])).unwrap();
        assert!(!json.contains("warnings"));
    }
}
