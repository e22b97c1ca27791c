//! Location and root index files. Both are derived views, rebuilt from scratch.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::{
    read_archive, write_json_atomic, ArchiveError, StoredArchive, ARCHIVE_SCHEMA_VERSION,
    CANONICAL_UNIT, EPOCH_UNIT, INDEX_FILE_NAME, PVPC_INDICATOR_ID,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedArchive {
    pub file: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoIndex {
    pub schema_version: u64,
    pub generated_at_utc: String,
    pub geo_id: u32,
    pub timezone: String,
    pub indicator: u32,
    pub unit: String,
    pub epoch_unit: String,
    pub files: Vec<IndexedArchive>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootIndexEntry {
    pub geo_id: u32,
    pub timezone: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootIndex {
    pub schema_version: u64,
    pub generated_at_utc: String,
    pub indicator: u32,
    pub unit: String,
    pub epoch_unit: String,
    pub geos: Vec<RootIndexEntry>,
}

impl RootIndex {
    pub fn new(generated_at_utc: impl Into<String>) -> Self {
        Self {
            schema_version: ARCHIVE_SCHEMA_VERSION,
            generated_at_utc: generated_at_utc.into(),
            indicator: PVPC_INDICATOR_ID,
            unit: CANONICAL_UNIT.to_string(),
            epoch_unit: EPOCH_UNIT.to_string(),
            geos: Vec::new(),
        }
    }

    pub fn push_geo(&mut self, geo_id: u32, timezone: impl Into<String>) {
        self.geos.push(RootIndexEntry {
            geo_id,
            timezone: timezone.into(),
            path: format!("{geo_id}/{INDEX_FILE_NAME}"),
        });
    }
}

pub fn is_month_archive_name(name: &str) -> bool {
    static MONTH_FILE_RE: OnceLock<Regex> = OnceLock::new();
    MONTH_FILE_RE
        .get_or_init(|| Regex::new(r"^\d{4}-\d{2}\.json$").expect("month file pattern is valid"))
        .is_match(name)
}

/// Scans `geo_dir` for `YYYY-MM.json` archives, in file-name order.
///
/// Archives with another schema version are skipped quietly; unreadable ones
/// become a `"<file> read_error: ..."` warning. Warnings stored inside each
/// archive are carried over, prefixed by the file name.
pub fn rebuild_geo_index(
    geo_dir: &Path,
    geo_id: u32,
    timezone: &str,
    generated_at_utc: &str,
) -> Result<GeoIndex, ArchiveError> {
    let entries = fs::read_dir(geo_dir).map_err(|source| ArchiveError::Io {
        path: geo_dir.to_path_buf(),
        source,
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ArchiveError::Io {
            path: geo_dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if is_month_archive_name(&name) {
            names.push(name);
        }
    }
    names.sort();

    let mut files = Vec::with_capacity(names.len());
    let mut warnings = Vec::new();
    for name in names {
        match read_archive(&geo_dir.join(&name)) {
            Ok(StoredArchive::Current(archive)) => {
                warnings.extend(archive.warnings.iter().map(|w| format!("{name} {w}")));
                files.push(IndexedArchive {
                    file: name,
                    from: archive.from,
                    to: archive.to,
                });
            }
            Ok(StoredArchive::UnsupportedSchema { found }) => {
                debug!(
                    component = "index",
                    event = "index.archive_skipped",
                    file = %name,
                    schema_version = ?found
                );
            }
            Err(err) => {
                warn!(
                    component = "index",
                    event = "index.archive_unreadable",
                    file = %name,
                    error = %err
                );
                warnings.push(format!("{name} read_error: {err}"));
            }
        }
    }

    Ok(GeoIndex {
        schema_version: ARCHIVE_SCHEMA_VERSION,
        generated_at_utc: generated_at_utc.to_string(),
        geo_id,
        timezone: timezone.to_string(),
        indicator: PVPC_INDICATOR_ID,
        unit: CANONICAL_UNIT.to_string(),
        epoch_unit: EPOCH_UNIT.to_string(),
        files,
        warnings,
    })
}

pub fn write_geo_index(geo_dir: &Path, index: &GeoIndex) -> Result<(), ArchiveError> {
    write_json_atomic(&geo_dir.join(INDEX_FILE_NAME), index)
}

pub fn write_root_index(out_root: &Path, index: &RootIndex) -> Result<(), ArchiveError> {
    write_json_atomic(&out_root.join(INDEX_FILE_NAME), index)
}
