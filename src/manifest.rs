//! Durable run state for a harvest.
//!
//! The canonical CSV holds every pub from completed runs; the incremental CSV
//! is an append-only checkpoint written one row at a time while a run is in
//! progress. [`RunManifest`] owns both files together with the in-memory
//! identifier and region sets derived from them, so resuming after a crash is a
//! matter of calling [`RunManifest::open`] again.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use csv::StringRecord;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{AppError, AppResult};
use crate::normalize::{PlaceRecord, COLUMNS};

const PLACE_ID_COLUMN: usize = 0;
const BOROUGH_COLUMN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub canonical: PathBuf,
    pub incremental: PathBuf,
}

impl StorePaths {
    pub fn new(canonical: impl Into<PathBuf>, incremental: impl Into<PathBuf>) -> Self {
        Self {
            canonical: canonical.into(),
            incremental: incremental.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeSummary {
    pub canonical_rows: usize,
    pub merged_rows: usize,
    pub duplicates_dropped: usize,
}

pub struct RunManifest {
    paths: StorePaths,
    canonical_rows: Vec<StringRecord>,
    seen_ids: HashSet<String>,
    seen_regions: HashSet<String>,
    leftover_rows: usize,
    accepted: usize,
    writer: Option<csv::Writer<File>>,
}

impl RunManifest {
    /// Loads run state from whatever the previous run left on disk.
    ///
    /// Regions count as complete only when they appear in the canonical
    /// output. Identifiers from a leftover incremental file are treated as
    /// seen, so re-scanning an interrupted region cannot duplicate them.
    pub fn open(paths: StorePaths) -> AppResult<Self> {
        let canonical_rows = read_store(&paths.canonical, Store::Canonical)?.unwrap_or_default();
        let mut seen_ids = HashSet::with_capacity(canonical_rows.len());
        let mut seen_regions = HashSet::new();
        for row in &canonical_rows {
            seen_ids.insert(field(row, PLACE_ID_COLUMN).to_string());
            seen_regions.insert(field(row, BOROUGH_COLUMN).to_string());
        }

        // A leftover file is rewritten from its complete rows so appends
        // start on a clean record boundary under a valid header.
        let leftover = match read_store(&paths.incremental, Store::Incremental)? {
            Some(rows) => {
                write_store(&paths.incremental, &rows)?;
                rows
            }
            None => Vec::new(),
        };
        if !leftover.is_empty() {
            warn!(
                path = %paths.incremental.display(),
                rows = leftover.len(),
                "resuming with incremental output from an interrupted run"
            );
        }
        for row in &leftover {
            seen_ids.insert(field(row, PLACE_ID_COLUMN).to_string());
        }

        info!(
            canonical = %paths.canonical.display(),
            rows = canonical_rows.len(),
            regions = seen_regions.len(),
            ids = seen_ids.len(),
            "run manifest loaded"
        );

        Ok(Self {
            paths,
            canonical_rows,
            seen_ids,
            seen_regions,
            leftover_rows: leftover.len(),
            accepted: 0,
            writer: None,
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn is_region_complete(&self, name: &str) -> bool {
        self.seen_regions.contains(name)
    }

    pub fn is_identifier_seen(&self, place_id: &str) -> bool {
        self.seen_ids.contains(place_id)
    }

    pub fn completed_regions(&self) -> usize {
        self.seen_regions.len()
    }

    pub fn seen_identifiers(&self) -> usize {
        self.seen_ids.len()
    }

    /// Rows found in the incremental file when the manifest was opened.
    pub fn leftover_rows(&self) -> usize {
        self.leftover_rows
    }

    /// Rows accepted since the manifest was opened.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Marks `record` as seen and checkpoints it to the incremental store.
    ///
    /// Returns `Ok(false)` without writing when the identifier was already
    /// accepted. The row is flushed and synced before this returns.
    pub fn record_accepted(&mut self, record: &PlaceRecord) -> AppResult<bool> {
        if !self.seen_ids.insert(record.place_id.clone()) {
            return Ok(false);
        }
        let writer = self.incremental_writer()?;
        writer.serialize(record)?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        self.accepted += 1;
        debug!(place_id = %record.place_id, borough = %record.borough, "checkpointed place");
        Ok(true)
    }

    /// Appends the incremental rows to the canonical rows, rewrites the
    /// canonical file and removes the incremental file.
    pub fn finalize(mut self) -> AppResult<FinalizeSummary> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let incremental_rows =
            read_store(&self.paths.incremental, Store::Incremental)?.unwrap_or_default();
        let merged_rows = incremental_rows.len();

        let mut ids = HashSet::with_capacity(self.canonical_rows.len() + merged_rows);
        let mut merged = Vec::with_capacity(self.canonical_rows.len() + merged_rows);
        let mut duplicates_dropped = 0;
        for row in self.canonical_rows.into_iter().chain(incremental_rows) {
            if ids.insert(field(&row, PLACE_ID_COLUMN).to_string()) {
                merged.push(row);
            } else {
                duplicates_dropped += 1;
            }
        }
        if duplicates_dropped > 0 {
            warn!(duplicates_dropped, "dropped duplicate place ids while merging");
        }

        write_store(&self.paths.canonical, &merged)?;
        if self.paths.incremental.exists() {
            fs::remove_file(&self.paths.incremental)?;
        }

        info!(
            canonical = %self.paths.canonical.display(),
            rows = merged.len(),
            merged_rows,
            "canonical output rewritten"
        );
        Ok(FinalizeSummary {
            canonical_rows: merged.len(),
            merged_rows,
            duplicates_dropped,
        })
    }

    fn incremental_writer(&mut self) -> AppResult<&mut csv::Writer<File>> {
        if self.writer.is_none() {
            self.writer = Some(open_incremental(&self.paths.incremental)?);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| AppError::Store("incremental writer unavailable".into()))
    }
}

fn open_incremental(path: &Path) -> AppResult<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok(csv::WriterBuilder::new()
        .has_headers(len == 0)
        .from_writer(file))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Store {
    Canonical,
    /// Written row by row, so a crash may leave a torn final row.
    Incremental,
}

/// Reads a store's data rows. `None` when the file does not exist.
///
/// Rows without all columns are skipped. For the incremental store an
/// unterminated final line and unreadable rows are dropped as well.
fn read_store(path: &Path, store: Store) -> AppResult<Option<Vec<StringRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut bytes = fs::read(path)?;
    if store == Store::Incremental {
        let complete = bytes
            .iter()
            .rposition(|byte| *byte == b'\n')
            .map_or(0, |last| last + 1);
        if complete < bytes.len() {
            warn!(
                path = %path.display(),
                bytes = bytes.len() - complete,
                "dropping unterminated trailing row"
            );
            bytes.truncate(complete);
        }
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Some(Vec::new()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers = reader.headers()?.clone();
    if headers.iter().all(str::is_empty) {
        return Ok(Some(Vec::new()));
    }
    if !headers.iter().eq(COLUMNS.iter().copied()) {
        return Err(AppError::Store(format!(
            "{} has columns {:?}, expected {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>(),
            COLUMNS
        )));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) if store == Store::Incremental => {
                warn!(path = %path.display(), row = line + 1, ?err, "skipping unreadable row");
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if record.len() != COLUMNS.len() {
            warn!(
                path = %path.display(),
                row = line + 1,
                fields = record.len(),
                "skipping truncated row"
            );
            continue;
        }
        rows.push(record);
    }
    Ok(Some(rows))
}

/// Replaces `path` with a header plus `rows`, via a staging file and rename.
fn write_store(path: &Path, rows: &[StringRecord]) -> AppResult<()> {
    let staging = staging_path(path);
    {
        let mut writer = csv::Writer::from_path(&staging)?;
        writer.write_record(COLUMNS)?;
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&staging, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "canonical.csv".into());
    name.push(".partial");
    path.with_file_name(name)
}

fn field(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or_default()
}
