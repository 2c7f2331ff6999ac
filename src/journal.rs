use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AppConfig;
use crate::density::DensityTier;
use crate::errors::AppResult;
use crate::manifest::FinalizeSummary;

const JOURNAL_FILE: &str = "harvest-journal.jsonl";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    RunStarted {
        regions: usize,
        completed_regions: usize,
        seen_ids: usize,
        leftover_rows: usize,
    },
    RegionSkipped {
        region: String,
    },
    RegionStarted {
        region: String,
        tier: DensityTier,
        spacing: f64,
        radius: u32,
        points: usize,
    },
    PointInterrupted {
        region: String,
        lat: f64,
        lng: f64,
        salvaged: usize,
        reason: String,
    },
    RegionCompleted {
        region: String,
        points: usize,
        accepted: usize,
        interrupted_points: usize,
    },
    RunFinalized {
        canonical_rows: usize,
        merged_rows: usize,
        duplicates_dropped: usize,
    },
}

impl From<&FinalizeSummary> for JournalEvent {
    fn from(summary: &FinalizeSummary) -> Self {
        JournalEvent::RunFinalized {
            canonical_rows: summary.canonical_rows,
            merged_rows: summary.merged_rows,
            duplicates_dropped: summary.duplicates_dropped,
        }
    }
}

#[derive(Debug, Serialize)]
struct JournalEntry {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    event: JournalEvent,
}

/// Buffered JSON-lines log of run events, written beside the canonical output.
#[derive(Clone)]
pub struct RunJournal {
    enabled: bool,
    queue: Arc<Mutex<Vec<JournalEntry>>>,
    path: PathBuf,
    batch_size: usize,
    max_file_bytes: u64,
    max_file_count: usize,
}

impl RunJournal {
    pub fn new<P: AsRef<Path>>(dir: P, config: &AppConfig) -> AppResult<Self> {
        let dir = dir.as_ref();
        let path = dir.join(JOURNAL_FILE);
        if config.journal_enabled {
            fs::create_dir_all(dir)?;
            OpenOptions::new().create(true).append(true).open(&path)?;
        }
        Ok(Self {
            enabled: config.journal_enabled,
            queue: Arc::new(Mutex::new(Vec::new())),
            path,
            batch_size: config.journal_batch_size.max(1),
            max_file_bytes: config.journal_max_bytes,
            max_file_count: config.journal_max_files.max(1),
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            queue: Arc::new(Mutex::new(Vec::new())),
            path: PathBuf::from(JOURNAL_FILE),
            batch_size: 1,
            max_file_bytes: 0,
            max_file_count: 1,
        }
    }

    pub fn record(&self, event: JournalEvent) -> AppResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut queue = self.queue.lock();
        queue.push(JournalEntry {
            timestamp: Utc::now(),
            event,
        });
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_locked(&self, queue: &mut Vec<JournalEntry>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::with_capacity(queue.len());
        let mut incoming = 0_u64;
        for entry in queue.iter() {
            let line = serde_json::to_vec(entry)?;
            incoming += (line.len() + 1) as u64;
            lines.push(line);
        }

        self.rotate_if_needed(incoming)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in &lines {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }

    fn rotate_if_needed(&self, incoming: u64) -> AppResult<()> {
        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current == 0 || current + incoming <= self.max_file_bytes {
            return Ok(());
        }

        if self.max_file_count > 1 {
            let rotated = self.path.with_file_name(format!(
                "{}-{}.jsonl",
                self.stem(),
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            fs::rename(&self.path, rotated)?;
            self.prune_rotations()?;
        }
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }

    fn prune_rotations(&self) -> AppResult<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = format!("{}-", self.stem());
        let mut rotations = fs::read_dir(parent)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let name = entry.file_name().to_string_lossy().to_string();
                (name.starts_with(&prefix) && name.ends_with(".jsonl")).then(|| entry.path())
            })
            .collect::<Vec<_>>();

        // Rotation names embed a sortable timestamp.
        rotations.sort();
        let allowed = self.max_file_count.saturating_sub(1);
        let excess = rotations.len().saturating_sub(allowed);
        for path in rotations.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "harvest-journal".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config() -> AppConfig {
        AppConfig {
            journal_enabled: true,
            journal_batch_size: 2,
            journal_max_bytes: 1024,
            journal_max_files: 3,
            ..AppConfig::default()
        }
    }

    fn skipped(region: &str) -> JournalEvent {
        JournalEvent::RegionSkipped {
            region: region.to_string(),
        }
    }

    #[test]
    fn writes_tagged_events_to_disk() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path(), &test_config()).unwrap();
        journal
            .record(JournalEvent::RegionStarted {
                region: "Camden".into(),
                tier: DensityTier::High,
                spacing: 300.0,
                radius: 400,
                points: 12,
            })
            .unwrap();
        assert_eq!(journal.queue_depth(), 1);
        journal.flush().unwrap();
        assert_eq!(journal.queue_depth(), 0);

        let buffer = fs::read_to_string(journal.path()).unwrap();
        let line: serde_json::Value = serde_json::from_str(buffer.trim()).unwrap();
        assert_eq!(line["event"], "region_started");
        assert_eq!(line["tier"], "high");
        assert_eq!(line["points"], 12);
        assert!(line["timestamp"].is_string());
    }

    #[test]
    fn flushes_automatically_at_batch_size() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path(), &test_config()).unwrap();
        journal.record(skipped("Camden")).unwrap();
        journal.record(skipped("Hackney")).unwrap();
        assert_eq!(journal.queue_depth(), 0);
        let buffer = fs::read_to_string(journal.path()).unwrap();
        assert_eq!(buffer.lines().count(), 2);
    }

    #[test]
    fn keeps_history_across_instances() {
        let dir = tempdir().unwrap();
        {
            let journal = RunJournal::new(dir.path(), &test_config()).unwrap();
            journal.record(skipped("first")).unwrap();
            journal.flush().unwrap();
        }
        let journal = RunJournal::new(dir.path(), &test_config()).unwrap();
        journal.record(skipped("second")).unwrap();
        journal.flush().unwrap();

        let buffer = fs::read_to_string(journal.path()).unwrap();
        assert!(buffer.contains("first"));
        assert!(buffer.contains("second"));
    }

    #[test]
    fn rotates_when_exceeding_capacity() {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            journal_max_bytes: 64,
            journal_batch_size: 1,
            ..test_config()
        };
        let journal = RunJournal::new(dir.path(), &config).unwrap();
        for i in 0..4 {
            journal
                .record(skipped(&format!("a region with a fairly long name {i}")))
                .unwrap();
        }
        let rotated = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("harvest-journal-"))
            .count();
        assert!(rotated >= 1);
        assert!(rotated <= 2);
    }

    #[test]
    fn disabled_journal_writes_nothing() {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            journal_enabled: false,
            ..test_config()
        };
        let journal = RunJournal::new(dir.path(), &config).unwrap();
        journal.record(skipped("Camden")).unwrap();
        journal.flush().unwrap();
        assert_eq!(journal.queue_depth(), 0);
        assert!(!journal.path().exists());
    }
}
