use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::utils::{age_display, remove_if_exists, write_atomic};

/// Subdirectory of the data directory holding cached reports
const REPORTS_DIR: &str = "reports";

/// Extension of a cached report file
const REPORT_EXT: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReport {
    pub exam_id: String,
    pub html_content: String,
    pub cached_at_ms: i64,
    pub expires_at_ms: i64,
}

impl CachedReport {
    /// A report cached at `cached_at_ms` that lives for `ttl`.
    pub fn new(exam_id: &str, html_content: &str, cached_at_ms: i64, ttl: Duration) -> Self {
        Self {
            exam_id: exam_id.to_string(),
            html_content: html_content.to_string(),
            cached_at_ms,
            expires_at_ms: cached_at_ms + ttl.num_milliseconds().max(1),
        }
    }

    /// Fresh means `now <= expires_at`.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }

    pub fn age(&self, now_ms: i64) -> Duration {
        Duration::milliseconds(now_ms - self.cached_at_ms)
    }

    pub fn age_display(&self, now_ms: i64) -> String {
        age_display(self.age(now_ms))
    }
}

/// Persistence for cached reports, keyed by exam id.
///
/// `put` replaces the whole entry in one step; concurrent puts for the same
/// id resolve last-write-wins.
pub trait ReportStore: Send + Sync {
    fn get(&self, exam_id: &str) -> Result<Option<CachedReport>>;

    fn put(&self, report: &CachedReport) -> Result<()>;

    /// Returns whether an entry existed.
    fn remove(&self, exam_id: &str) -> Result<bool>;

    /// Delete every entry with `expires_at_ms <= now_ms`. Returns how many went.
    fn remove_expired(&self, now_ms: i64) -> Result<usize>;

    /// Delete everything. Returns how many entries went.
    fn clear(&self) -> Result<usize>;
}

/// Report store backed by `<data_dir>/reports/<escaped exam id>.json`.
pub struct FileReportStore {
    dir: PathBuf,
}

impl FileReportStore {
    pub fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join(REPORTS_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create report cache: {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Map an arbitrary exam id to a unique, filesystem-safe file name.
    /// `[a-z0-9_-]` pass through; every other byte, uppercase letters
    /// included, becomes `%XX`, so ids differing only in case stay distinct
    /// on case-insensitive filesystems.
    fn file_name(exam_id: &str) -> String {
        let mut name = String::with_capacity(exam_id.len() + REPORT_EXT.len() + 1);
        for byte in exam_id.bytes() {
            if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'_' || byte == b'-' {
                name.push(byte as char);
            } else {
                name.push_str(&format!("%{:02X}", byte));
            }
        }
        name.push('.');
        name.push_str(REPORT_EXT);
        name
    }

    fn report_path(&self, exam_id: &str) -> PathBuf {
        self.dir.join(Self::file_name(exam_id))
    }

    fn read(path: &Path) -> Result<Option<CachedReport>> {
        let contents = match std::fs::read(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read cached report: {}", path.display()))
            }
        };
        let report = serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse cached report: {}", path.display()))?;
        Ok(Some(report))
    }

    /// Paths of every cached report file (temp files excluded).
    fn report_files(&self) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list report cache: {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_report = path.extension().and_then(|e| e.to_str()) == Some(REPORT_EXT)
                && !path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with('.'))
                    .unwrap_or(true);
            if is_report {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl ReportStore for FileReportStore {
    fn get(&self, exam_id: &str) -> Result<Option<CachedReport>> {
        match Self::read(&self.report_path(exam_id))? {
            Some(report) if report.exam_id != exam_id => {
                // The file belongs to another id that maps to the same path
                debug!(exam_id, stored = %report.exam_id, "Cached report is for a different exam");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    fn put(&self, report: &CachedReport) -> Result<()> {
        let contents = serde_json::to_vec(report)?;
        write_atomic(&self.report_path(&report.exam_id), &contents)
            .with_context(|| format!("Failed to cache report for {}", report.exam_id))
    }

    fn remove(&self, exam_id: &str) -> Result<bool> {
        remove_if_exists(&self.report_path(exam_id))
    }

    fn remove_expired(&self, now_ms: i64) -> Result<usize> {
        let mut removed = 0;
        for path in self.report_files()? {
            match Self::read(&path) {
                Ok(Some(report)) if report.expires_at_ms <= now_ms => {
                    if remove_if_exists(&path)? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Leave it for clear(); a sweep should not fail on one bad file
                    warn!(path = %path.display(), error = %e, "Skipping unreadable cached report");
                }
            }
        }
        debug!(removed, "Swept expired reports");
        Ok(removed)
    }

    fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.report_files()? {
            if remove_if_exists(&path)? {
                removed += 1;
            }
        }
        debug!(removed, "Cleared report cache");
        Ok(removed)
    }
}
