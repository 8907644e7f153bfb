use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{ApiError, ExamUpload};
use crate::clock::Clock;
use crate::utils::{remove_if_exists, write_atomic};

/// Directory (under the data dir) holding queued uploads
const UPLOADS_DIR: &str = "uploads";

/// Job file extension
const JOB_EXT: &str = "json";

/// Attempts per job before a transient failure is treated as permanent.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 5;

/// Wait before the first retry. Doubles with every further attempt.
const INITIAL_RETRY_DELAY_SECS: i64 = 30;

/// Longest wait between two attempts
const MAX_RETRY_DELAY_HOURS: i64 = 5;

/// One attempt at uploading an exam image.
#[async_trait]
pub trait ExamUploader: Send + Sync {
    async fn upload_exam(&self, image: &Path) -> Result<ExamUpload, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UploadState {
    /// Waiting for its next attempt
    Pending,
    Uploaded { exam_id: String },
    /// Given up on; `error` is the failure that decided it
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: String,
    pub image_path: PathBuf,
    pub enqueued_at_ms: i64,
    pub attempts: u32,
    pub next_attempt_at_ms: i64,
    #[serde(default)]
    pub last_error: Option<String>,
    pub state: UploadState,
}

impl UploadJob {
    pub fn is_pending(&self) -> bool {
        self.state == UploadState::Pending
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        self.is_pending() && now_ms >= self.next_attempt_at_ms
    }
}

/// What one pass over the queue did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadRun {
    pub uploaded: usize,
    /// Failed transiently and rescheduled
    pub retrying: usize,
    pub failed: usize,
}

impl UploadRun {
    pub fn attempted(&self) -> usize {
        self.uploaded + self.retrying + self.failed
    }
}

/// Persistent queue of exam uploads.
///
/// Each job lives in `<data_dir>/uploads/<id>.json`. `process_pending`
/// attempts the jobs that are due: network errors, timeouts and 5xx answers
/// reschedule the job with exponential backoff until `MAX_UPLOAD_ATTEMPTS`;
/// any other failure ends it.
pub struct UploadQueue<U> {
    uploader: U,
    dir: PathBuf,
    clock: Arc<dyn Clock>,
    retry_delay: Duration,
}

impl<U: ExamUploader> UploadQueue<U> {
    pub fn new(uploader: U, data_dir: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let dir = data_dir.join(UPLOADS_DIR);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create upload queue: {}", dir.display()))?;
        Ok(Self {
            uploader,
            dir,
            clock,
            retry_delay: Duration::seconds(INITIAL_RETRY_DELAY_SECS),
        })
    }

    /// Override the first retry delay (doubles on each further attempt).
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Queue `image` for upload. The file must exist; its absolute path is recorded.
    pub fn enqueue(&self, image: &Path) -> Result<UploadJob> {
        let image_path = std::fs::canonicalize(image)
            .with_context(|| format!("Cannot find exam image: {}", image.display()))?;
        if !image_path.is_file() {
            anyhow::bail!("Not a file: {}", image_path.display());
        }

        let now = self.clock.now_ms();
        let job = UploadJob {
            id: format!("{:016x}", rand::random::<u64>()),
            image_path,
            enqueued_at_ms: now,
            attempts: 0,
            next_attempt_at_ms: now,
            last_error: None,
            state: UploadState::Pending,
        };
        self.save(&job)?;
        info!(job = %job.id, image = %job.image_path.display(), "Exam queued for upload");
        Ok(job)
    }

    /// Every job, oldest first. Unreadable job files are skipped.
    pub fn jobs(&self) -> Result<Vec<UploadJob>> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list upload queue: {}", self.dir.display()))?;
        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(JOB_EXT) {
                continue;
            }
            match Self::read(&path) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable upload job"),
            }
        }
        jobs.sort_by(|a, b| {
            a.enqueued_at_ms
                .cmp(&b.enqueued_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    pub fn job(&self, id: &str) -> Result<Option<UploadJob>> {
        let Some(path) = self.job_path(id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    /// When the earliest pending job becomes due, if any job is pending.
    pub fn next_due_at(&self) -> Result<Option<i64>> {
        Ok(self
            .jobs()?
            .iter()
            .filter(|j| j.is_pending())
            .map(|j| j.next_attempt_at_ms)
            .min())
    }

    /// Attempt every pending job whose retry time has come, oldest first.
    pub async fn process_pending(&self) -> Result<UploadRun> {
        let now = self.clock.now_ms();
        let mut run = UploadRun::default();
        for job in self.jobs()?.into_iter().filter(|j| j.is_due(now)) {
            let job = self.attempt(job).await?;
            match job.state {
                UploadState::Uploaded { .. } => run.uploaded += 1,
                UploadState::Pending => run.retrying += 1,
                UploadState::Failed { .. } => run.failed += 1,
            }
        }
        if run.attempted() > 0 {
            info!(
                uploaded = run.uploaded,
                retrying = run.retrying,
                failed = run.failed,
                "Processed upload queue"
            );
        }
        Ok(run)
    }

    /// Give a failed job a fresh attempt budget. False if there is no such failed job.
    pub fn retry(&self, id: &str) -> Result<bool> {
        let Some(mut job) = self.job(id)? else {
            return Ok(false);
        };
        if !matches!(job.state, UploadState::Failed { .. }) {
            return Ok(false);
        }
        job.state = UploadState::Pending;
        job.attempts = 0;
        job.next_attempt_at_ms = self.clock.now_ms();
        self.save(&job)?;
        debug!(job = %job.id, "Upload requeued");
        Ok(true)
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        match self.job_path(id) {
            Some(path) => remove_if_exists(&path),
            None => Ok(false),
        }
    }

    /// Drop uploaded and failed jobs. Returns how many went.
    pub fn clear_finished(&self) -> Result<usize> {
        let mut removed = 0;
        for job in self.jobs()?.into_iter().filter(|j| !j.is_pending()) {
            if self.remove(&job.id)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn attempt(&self, mut job: UploadJob) -> Result<UploadJob> {
        job.attempts += 1;
        match self.uploader.upload_exam(&job.image_path).await {
            Ok(upload) => {
                info!(job = %job.id, exam_id = %upload.exam_id, attempt = job.attempts, "Upload succeeded");
                job.last_error = None;
                job.state = UploadState::Uploaded {
                    exam_id: upload.exam_id,
                };
            }
            Err(e) if e.is_retryable() && job.attempts < MAX_UPLOAD_ATTEMPTS => {
                let delay = self.retry_delay_after(job.attempts);
                job.next_attempt_at_ms = self.clock.now_ms() + delay.num_milliseconds();
                warn!(
                    job = %job.id,
                    attempt = job.attempts,
                    retry_in_secs = delay.num_seconds(),
                    error = %e,
                    "Upload failed, will retry"
                );
                job.last_error = Some(e.to_string());
            }
            Err(e) => {
                warn!(job = %job.id, attempt = job.attempts, error = %e, "Upload failed, giving up");
                job.last_error = Some(e.to_string());
                job.state = UploadState::Failed {
                    error: e.to_string(),
                };
            }
        }
        self.save(&job)?;
        Ok(job)
    }

    /// Wait after the `attempts`-th failed attempt.
    fn retry_delay_after(&self, attempts: u32) -> Duration {
        let factor = 1i64 << attempts.saturating_sub(1).min(20);
        let delay_ms = self.retry_delay.num_milliseconds().saturating_mul(factor);
        let cap_ms = Duration::hours(MAX_RETRY_DELAY_HOURS).num_milliseconds();
        Duration::milliseconds(delay_ms.min(cap_ms))
    }

    /// Job ids are 16 hex digits; anything else names no job.
    fn job_path(&self, id: &str) -> Option<PathBuf> {
        let valid = id.len() == 16 && id.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| self.dir.join(format!("{}.{}", id, JOB_EXT)))
    }

    fn read(path: &Path) -> Result<UploadJob> {
        let contents = std::fs::read(path)
            .with_context(|| format!("Failed to read upload job: {}", path.display()))?;
        serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse upload job: {}", path.display()))
    }

    fn save(&self, job: &UploadJob) -> Result<()> {
        let path = self
            .job_path(&job.id)
            .ok_or_else(|| anyhow::anyhow!("Invalid upload job id: {}", job.id))?;
        let contents = serde_json::to_vec_pretty(job)?;
        write_atomic(&path, &contents).with_context(|| format!("Failed to save upload job {}", job.id))
    }
}
