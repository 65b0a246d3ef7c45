//! Durable job checkpoints.
//!
//! The pipeline saves the full job record before acting on any stage
//! transition, so recovery is a pure function of what is on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use animagen_models::{JobId, JobRecord};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("job record corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistence contract for job records. At-least-once durability of the
/// latest snapshot is all the pipeline requires.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &JobRecord) -> StoreResult<()>;

    async fn load(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// Every stored job, any status.
    async fn load_all(&self) -> StoreResult<Vec<JobRecord>>;

    /// Jobs that have not reached a terminal status, for startup recovery.
    async fn load_all_incomplete(&self) -> StoreResult<Vec<JobRecord>> {
        let mut jobs = self.load_all().await?;
        jobs.retain(|job| !job.is_terminal());
        Ok(jobs)
    }
}

/// One JSON document per job under a directory, written atomically via a
/// temp file and rename.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn save(&self, job: &JobRecord) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.job_path(&job.job_id);
        let tmp = path.with_extension("json.tmp");

        let body = serde_json::to_vec_pretty(job)?;
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(job = %job.job_id, path = %path.display(), "job checkpointed");
        Ok(())
    }

    async fn load(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        let path = self.job_path(job_id);
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_all(&self) -> StoreResult<Vec<JobRecord>> {
        let mut jobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(jobs),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<JobRecord>(&body) {
                Ok(job) => jobs.push(job),
                // One corrupt checkpoint must not block recovery of the rest.
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job record"),
            }
        }
        Ok(jobs)
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of save calls that would be visible after a crash.
    pub fn snapshot(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs
            .lock()
            .expect("store lock poisoned")
            .get(job_id)
            .cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, job: &JobRecord) -> StoreResult<()> {
        self.jobs
            .lock()
            .expect("store lock poisoned")
            .insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn load(&self, job_id: &JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .get(job_id)
            .cloned())
    }

    async fn load_all(&self) -> StoreResult<Vec<JobRecord>> {
        Ok(self
            .jobs
            .lock()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}
