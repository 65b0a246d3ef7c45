//! Pipeline error types.

use thiserror::Error;

use animagen_models::JobId;
use animagen_queue::QueueError;

use crate::store::StoreError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed batch request, reported at `create_job` time, never
    /// discovered mid-pipeline.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// Checkpoint write or read failed. Surfaced loudly; the pipeline never
    /// proceeds past an unpersisted transition.
    #[error("checkpoint store failure: {0}")]
    Persistence(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl PipelineError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        PipelineError::InvalidRequest(message.into())
    }
}
