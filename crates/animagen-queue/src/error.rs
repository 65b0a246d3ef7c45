//! Queue error types.

use thiserror::Error;

use animagen_models::{TaskError, TaskId};

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("queue is shutting down")]
    ShuttingDown,

    /// The awaited task reached the failed (or cancelled) terminal state.
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl QueueError {
    /// The task failure, if this error carries one.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            QueueError::Task(err) => Some(err),
            _ => None,
        }
    }
}
