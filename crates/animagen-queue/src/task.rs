//! Task submission types and snapshots.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;

use animagen_models::{ResourceClass, TaskError, TaskId, TaskPriority, TaskState};

/// One attempt of a task's work.
pub type TaskFuture<O> = BoxFuture<'static, Result<O, TaskError>>;

/// Re-invocable async operation; called once per attempt so retries re-run
/// the work from the start.
pub type TaskOperation<O> = Box<dyn FnMut() -> TaskFuture<O> + Send>;

/// Options for one submission. Unset fields fall back to queue defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmitOptions {
    pub priority: TaskPriority,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Point-in-time view of a task. Returned by `status`, never a live handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub class: ResourceClass,
    pub priority: TaskPriority,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<TaskError>,
}

impl TaskSnapshot {
    pub(crate) fn new(
        task_id: TaskId,
        class: ResourceClass,
        priority: TaskPriority,
        max_attempts: u32,
    ) -> Self {
        Self {
            task_id,
            class,
            priority,
            state: TaskState::Pending,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }
}
