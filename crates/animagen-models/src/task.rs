//! Task-level types shared by the queue and the pipeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Named category of work with its own concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Llm,
    Image,
    Video,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] =
        [ResourceClass::Llm, ResourceClass::Image, ResourceClass::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Llm => "llm",
            ResourceClass::Image => "image",
            ResourceClass::Video => "video",
        }
    }
}

impl std::fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("unknown resource class: {0}")]
pub struct ParseResourceClassError(String);

impl std::str::FromStr for ResourceClass {
    type Err = ParseResourceClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "llm" => Ok(ResourceClass::Llm),
            "image" => Ok(ResourceClass::Image),
            "video" => Ok(ResourceClass::Video),
            other => Err(ParseResourceClassError(other.to_string())),
        }
    }
}

/// Dispatch priority. Within one level the queue is FIFO; across levels a
/// steady stream of higher-priority work can delay lower levels indefinitely
/// (no formal starvation bound, same as the source system).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl TaskPriority {
    /// Numeric rank, lower dispatches first.
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

/// Task lifecycle state. Transitions are one-directional except for the
/// failed-attempt re-queue (`Running` back to `Pending`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// Error classification consulted by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network error, timeout, provider 5xx. Retried with backoff.
    Transient,
    /// Bad request, unsupported parameter, provider 4xx. Never retried.
    Permanent,
    /// Provider backpressure. Retried with a longer base delay.
    RateLimited,
    /// A prior stage for the same item failed; remaining stages are skipped.
    DependencyFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::DependencyFailed => "dependency_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure of one task attempt. Recorded verbatim on the task and
/// on the owning item's stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn dependency_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyFailed, message)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Transient | ErrorKind::RateLimited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_rank_orders_dispatch() {
        assert!(TaskPriority::Critical.rank() < TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() < TaskPriority::Normal.rank());
        assert!(TaskPriority::Normal.rank() < TaskPriority::Low.rank());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn retryable_kinds() {
        assert!(TaskError::transient("timeout").is_retryable());
        assert!(TaskError::rate_limited("429").is_retryable());
        assert!(!TaskError::permanent("bad prompt").is_retryable());
        assert!(!TaskError::dependency_failed("keyframe failed").is_retryable());
    }

    #[test]
    fn resource_class_round_trips() {
        for class in ResourceClass::ALL {
            let parsed: ResourceClass = class.as_str().parse().unwrap();
            assert_eq!(parsed, class);
        }
        assert!("gpu".parse::<ResourceClass>().is_err());
    }
}
