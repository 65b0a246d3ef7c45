//! In-memory async task queue for the Animagen pipeline.
//!
//! This crate provides:
//! - `TaskQueue`: bounded-concurrency execution of async work per resource
//!   class, with priority-then-FIFO dispatch
//! - `RetryPolicy`: the pure retry/backoff decision function
//! - `TaskQueues`: one queue per resource class, built from config
//!
//! Every submitted task ends in exactly one terminal state; nothing is
//! silently dropped. Pending/running collections are owned by a single
//! dispatch loop per class, so no fine-grained locking is needed.

pub mod config;
pub mod error;
pub mod queue;
pub mod registry;
pub mod retry;
pub mod task;

pub use config::{ConcurrencyConfig, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use queue::{QueueStats, TaskQueue};
pub use registry::TaskQueues;
pub use retry::{Decision, RetryPolicy};
pub use task::{SubmitOptions, TaskFuture, TaskOperation, TaskSnapshot};
