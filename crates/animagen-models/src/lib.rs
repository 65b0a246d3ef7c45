//! Shared data models for the Animagen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Task priorities, states and the error taxonomy
//! - Pipeline stages, payloads and outputs
//! - Batch jobs, items and per-stage progress
//! - Progress event schemas
//! - Provider pricing

pub mod id;
pub mod job;
pub mod pricing;
pub mod progress;
pub mod stage;
pub mod task;

// Re-export common types
pub use id::{JobId, ProjectId, ShotId, TaskId};
pub use job::{
    ItemInput, ItemProgress, ItemRecord, ItemStatus, JobOptions, JobProgress, JobRecord, JobStatus,
    StageProgress, StageStatus, StageView,
};
pub use pricing::{CostEstimate, PricingTable};
pub use progress::ProgressEvent;
pub use stage::{
    GenerationParams, StageKind, StageOutput, StagePayload, StageSpec, VideoDuration,
    VideoResolution,
};
pub use task::{ErrorKind, ResourceClass, TaskError, TaskPriority, TaskState};
