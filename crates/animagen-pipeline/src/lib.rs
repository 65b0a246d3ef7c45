//! Batch pipeline orchestrator for the Animagen backend.
//!
//! This crate provides:
//! - `BatchPipeline`: multi-stage batch jobs over the class queues, with
//!   pause/resume/cancel and per-item dependency chaining
//! - `JobStore` / `FileJobStore`: durable job checkpoints for crash recovery
//! - `StageRunner`: payload construction and provider execution per stage
//! - `ProgressChannel`: in-process progress event broadcast
//! - Cost estimation for prospective batches

pub mod config;
pub mod cost;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod stage;
pub mod store;

pub use config::PipelineConfig;
pub use cost::estimate;
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{BatchPipeline, CreateJobRequest};
pub use progress::ProgressChannel;
pub use stage::{build_payload, StageRunner};
pub use store::{FileJobStore, JobStore, MemoryJobStore, StoreError, StoreResult};
