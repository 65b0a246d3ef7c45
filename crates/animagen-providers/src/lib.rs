//! Generation provider interface for the Animagen pipeline.
//!
//! This crate provides:
//! - The `GenerationProvider` capability contract (submit + poll)
//! - A shared completion-polling driver
//! - A deterministic mock provider for tests and offline runs
//! - A generic HTTP JSON provider
//! - Artifact download and checksum helpers

pub mod artifact;
pub mod error;
pub mod http;
pub mod mock;
pub mod provider;
pub mod types;

pub use error::{ProviderError, ProviderResult};
pub use http::{HttpProvider, HttpProviderConfig};
pub use mock::MockProvider;
pub use provider::{await_completion, generate, GenerationProvider};
pub use types::{GenerationOutput, GenerationRequest, PollConfig, ProviderHandle, ProviderStatus};
