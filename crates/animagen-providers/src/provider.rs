//! The generation provider contract and the shared completion driver.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{GenerationOutput, GenerationRequest, PollConfig, ProviderHandle, ProviderStatus};

/// Capability contract every generation vendor (LLM, image, video) satisfies.
///
/// Implementations are polled, never interrupted; the queue enforces the
/// overall attempt timeout around `generate`.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Short provider name for logs ("mock", "jiekouai", ...).
    fn name(&self) -> &str;

    /// Submit a generation and return a pollable handle.
    async fn submit(&self, request: GenerationRequest) -> ProviderResult<ProviderHandle>;

    /// Check the status of a previously submitted generation.
    async fn poll(&self, handle: &ProviderHandle) -> ProviderResult<ProviderStatus>;
}

/// Drive a submitted generation to completion.
///
/// This is the single poll loop used for every stage kind, replacing
/// per-provider ad hoc while/sleep loops. Transport errors during polling
/// propagate to the caller (the queue), which classifies and retries the
/// whole attempt.
pub async fn await_completion(
    provider: &dyn GenerationProvider,
    handle: &ProviderHandle,
    poll: &PollConfig,
) -> ProviderResult<GenerationOutput> {
    tokio::time::sleep(poll.initial_delay).await;
    loop {
        match provider.poll(handle).await? {
            ProviderStatus::Completed { output } => return Ok(output),
            ProviderStatus::Failed { error } => {
                return Err(ProviderError::Reported(error));
            }
            status => {
                debug!(
                    provider = provider.name(),
                    handle = %handle.id,
                    ?status,
                    "generation still in progress"
                );
            }
        }
        tokio::time::sleep(poll.interval).await;
    }
}

/// Submit and wait for the result in one call.
pub async fn generate(
    provider: &dyn GenerationProvider,
    request: GenerationRequest,
    poll: &PollConfig,
) -> ProviderResult<GenerationOutput> {
    let handle = provider.submit(request).await?;
    debug!(provider = provider.name(), handle = %handle.id, "generation submitted");
    await_completion(provider, &handle, poll).await
}
