//! Queue configuration.
//!
//! Constructed once at process start and passed into the queue constructors;
//! there is no ambient global configuration.

use std::time::Duration;

use animagen_models::ResourceClass;

use crate::retry::RetryPolicy;

/// Configuration for one resource class queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum concurrent in-flight tasks.
    pub max_workers: usize,
    /// Default attempts per task when the submission does not override.
    pub default_max_attempts: u32,
    /// Default hard timeout per attempt.
    pub default_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            default_max_attempts: 3,
            default_timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

/// Worker counts and retry settings for all resource classes.
#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    pub llm_workers: usize,
    pub image_workers: usize,
    pub video_workers: usize,
    pub max_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            llm_workers: 8,
            image_workers: 4,
            video_workers: 2,
            max_attempts: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl ConcurrencyConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            llm_workers: env_usize("ANIMAGEN_LLM_WORKERS", defaults.llm_workers),
            image_workers: env_usize("ANIMAGEN_IMAGE_WORKERS", defaults.image_workers),
            video_workers: env_usize("ANIMAGEN_VIDEO_WORKERS", defaults.video_workers),
            max_attempts: env_usize("ANIMAGEN_MAX_ATTEMPTS", defaults.max_attempts as usize) as u32,
            retry: RetryPolicy {
                base_delay: Duration::from_secs(env_usize(
                    "ANIMAGEN_RETRY_DELAY",
                    defaults.retry.base_delay.as_secs() as usize,
                ) as u64),
                ..defaults.retry
            },
        }
    }

    /// Per-class queue configuration. Attempt timeouts track how long each
    /// provider kind is allowed to run, polling included.
    pub fn queue_config(&self, class: ResourceClass) -> QueueConfig {
        let (max_workers, default_timeout) = match class {
            ResourceClass::Llm => (self.llm_workers, Duration::from_secs(120)),
            ResourceClass::Image => (self.image_workers, Duration::from_secs(300)),
            ResourceClass::Video => (self.video_workers, Duration::from_secs(1800)),
        };
        QueueConfig {
            max_workers: max_workers.max(1),
            default_max_attempts: self.max_attempts,
            default_timeout,
            retry: self.retry,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
