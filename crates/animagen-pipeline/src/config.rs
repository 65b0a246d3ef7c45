//! Pipeline configuration.
//!
//! Built once at process start and passed into the constructors; nothing
//! reads the environment after startup.

use std::path::PathBuf;
use std::time::Duration;

use animagen_providers::PollConfig;
use animagen_queue::ConcurrencyConfig;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for job checkpoints, one JSON document per job.
    pub checkpoint_dir: PathBuf,
    /// Where downloaded artifacts land. None keeps provider URLs as-is.
    pub artifact_dir: Option<PathBuf>,
    /// Provider status poll pacing.
    pub poll: PollConfig,
    pub concurrency: ConcurrencyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: data_dir().join("batch_jobs"),
            artifact_dir: None,
            poll: PollConfig::default(),
            concurrency: ConcurrencyConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            checkpoint_dir: std::env::var("ANIMAGEN_DATA_DIR")
                .map(|d| PathBuf::from(d).join("batch_jobs"))
                .unwrap_or(defaults.checkpoint_dir),
            artifact_dir: std::env::var("ANIMAGEN_ARTIFACT_DIR").ok().map(PathBuf::from),
            poll: PollConfig {
                interval: Duration::from_secs(env_u64(
                    "ANIMAGEN_POLL_INTERVAL",
                    defaults.poll.interval.as_secs(),
                )),
                ..defaults.poll
            },
            concurrency: ConcurrencyConfig::from_env(),
        }
    }
}

fn data_dir() -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(".animagen"))
        .unwrap_or_else(|_| PathBuf::from(".animagen"))
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
