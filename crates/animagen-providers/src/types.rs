//! Uniform request and status types across providers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use animagen_models::{ResourceClass, TaskError, VideoDuration, VideoResolution};

/// Provider-agnostic generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub class: ResourceClass,
    pub prompt: String,
    /// First-frame image for image-to-video generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    /// Character/scene reference images.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<VideoDuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<VideoResolution>,
    #[serde(default)]
    pub watermark: bool,
}

impl GenerationRequest {
    pub fn llm(prompt: impl Into<String>) -> Self {
        Self {
            class: ResourceClass::Llm,
            prompt: prompt.into(),
            image_path: None,
            reference_paths: Vec::new(),
            duration: None,
            resolution: None,
            watermark: false,
        }
    }

    pub fn image(prompt: impl Into<String>) -> Self {
        Self {
            class: ResourceClass::Image,
            ..Self::llm(prompt)
        }
    }

    pub fn video(prompt: impl Into<String>, first_frame: impl Into<String>) -> Self {
        Self {
            class: ResourceClass::Video,
            image_path: Some(first_frame.into()),
            ..Self::llm(prompt)
        }
    }

    pub fn with_references(mut self, refs: Vec<String>) -> Self {
        self.reference_paths = refs;
        self
    }

    pub fn with_duration(mut self, duration: VideoDuration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn with_resolution(mut self, resolution: VideoResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_watermark(mut self, watermark: bool) -> Self {
        self.watermark = watermark;
        self
    }
}

/// Opaque handle for a submitted generation, used for polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderHandle {
    pub id: String,
}

impl ProviderHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Completed generation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// URL or local path of the produced artifact (image/video file, or the
    /// raw text for LLM calls).
    pub artifact: String,
}

/// Provider-reported status of a submitted generation.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderStatus {
    Submitted,
    Processing { progress: u8 },
    Completed { output: GenerationOutput },
    Failed { error: TaskError },
}

/// Pacing for the completion poll driver.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Delay between status checks.
    pub interval: Duration,
    /// Delay before the first check; submissions rarely finish instantly.
    pub initial_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl PollConfig {
    pub fn fast() -> Self {
        Self {
            interval: Duration::from_millis(50),
            initial_delay: Duration::ZERO,
        }
    }
}
