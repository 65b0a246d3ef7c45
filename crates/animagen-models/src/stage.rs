//! Pipeline stage definitions, payloads and outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::id::ShotId;
use crate::task::{ResourceClass, TaskPriority};

/// One step in an item's required sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// LLM call (prompt refinement, shot design).
    Llm,
    /// First-frame image generation.
    Keyframe,
    /// Image-to-video generation from the keyframe.
    Video,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Llm => "llm",
            StageKind::Keyframe => "keyframe",
            StageKind::Video => "video",
        }
    }

    /// Resource class this stage runs on.
    pub fn resource_class(&self) -> ResourceClass {
        match self {
            StageKind::Llm => ResourceClass::Llm,
            StageKind::Keyframe => ResourceClass::Image,
            StageKind::Video => ResourceClass::Video,
        }
    }

    /// Default wall-clock limit for one attempt, including provider polling.
    pub fn default_timeout_secs(&self) -> u64 {
        match self {
            StageKind::Llm => 120,
            StageKind::Keyframe => 300,
            StageKind::Video => 1800,
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clip length supported by the video providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoDuration {
    #[default]
    #[serde(rename = "4s")]
    Seconds4,
    #[serde(rename = "8s")]
    Seconds8,
    #[serde(rename = "12s")]
    Seconds12,
}

impl VideoDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoDuration::Seconds4 => "4s",
            VideoDuration::Seconds8 => "8s",
            VideoDuration::Seconds12 => "12s",
        }
    }

    pub fn seconds(&self) -> u32 {
        match self {
            VideoDuration::Seconds4 => 4,
            VideoDuration::Seconds8 => 8,
            VideoDuration::Seconds12 => 12,
        }
    }
}

/// Output resolution supported by the video providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum VideoResolution {
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl VideoResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoResolution::P720 => "720p",
            VideoResolution::P1080 => "1080p",
        }
    }
}

/// Generation parameters shared by every item of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GenerationParams {
    pub duration: VideoDuration,
    pub resolution: VideoResolution,
    #[serde(default)]
    pub watermark: bool,
    /// Provider override, e.g. "mock". None selects the configured default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// How one stage of a job is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: StageKind,
    pub class: ResourceClass,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    #[serde(default)]
    pub priority: TaskPriority,
}

impl StageSpec {
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            class: kind.resource_class(),
            max_attempts: 3,
            timeout_secs: kind.default_timeout_secs(),
            priority: TaskPriority::Normal,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Strongly-typed payload for one stage task. Built from the item plus the
/// prior stage's output, never from loose dictionaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StagePayload {
    Llm {
        shot_id: ShotId,
        prompt: String,
    },
    Keyframe {
        shot_id: ShotId,
        prompt: String,
        character_refs: Vec<String>,
        scene_ref: Option<String>,
        resolution: VideoResolution,
    },
    Video {
        shot_id: ShotId,
        prompt: String,
        keyframe_path: String,
        duration: VideoDuration,
        resolution: VideoResolution,
        watermark: bool,
    },
}

impl StagePayload {
    pub fn kind(&self) -> StageKind {
        match self {
            StagePayload::Llm { .. } => StageKind::Llm,
            StagePayload::Keyframe { .. } => StageKind::Keyframe,
            StagePayload::Video { .. } => StageKind::Video,
        }
    }

    pub fn shot_id(&self) -> &ShotId {
        match self {
            StagePayload::Llm { shot_id, .. }
            | StagePayload::Keyframe { shot_id, .. }
            | StagePayload::Video { shot_id, .. } => shot_id,
        }
    }
}

/// Result of a succeeded stage, persisted on the item so the next stage's
/// payload can be rebuilt after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Llm { text: String },
    Keyframe { path: String },
    Video { path: String, provider_task: Option<String> },
}

impl StageOutput {
    pub fn kind(&self) -> StageKind {
        match self {
            StageOutput::Llm { .. } => StageKind::Llm,
            StageOutput::Keyframe { .. } => StageKind::Keyframe,
            StageOutput::Video { .. } => StageKind::Video,
        }
    }

    /// Keyframe path, if this output is a keyframe.
    pub fn keyframe_path(&self) -> Option<&str> {
        match self {
            StageOutput::Keyframe { path } => Some(path),
            _ => None,
        }
    }
}
