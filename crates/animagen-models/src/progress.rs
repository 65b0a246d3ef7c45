//! Progress event types.
//!
//! Emitted by the pipeline on an in-process broadcast channel; the excluded
//! web layer can forward them to operators unchanged.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::id::JobId;
use crate::stage::StageKind;
use crate::task::TaskError;

/// Progress event envelope.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Job accepted and first-stage tasks queued.
    JobStarted {
        job_id: JobId,
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// One item's stage reached a terminal state.
    StageFinished {
        job_id: JobId,
        item_id: String,
        stage: StageKind,
        succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
        timestamp: DateTime<Utc>,
    },

    /// Job-level completion fraction (0-100).
    Progress { job_id: JobId, percent: u8 },

    /// Every item reached a terminal state.
    JobFinished {
        job_id: JobId,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        timestamp: DateTime<Utc>,
    },

    /// Free-form log line for operator consoles.
    Log {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn job_started(job_id: JobId, total: usize) -> Self {
        ProgressEvent::JobStarted {
            job_id,
            total,
            timestamp: Utc::now(),
        }
    }

    pub fn stage_finished(
        job_id: JobId,
        item_id: impl Into<String>,
        stage: StageKind,
        error: Option<TaskError>,
    ) -> Self {
        ProgressEvent::StageFinished {
            job_id,
            item_id: item_id.into(),
            stage,
            succeeded: error.is_none(),
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn progress(job_id: JobId, percent: f32) -> Self {
        ProgressEvent::Progress {
            job_id,
            percent: percent.clamp(0.0, 100.0) as u8,
        }
    }

    pub fn job_finished(job_id: JobId, succeeded: usize, failed: usize, cancelled: usize) -> Self {
        ProgressEvent::JobFinished {
            job_id,
            succeeded,
            failed,
            cancelled,
            timestamp: Utc::now(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ProgressEvent::job_started(JobId::from("batch_abc"), 5);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_started");
        assert_eq!(json["total"], 5);
    }

    #[test]
    fn stage_failure_carries_error() {
        let event = ProgressEvent::stage_finished(
            JobId::from("batch_abc"),
            "batch_abc_item_001",
            StageKind::Keyframe,
            Some(TaskError::transient("provider 503")),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["succeeded"], false);
        assert_eq!(json["error"]["kind"], "transient");
    }

    #[test]
    fn percent_is_clamped() {
        let event = ProgressEvent::progress(JobId::from("batch_abc"), 140.0);
        match event {
            ProgressEvent::Progress { percent, .. } => assert_eq!(percent, 100),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
