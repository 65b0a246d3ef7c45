//! Batch job, item and per-stage progress records.
//!
//! These are the durable records the pipeline checkpoints on every
//! transition. Job status is always computed from item state, never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{JobId, ProjectId, ShotId, TaskId};
use crate::stage::{GenerationParams, StageKind, StageOutput, StageSpec};
use crate::task::TaskError;

/// Per-stage status of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotStarted,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded | StageStatus::Failed | StageStatus::Cancelled
        )
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, StageStatus::Queued | StageStatus::Running)
    }
}

/// Progress of one stage of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageProgress {
    pub status: StageStatus,
    pub attempts: u32,
    /// Queue task id while in flight. Not meaningful across restarts; the
    /// pipeline re-issues tasks from persisted stage state on recovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<StageOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Overall status of one item, derived from its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

/// Creative inputs for one shot, supplied at job creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemInput {
    pub shot_id: ShotId,
    pub prompt: String,
    #[serde(default)]
    pub character_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_ref: Option<String>,
}

impl ItemInput {
    pub fn new(shot_id: impl Into<ShotId>, prompt: impl Into<String>) -> Self {
        Self {
            shot_id: shot_id.into(),
            prompt: prompt.into(),
            character_refs: Vec::new(),
            scene_ref: None,
        }
    }
}

/// One pipeline subject (a shot) tracked through its stages within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub item_id: String,
    pub shot_id: ShotId,
    pub sequence: usize,
    pub prompt: String,
    #[serde(default)]
    pub character_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_ref: Option<String>,
    /// One entry per job stage, same order as `JobRecord::stages`.
    pub stages: Vec<StageProgress>,
}

impl ItemRecord {
    pub fn new(job_id: &JobId, sequence: usize, input: ItemInput, stage_count: usize) -> Self {
        Self {
            item_id: format!("{}_item_{:03}", job_id, sequence + 1),
            shot_id: input.shot_id,
            sequence,
            prompt: input.prompt,
            character_refs: input.character_refs,
            scene_ref: input.scene_ref,
            stages: vec![StageProgress::default(); stage_count],
        }
    }

    pub fn status(&self) -> ItemStatus {
        if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
            return ItemStatus::Failed;
        }
        if self.stages.iter().all(|s| s.status == StageStatus::Succeeded) {
            return ItemStatus::Succeeded;
        }
        if self.stages.iter().any(|s| s.status.is_in_flight()) {
            return ItemStatus::InProgress;
        }
        if self.stages.iter().any(|s| s.status == StageStatus::Cancelled) {
            return ItemStatus::Cancelled;
        }
        if self.stages.iter().any(|s| s.status == StageStatus::Succeeded) {
            return ItemStatus::InProgress;
        }
        ItemStatus::Pending
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Index of the first stage that still has to run, if any.
    pub fn next_stage_index(&self) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.status != StageStatus::Succeeded)
    }

    /// Whether any stage task is currently in flight.
    pub fn in_flight(&self) -> bool {
        self.stages.iter().any(|s| s.status.is_in_flight())
    }

    /// Output of the stage preceding `index`, if any.
    pub fn prior_output(&self, index: usize) -> Option<&StageOutput> {
        if index == 0 {
            return None;
        }
        self.stages.get(index - 1).and_then(|s| s.output.as_ref())
    }

    /// First recorded stage error, for operator-facing progress reports.
    pub fn first_error(&self) -> Option<&TaskError> {
        self.stages.iter().find_map(|s| s.error.as_ref())
    }
}

/// Per-job execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Whether failed attempts are retried (sets stage max_attempts to 1
    /// when false).
    pub auto_retry: bool,
    /// Process items strictly one at a time.
    pub sequential: bool,
    /// Maximum items with in-flight stages at once.
    pub max_parallel: usize,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            auto_retry: true,
            sequential: false,
            max_parallel: 2,
        }
    }
}

impl JobOptions {
    pub fn effective_parallel(&self) -> usize {
        if self.sequential {
            1
        } else {
            self.max_parallel.max(1)
        }
    }
}

/// Computed job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    /// All items terminal, at least one failed. Sibling items are never
    /// aborted by one item's failure.
    CompletedWithFailures,
    /// Every item failed.
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::CompletedWithFailures
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }
}

/// Durable record of a batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    pub project_id: ProjectId,
    pub params: GenerationParams,
    pub stages: Vec<StageSpec>,
    pub items: Vec<ItemRecord>,
    pub options: JobOptions,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn status(&self) -> JobStatus {
        let total = self.items.len();
        let statuses: Vec<ItemStatus> = self.items.iter().map(|i| i.status()).collect();
        let terminal = statuses.iter().filter(|s| s.is_terminal()).count();
        let failed = statuses.iter().filter(|s| **s == ItemStatus::Failed).count();
        let in_flight = self.items.iter().any(|i| i.in_flight());

        if self.cancelled && !in_flight {
            return JobStatus::Cancelled;
        }
        if total > 0 && terminal == total {
            return if failed == total {
                JobStatus::Failed
            } else if failed > 0 {
                JobStatus::CompletedWithFailures
            } else {
                JobStatus::Completed
            };
        }
        if self.paused {
            // Still draining while stage tasks are in flight.
            return if in_flight {
                JobStatus::Running
            } else {
                JobStatus::Paused
            };
        }
        if self.started_at.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Pending
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Progress snapshot for callers; pure over the record.
    pub fn progress(&self) -> JobProgress {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        let mut in_progress = 0;
        let mut pending = 0;
        let items = self
            .items
            .iter()
            .map(|item| {
                let status = item.status();
                match status {
                    ItemStatus::Succeeded => succeeded += 1,
                    ItemStatus::Failed => failed += 1,
                    ItemStatus::Cancelled => cancelled += 1,
                    ItemStatus::InProgress => in_progress += 1,
                    ItemStatus::Pending => pending += 1,
                }
                ItemProgress {
                    item_id: item.item_id.clone(),
                    shot_id: item.shot_id.clone(),
                    status,
                    current_stage: item
                        .next_stage_index()
                        .and_then(|i| self.stages.get(i))
                        .map(|s| s.kind),
                    stages: item
                        .stages
                        .iter()
                        .zip(self.stages.iter())
                        .map(|(progress, spec)| StageView {
                            kind: spec.kind,
                            status: progress.status,
                            attempts: progress.attempts,
                            error: progress.error.clone(),
                        })
                        .collect(),
                }
            })
            .collect();

        let total = self.items.len();
        let done = succeeded + failed + cancelled;
        JobProgress {
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            status: self.status(),
            total,
            succeeded,
            failed,
            cancelled,
            in_progress,
            pending,
            percent: if total == 0 {
                0.0
            } else {
                done as f32 / total as f32 * 100.0
            },
            items,
        }
    }
}

/// Operator-facing snapshot of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub in_progress: usize,
    pub pending: usize,
    pub percent: f32,
    pub items: Vec<ItemProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProgress {
    pub item_id: String,
    pub shot_id: ShotId,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageKind>,
    pub stages: Vec<StageView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageView {
    pub kind: StageKind,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::StageKind;

    fn two_stage_job(item_count: usize) -> JobRecord {
        let job_id = JobId::new();
        let stages = vec![StageSpec::new(StageKind::Keyframe), StageSpec::new(StageKind::Video)];
        let items = (0..item_count)
            .map(|i| {
                ItemRecord::new(
                    &job_id,
                    i,
                    ItemInput::new(format!("shot_{i:03}"), "prompt"),
                    stages.len(),
                )
            })
            .collect();
        JobRecord {
            job_id,
            name: "test".to_string(),
            project_id: ProjectId::new(),
            params: GenerationParams::default(),
            stages,
            items,
            options: JobOptions::default(),
            paused: false,
            cancelled: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn succeed_stage(item: &mut ItemRecord, index: usize) {
        let stage = &mut item.stages[index];
        stage.status = StageStatus::Succeeded;
        stage.output = Some(StageOutput::Keyframe {
            path: format!("/tmp/{}.png", item.shot_id),
        });
    }

    #[test]
    fn all_items_succeeded_reports_completed() {
        let mut job = two_stage_job(10);
        for item in &mut job.items {
            succeed_stage(item, 0);
            succeed_stage(item, 1);
        }
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress().succeeded, 10);
    }

    #[test]
    fn one_failed_item_reports_completed_with_failures() {
        let mut job = two_stage_job(10);
        for item in &mut job.items {
            succeed_stage(item, 0);
            succeed_stage(item, 1);
        }
        let failing = &mut job.items[3];
        failing.stages[1].status = StageStatus::Failed;
        failing.stages[1].output = None;
        failing.stages[1].error = Some(TaskError::permanent("unsupported resolution"));

        assert_eq!(job.status(), JobStatus::CompletedWithFailures);
        let progress = job.progress();
        assert_eq!(progress.succeeded, 9);
        assert_eq!(progress.failed, 1);
        let failed_item = progress
            .items
            .iter()
            .find(|i| i.status == ItemStatus::Failed)
            .unwrap();
        assert_eq!(
            failed_item.stages[1].error.as_ref().unwrap().message,
            "unsupported resolution"
        );
    }

    #[test]
    fn partially_complete_item_is_in_progress() {
        let mut job = two_stage_job(1);
        succeed_stage(&mut job.items[0], 0);
        assert_eq!(job.items[0].status(), ItemStatus::InProgress);
        assert_eq!(job.items[0].next_stage_index(), Some(1));
        assert!(job.items[0].prior_output(1).is_some());
    }

    #[test]
    fn paused_job_with_in_flight_work_is_still_running() {
        let mut job = two_stage_job(2);
        job.started_at = Some(Utc::now());
        job.paused = true;
        job.items[0].stages[0].status = StageStatus::Running;
        assert_eq!(job.status(), JobStatus::Running);

        job.items[0].stages[0].status = StageStatus::NotStarted;
        assert_eq!(job.status(), JobStatus::Paused);
    }

    #[test]
    fn cancelled_job_reports_cancelled_once_drained() {
        let mut job = two_stage_job(2);
        job.cancelled = true;
        for item in &mut job.items {
            for stage in &mut item.stages {
                stage.status = StageStatus::Cancelled;
            }
        }
        assert_eq!(job.status(), JobStatus::Cancelled);
    }
}
