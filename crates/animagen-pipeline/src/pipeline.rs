//! The batch pipeline orchestrator.
//!
//! Jobs decompose into per-item, per-stage tasks on the class queues. Every
//! stage outcome comes back through one mpsc channel and is applied by a
//! single handler loop, so two completions for the same item can never race.
//! The full job record is checkpointed before each new submission; recovery
//! re-derives remaining work from the persisted stage states alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

use animagen_models::{
    CostEstimate, GenerationParams, ItemInput, ItemRecord, JobId, JobOptions, JobProgress,
    JobRecord, PricingTable, ProgressEvent, ProjectId, ResourceClass, StageKind, StageOutput,
    StageSpec, StageStatus, TaskError, TaskId,
};
use animagen_queue::{
    ConcurrencyConfig, QueueError, QueueStats, SubmitOptions, TaskOperation, TaskQueues,
};

use crate::cost;
use crate::error::{PipelineError, PipelineResult};
use crate::progress::ProgressChannel;
use crate::stage::{build_payload, StageRunner};
use crate::store::JobStore;

/// A batch submission: which shots to run, through which stages, with what
/// generation parameters.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub name: String,
    pub project_id: ProjectId,
    pub items: Vec<ItemInput>,
    pub stages: Vec<StageSpec>,
    pub params: GenerationParams,
    pub options: JobOptions,
}

impl CreateJobRequest {
    pub fn new(
        name: impl Into<String>,
        project_id: ProjectId,
        items: Vec<ItemInput>,
        stages: Vec<StageSpec>,
    ) -> Self {
        Self {
            name: name.into(),
            project_id,
            items,
            stages,
            params: GenerationParams::default(),
            options: JobOptions::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of one stage task, forwarded by its watcher onto the handler loop.
struct StageEvent {
    job_id: JobId,
    item_index: usize,
    stage_index: usize,
    task_id: TaskId,
    outcome: Result<StageOutput, TaskError>,
}

struct Shared {
    queues: TaskQueues<StageOutput>,
    runner: Arc<StageRunner>,
    store: Arc<dyn JobStore>,
    progress: ProgressChannel,
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

/// Handle to the orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct BatchPipeline {
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<StageEvent>,
}

impl BatchPipeline {
    pub fn new(
        runner: Arc<StageRunner>,
        store: Arc<dyn JobStore>,
        concurrency: &ConcurrencyConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            queues: TaskQueues::new(concurrency),
            runner,
            store,
            progress: ProgressChannel::default(),
            jobs: Mutex::new(HashMap::new()),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        tokio::spawn(event_loop(
            Arc::clone(&shared),
            events_tx.clone(),
            events_rx,
        ));
        Self { shared, events_tx }
    }

    /// Subscribe to pipeline progress events.
    pub fn progress_events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.shared.progress.subscribe()
    }

    /// Validate and persist a new job. Nothing runs until `start`.
    pub async fn create_job(&self, request: CreateJobRequest) -> PipelineResult<JobId> {
        validate_request(&request)?;

        let job_id = JobId::new();
        let stage_count = request.stages.len();
        let items = request
            .items
            .into_iter()
            .enumerate()
            .map(|(i, input)| ItemRecord::new(&job_id, i, input, stage_count))
            .collect();
        let job = JobRecord {
            job_id: job_id.clone(),
            name: request.name,
            project_id: request.project_id,
            params: request.params,
            stages: request.stages,
            items,
            options: request.options,
            paused: false,
            cancelled: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        self.shared.store.save(&job).await?;
        let total = job.items.len();
        self.shared.jobs.lock().await.insert(job_id.clone(), job);
        info!(job = %job_id, items = total, stages = stage_count, "job created");
        Ok(job_id)
    }

    /// Begin (or continue) queueing work for the job. Idempotent: only
    /// stages that are not already succeeded or in flight are submitted,
    /// which is also what makes restart recovery a plain re-`start`.
    pub async fn start(&self, job_id: &JobId) -> PipelineResult<()> {
        let mut jobs = self.shared.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;

        let first_start = job.started_at.is_none();
        if first_start {
            job.started_at = Some(Utc::now());
        }
        let submitted = submit_ready_stages(&self.shared, &self.events_tx, job).await?;
        if first_start {
            self.shared
                .progress
                .emit(ProgressEvent::job_started(job.job_id.clone(), job.items.len()));
        }
        info!(job = %job_id, submitted, "job started");
        Ok(())
    }

    /// Stop queueing new stage tasks; in-flight tasks drain naturally.
    pub async fn pause(&self, job_id: &JobId) -> PipelineResult<()> {
        let mut jobs = self.shared.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;
        job.paused = true;
        self.shared.store.save(job).await?;
        info!(job = %job_id, "job paused");
        Ok(())
    }

    /// Clear the pause flag and re-fill the submission slots.
    pub async fn resume(&self, job_id: &JobId) -> PipelineResult<()> {
        let mut jobs = self.shared.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;
        job.paused = false;
        submit_ready_stages(&self.shared, &self.events_tx, job).await?;
        info!(job = %job_id, "job resumed");
        Ok(())
    }

    /// Cancel the job permanently. Queue-pending stage tasks are withdrawn;
    /// running tasks drain to natural completion, after which the remaining
    /// stages of their items are marked cancelled by the handler.
    pub async fn cancel(&self, job_id: &JobId) -> PipelineResult<()> {
        let mut jobs = self.shared.jobs.lock().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))?;
        job.cancelled = true;

        for item_index in 0..job.items.len() {
            for stage_index in 0..job.stages.len() {
                let class = job.stages[stage_index].class;
                let stage = &job.items[item_index].stages[stage_index];
                if stage.status != StageStatus::Queued {
                    continue;
                }
                let Some(task_id) = stage.task_id.clone() else {
                    continue;
                };
                // False means the task already started; its watcher event
                // will drain the item instead.
                if self.shared.queues.get(class).cancel(&task_id).await {
                    let stage = &mut job.items[item_index].stages[stage_index];
                    stage.status = StageStatus::Cancelled;
                    stage.task_id = None;
                    stage.completed_at = Some(Utc::now());
                }
            }
            let item = &mut job.items[item_index];
            if !item.in_flight() {
                for stage in &mut item.stages {
                    if stage.status == StageStatus::NotStarted {
                        stage.status = StageStatus::Cancelled;
                    }
                }
            }
        }

        self.shared.store.save(job).await?;
        finalize_if_done(&self.shared, job).await;
        info!(job = %job_id, "job cancelled");
        Ok(())
    }

    /// Progress snapshot, with queue-level Running refinement for stages the
    /// record still shows as queued.
    pub async fn get_progress(&self, job_id: &JobId) -> PipelineResult<JobProgress> {
        let mut jobs = self.shared.jobs.lock().await;
        if let Some(job) = jobs.get_mut(job_id) {
            for item_index in 0..job.items.len() {
                for stage_index in 0..job.stages.len() {
                    let class = job.stages[stage_index].class;
                    let stage = &job.items[item_index].stages[stage_index];
                    if stage.status != StageStatus::Queued {
                        continue;
                    }
                    let Some(task_id) = stage.task_id.clone() else {
                        continue;
                    };
                    if self
                        .shared
                        .queues
                        .get(class)
                        .status(&task_id)
                        .is_some_and(|s| s.state == animagen_models::TaskState::Running)
                    {
                        job.items[item_index].stages[stage_index].status = StageStatus::Running;
                    }
                }
            }
            return Ok(job.progress());
        }
        drop(jobs);

        match self.shared.store.load(job_id).await? {
            Some(job) => Ok(job.progress()),
            None => Err(PipelineError::JobNotFound(job_id.clone())),
        }
    }

    /// Every known job, newest first. Store history plus live records.
    pub async fn list_jobs(&self) -> PipelineResult<Vec<JobProgress>> {
        let mut by_id: HashMap<JobId, JobRecord> = self
            .shared
            .store
            .load_all()
            .await?
            .into_iter()
            .map(|job| (job.job_id.clone(), job))
            .collect();
        {
            let jobs = self.shared.jobs.lock().await;
            for (id, job) in jobs.iter() {
                by_id.insert(id.clone(), job.clone());
            }
        }
        let mut records: Vec<JobRecord> = by_id.into_values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records.iter().map(|job| job.progress()).collect())
    }

    /// Reload every incomplete job from the store and continue it. Stage
    /// tasks that were in flight when the process died are re-issued; their
    /// old task ids are meaningless now.
    pub async fn recover(&self) -> PipelineResult<usize> {
        let incomplete = self.shared.store.load_all_incomplete().await?;
        let mut recovered = Vec::new();
        {
            let mut jobs = self.shared.jobs.lock().await;
            for mut job in incomplete {
                if jobs.contains_key(&job.job_id) {
                    continue;
                }
                for item in &mut job.items {
                    for stage in &mut item.stages {
                        if stage.status.is_in_flight() {
                            stage.status = StageStatus::NotStarted;
                            stage.task_id = None;
                        }
                    }
                }
                recovered.push(job.job_id.clone());
                jobs.insert(job.job_id.clone(), job);
            }
        }
        for job_id in &recovered {
            self.start(job_id).await?;
        }
        info!(count = recovered.len(), "recovered incomplete jobs");
        Ok(recovered.len())
    }

    /// Cost of a prospective batch at standard prices for its clip duration.
    pub fn estimate_cost(
        &self,
        item_count: usize,
        stages: &[StageSpec],
        params: &GenerationParams,
    ) -> CostEstimate {
        cost::estimate(item_count, stages, &PricingTable::standard(params.duration))
    }

    /// Per-class queue counts for dashboards.
    pub fn queue_stats(&self) -> HashMap<ResourceClass, QueueStats> {
        self.shared.queues.stats()
    }

    /// Stop the class queues; pending tasks are cancelled, running tasks
    /// drain.
    pub fn shutdown(&self) {
        self.shared.queues.shutdown_all();
    }
}

fn validate_request(request: &CreateJobRequest) -> PipelineResult<()> {
    if request.items.is_empty() {
        return Err(PipelineError::invalid_request("batch has no items"));
    }
    if request.stages.is_empty() {
        return Err(PipelineError::invalid_request("batch has no stages"));
    }
    for (index, stage) in request.stages.iter().enumerate() {
        if stage.class != stage.kind.resource_class() {
            return Err(PipelineError::invalid_request(format!(
                "stage {index} ({}) routed to wrong resource class {}",
                stage.kind, stage.class
            )));
        }
        if stage.max_attempts == 0 {
            return Err(PipelineError::invalid_request(format!(
                "stage {index} ({}) has zero max_attempts",
                stage.kind
            )));
        }
        if stage.kind == StageKind::Video {
            let preceded_by_keyframe = index > 0
                && request.stages.get(index - 1).map(|s| s.kind) == Some(StageKind::Keyframe);
            if !preceded_by_keyframe {
                return Err(PipelineError::invalid_request(
                    "video stage requires a preceding keyframe stage",
                ));
            }
        }
    }
    Ok(())
}

async fn event_loop(
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<StageEvent>,
    mut events_rx: mpsc::UnboundedReceiver<StageEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        handle_stage_event(&shared, &events_tx, event).await;
    }
}

/// Apply one stage outcome: record it, checkpoint, then queue follow-up work.
async fn handle_stage_event(
    shared: &Shared,
    events_tx: &mpsc::UnboundedSender<StageEvent>,
    event: StageEvent,
) {
    let mut jobs = shared.jobs.lock().await;
    let Some(job) = jobs.get_mut(&event.job_id) else {
        return;
    };
    let Some(stage_kind) = job.stages.get(event.stage_index).map(|s| s.kind) else {
        return;
    };
    let attempts = shared
        .queues
        .get(stage_kind.resource_class())
        .status(&event.task_id)
        .map(|s| s.attempts)
        .unwrap_or(1);
    let cancelled = job.cancelled;

    let Some(item) = job.items.get_mut(event.item_index) else {
        return;
    };
    let item_id = item.item_id.clone();
    let Some(stage) = item.stages.get_mut(event.stage_index) else {
        return;
    };
    // Stale event from a task this record no longer tracks.
    if stage.task_id.as_ref() != Some(&event.task_id) {
        return;
    }

    stage.task_id = None;
    stage.attempts = attempts;
    stage.completed_at = Some(Utc::now());
    let stage_error = match event.outcome {
        Ok(output) => {
            stage.status = StageStatus::Succeeded;
            stage.output = Some(output);
            stage.error = None;
            None
        }
        Err(err) => {
            stage.status = StageStatus::Failed;
            stage.error = Some(err.clone());
            Some(err)
        }
    };
    if cancelled {
        // Drain: a cancelled job never queues the item's remaining stages.
        for stage in &mut item.stages {
            if stage.status == StageStatus::NotStarted {
                stage.status = StageStatus::Cancelled;
            }
        }
    }

    match &stage_error {
        None => info!(job = %event.job_id, item = %item_id, stage = %stage_kind, "stage succeeded"),
        Some(err) => {
            warn!(job = %event.job_id, item = %item_id, stage = %stage_kind, error = %err, "stage failed")
        }
    }
    shared.progress.emit(ProgressEvent::stage_finished(
        event.job_id.clone(),
        item_id,
        stage_kind,
        stage_error,
    ));

    // Write-ahead: nothing new is queued until this outcome is durable.
    if let Err(e) = shared.store.save(job).await {
        error!(job = %job.job_id, error = %e, "checkpoint failed, halting job");
        shared.progress.emit(ProgressEvent::log(format!(
            "job {}: checkpoint failed: {e}",
            job.job_id
        )));
        return;
    }

    if let Err(e) = submit_ready_stages(shared, events_tx, job).await {
        error!(job = %job.job_id, error = %e, "failed to queue follow-up stages");
        return;
    }

    shared
        .progress
        .emit(ProgressEvent::progress(job.job_id.clone(), job.progress().percent));
    finalize_if_done(shared, job).await;
}

/// Stages eligible to run now: per item, the next non-succeeded stage, for
/// items that are neither terminal nor already in flight, up to the job's
/// parallelism limit.
fn plan_ready_stages(job: &JobRecord) -> Vec<(usize, usize)> {
    let mut planned = Vec::new();
    if job.paused || job.cancelled {
        return planned;
    }
    let limit = job.options.effective_parallel();
    let mut in_flight = job.items.iter().filter(|i| i.in_flight()).count();
    for (item_index, item) in job.items.iter().enumerate() {
        if in_flight >= limit {
            break;
        }
        if item.in_flight() || item.is_terminal() {
            continue;
        }
        if let Some(stage_index) = item.next_stage_index() {
            planned.push((item_index, stage_index));
            in_flight += 1;
        }
    }
    planned
}

/// Submit every planned stage, checkpoint the queued markers, then spawn the
/// watchers that feed outcomes back to the handler loop.
async fn submit_ready_stages(
    shared: &Shared,
    events_tx: &mpsc::UnboundedSender<StageEvent>,
    job: &mut JobRecord,
) -> PipelineResult<usize> {
    let planned = plan_ready_stages(job);
    let mut watchers = Vec::new();

    for (item_index, stage_index) in planned {
        let spec = job.stages[stage_index].clone();
        let payload =
            match build_payload(&job.params, &spec, &job.items[item_index], stage_index) {
                Ok(payload) => payload,
                Err(err) => {
                    let stage = &mut job.items[item_index].stages[stage_index];
                    stage.status = StageStatus::Failed;
                    stage.error = Some(err);
                    stage.completed_at = Some(Utc::now());
                    continue;
                }
            };

        let runner = Arc::clone(&shared.runner);
        let op: TaskOperation<StageOutput> = Box::new(move || {
            let runner = Arc::clone(&runner);
            let payload = payload.clone();
            async move { runner.execute(payload).await }.boxed()
        });
        let max_attempts = if job.options.auto_retry {
            spec.max_attempts
        } else {
            1
        };
        let opts = SubmitOptions::default()
            .with_priority(spec.priority)
            .with_max_attempts(max_attempts)
            .with_timeout(Duration::from_secs(spec.timeout_secs));
        let task_id = shared.queues.get(spec.class).submit(op, opts)?;

        let stage = &mut job.items[item_index].stages[stage_index];
        stage.status = StageStatus::Queued;
        stage.task_id = Some(task_id.clone());
        stage.started_at = Some(Utc::now());
        watchers.push((spec.class, task_id, item_index, stage_index));
    }

    // Checkpoint before acting on any outcome of the new tasks.
    shared.store.save(job).await?;

    let submitted = watchers.len();
    for (class, task_id, item_index, stage_index) in watchers {
        let queue = shared.queues.get(class).clone();
        let tx = events_tx.clone();
        let job_id = job.job_id.clone();
        tokio::spawn(async move {
            let outcome = match queue.await_result(&task_id).await {
                Ok(output) => Ok(output),
                Err(QueueError::Task(err)) => Err(err),
                Err(other) => Err(TaskError::transient(other.to_string())),
            };
            let _ = tx.send(StageEvent {
                job_id,
                item_index,
                stage_index,
                task_id,
                outcome,
            });
        });
    }
    Ok(submitted)
}

async fn finalize_if_done(shared: &Shared, job: &mut JobRecord) {
    if !job.is_terminal() || job.completed_at.is_some() {
        return;
    }
    job.completed_at = Some(Utc::now());
    if let Err(e) = shared.store.save(job).await {
        error!(job = %job.job_id, error = %e, "failed to checkpoint finished job");
    }
    let progress = job.progress();
    shared.progress.emit(ProgressEvent::job_finished(
        job.job_id.clone(),
        progress.succeeded,
        progress.failed,
        progress.cancelled,
    ));
    info!(
        job = %job.job_id,
        status = ?job.status(),
        succeeded = progress.succeeded,
        failed = progress.failed,
        cancelled = progress.cancelled,
        "job finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(items: usize, stages: Vec<StageSpec>) -> CreateJobRequest {
        CreateJobRequest::new(
            "validation",
            ProjectId::new(),
            (0..items)
                .map(|i| ItemInput::new(format!("shot_{i:03}"), "prompt"))
                .collect(),
            stages,
        )
    }

    #[test]
    fn empty_items_are_rejected() {
        let err = validate_request(&request(0, vec![StageSpec::new(StageKind::Keyframe)]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[test]
    fn empty_stages_are_rejected() {
        let err = validate_request(&request(1, vec![])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[test]
    fn video_without_keyframe_is_rejected() {
        let err = validate_request(&request(1, vec![StageSpec::new(StageKind::Video)]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));

        validate_request(&request(
            1,
            vec![
                StageSpec::new(StageKind::Keyframe),
                StageSpec::new(StageKind::Video),
            ],
        ))
        .unwrap();
    }

    #[test]
    fn misrouted_stage_class_is_rejected() {
        let mut stage = StageSpec::new(StageKind::Keyframe);
        stage.class = ResourceClass::Video;
        let err = validate_request(&request(1, vec![stage])).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRequest(_)));
    }

    #[test]
    fn plan_respects_parallelism_limit() {
        let job_id = JobId::new();
        let stages = vec![StageSpec::new(StageKind::Keyframe)];
        let items = (0..5)
            .map(|i| {
                ItemRecord::new(
                    &job_id,
                    i,
                    ItemInput::new(format!("shot_{i:03}"), "p"),
                    stages.len(),
                )
            })
            .collect();
        let mut job = JobRecord {
            job_id,
            name: "plan".to_string(),
            project_id: ProjectId::new(),
            params: GenerationParams::default(),
            stages,
            items,
            options: JobOptions {
                auto_retry: true,
                sequential: false,
                max_parallel: 2,
            },
            paused: false,
            cancelled: false,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        };

        assert_eq!(plan_ready_stages(&job), vec![(0, 0), (1, 0)]);

        job.options.sequential = true;
        assert_eq!(plan_ready_stages(&job), vec![(0, 0)]);

        job.options.sequential = false;
        job.items[0].stages[0].status = StageStatus::Queued;
        assert_eq!(plan_ready_stages(&job), vec![(1, 0)]);

        job.paused = true;
        assert!(plan_ready_stages(&job).is_empty());
    }
}
