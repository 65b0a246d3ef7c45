//! End-to-end pipeline tests against the mock provider: dependency
//! chaining, recovery, failure isolation, pause/cancel and persistence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use animagen_models::{
    GenerationParams, ItemInput, ItemRecord, JobId, JobOptions, JobProgress, JobRecord, JobStatus,
    ProjectId, StageKind, StageOutput, StageSpec, StageStatus, TaskError,
};
use animagen_pipeline::{
    BatchPipeline, CreateJobRequest, JobStore, MemoryJobStore, PipelineError, StageRunner,
    StoreError, StoreResult,
};
use animagen_providers::{MockProvider, PollConfig};
use animagen_queue::{ConcurrencyConfig, RetryPolicy};

fn fast_concurrency() -> ConcurrencyConfig {
    ConcurrencyConfig {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(20),
            rate_limit_delay: Duration::from_millis(40),
            max_delay: Duration::from_secs(1),
        },
        ..ConcurrencyConfig::default()
    }
}

fn pipeline_with(provider: Arc<MockProvider>) -> (BatchPipeline, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let runner = Arc::new(StageRunner::new(provider, PollConfig::fast()));
    let pipeline = BatchPipeline::new(runner, store.clone(), &fast_concurrency());
    (pipeline, store)
}

fn shots(count: usize) -> Vec<ItemInput> {
    (0..count)
        .map(|i| ItemInput::new(format!("shot_{i:03}"), format!("prompt for shot {i}")))
        .collect()
}

fn keyframe_video_stages() -> Vec<StageSpec> {
    vec![
        StageSpec::new(StageKind::Keyframe),
        StageSpec::new(StageKind::Video),
    ]
}

async fn wait_until(
    pipeline: &BatchPipeline,
    job_id: &JobId,
    pred: impl Fn(&JobProgress) -> bool,
) -> JobProgress {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let progress = pipeline.get_progress(job_id).await.unwrap();
        if pred(&progress) {
            return progress;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for job state; last: {progress:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn hundred_items_two_stages_submit_exactly_two_hundred_tasks() {
    let provider = Arc::new(MockProvider::new());
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let request = CreateJobRequest::new(
        "full batch",
        ProjectId::new(),
        shots(100),
        keyframe_video_stages(),
    )
    .with_options(JobOptions {
        auto_retry: true,
        sequential: false,
        max_parallel: 100,
    });
    let job_id = pipeline.create_job(request).await.unwrap();
    pipeline.start(&job_id).await.unwrap();

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.succeeded, 100);
    assert_eq!(provider.submissions(), 200);

    // Every video request consumed a keyframe artifact, never the reverse.
    let requests = provider.submitted_requests();
    for request in requests
        .iter()
        .filter(|r| r.class == animagen_models::ResourceClass::Video)
    {
        let first_frame = request.image_path.as_deref().unwrap();
        assert!(first_frame.starts_with("mock://image/"), "{first_frame}");
    }
}

#[tokio::test]
async fn video_stage_waits_for_its_items_keyframe() {
    let provider = Arc::new(MockProvider::new());
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let job_id = pipeline
        .create_job(CreateJobRequest::new(
            "one shot",
            ProjectId::new(),
            shots(1),
            keyframe_video_stages(),
        ))
        .await
        .unwrap();
    pipeline.start(&job_id).await.unwrap();
    wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;

    let requests = provider.submitted_requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].class, animagen_models::ResourceClass::Image);
    assert_eq!(requests[1].class, animagen_models::ResourceClass::Video);
    // The video's first frame is the keyframe stage's artifact.
    assert_eq!(
        requests[1].image_path.as_deref().unwrap(),
        "mock://image/mock_000001"
    );
}

#[tokio::test]
async fn recovery_resubmits_only_unfinished_items() {
    let provider = Arc::new(MockProvider::new());
    let store = Arc::new(MemoryJobStore::new());

    // A checkpoint from a previous process: 10 items, 4 already done.
    let job_id = JobId::new();
    let stages = vec![StageSpec::new(StageKind::Keyframe)];
    let mut items: Vec<ItemRecord> = shots(10)
        .into_iter()
        .enumerate()
        .map(|(i, input)| ItemRecord::new(&job_id, i, input, stages.len()))
        .collect();
    for item in items.iter_mut().take(4) {
        item.stages[0].status = StageStatus::Succeeded;
        item.stages[0].output = Some(StageOutput::Keyframe {
            path: format!("mock://image/old_{}", item.shot_id),
        });
    }
    let job = JobRecord {
        job_id: job_id.clone(),
        name: "interrupted".to_string(),
        project_id: ProjectId::new(),
        params: GenerationParams::default(),
        stages,
        items,
        options: JobOptions {
            auto_retry: true,
            sequential: false,
            max_parallel: 10,
        },
        paused: false,
        cancelled: false,
        created_at: Utc::now(),
        started_at: Some(Utc::now()),
        completed_at: None,
    };
    store.save(&job).await.unwrap();

    let runner = Arc::new(StageRunner::new(provider.clone(), PollConfig::fast()));
    let pipeline = BatchPipeline::new(runner, store, &fast_concurrency());
    assert_eq!(pipeline.recover().await.unwrap(), 1);

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(progress.succeeded, 10);
    // Only the 6 unfinished items were resubmitted.
    assert_eq!(provider.submissions(), 6);
}

#[tokio::test]
async fn one_failed_item_never_aborts_its_siblings() {
    let provider = Arc::new(MockProvider::new());
    provider.push_failure(TaskError::permanent("unsupported aspect ratio"));
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let request = CreateJobRequest::new(
        "partial failure",
        ProjectId::new(),
        shots(10),
        vec![StageSpec::new(StageKind::Keyframe)],
    )
    .with_options(JobOptions {
        auto_retry: true,
        sequential: false,
        max_parallel: 10,
    });
    let job_id = pipeline.create_job(request).await.unwrap();
    pipeline.start(&job_id).await.unwrap();

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::CompletedWithFailures);
    assert_eq!(progress.succeeded, 9);
    assert_eq!(progress.failed, 1);

    let failed = progress
        .items
        .iter()
        .find(|i| i.status == animagen_models::ItemStatus::Failed)
        .unwrap();
    let error = failed.stages[0].error.as_ref().unwrap();
    assert_eq!(error.message, "unsupported aspect ratio");
    assert_eq!(error.kind, animagen_models::ErrorKind::Permanent);
}

#[tokio::test]
async fn transient_failures_are_retried_to_success() {
    let provider = Arc::new(MockProvider::new());
    provider.push_failures(2, TaskError::transient("provider 503"));
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let job_id = pipeline
        .create_job(CreateJobRequest::new(
            "flaky provider",
            ProjectId::new(),
            shots(1),
            vec![StageSpec::new(StageKind::Keyframe)],
        ))
        .await
        .unwrap();
    pipeline.start(&job_id).await.unwrap();

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(provider.submissions(), 3);
    assert_eq!(progress.items[0].stages[0].attempts, 3);
}

#[tokio::test]
async fn auto_retry_off_fails_after_one_attempt() {
    let provider = Arc::new(MockProvider::new());
    provider.push_failure(TaskError::transient("provider 503"));
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let request = CreateJobRequest::new(
        "no retries",
        ProjectId::new(),
        shots(1),
        vec![StageSpec::new(StageKind::Keyframe)],
    )
    .with_options(JobOptions {
        auto_retry: false,
        sequential: false,
        max_parallel: 2,
    });
    let job_id = pipeline.create_job(request).await.unwrap();
    pipeline.start(&job_id).await.unwrap();

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Failed);
    assert_eq!(provider.submissions(), 1);
}

#[tokio::test]
async fn paused_job_drains_then_resumes_where_it_left_off() {
    let provider = Arc::new(MockProvider::new().with_latency(Duration::from_millis(50)));
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let request = CreateJobRequest::new(
        "paused batch",
        ProjectId::new(),
        shots(4),
        vec![StageSpec::new(StageKind::Keyframe)],
    )
    .with_options(JobOptions {
        auto_retry: true,
        sequential: true,
        max_parallel: 1,
    });
    let job_id = pipeline.create_job(request).await.unwrap();
    pipeline.start(&job_id).await.unwrap();
    pipeline.pause(&job_id).await.unwrap();

    // The one in-flight item drains, then nothing else is queued.
    let progress = wait_until(&pipeline, &job_id, |p| p.status == JobStatus::Paused).await;
    assert_eq!(progress.succeeded, 1);
    assert_eq!(provider.submissions(), 1);

    pipeline.resume(&job_id).await.unwrap();
    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Completed);
    assert_eq!(provider.submissions(), 4);
}

#[tokio::test]
async fn cancelled_job_stops_queueing_and_reports_cancelled() {
    let provider = Arc::new(MockProvider::new().with_latency(Duration::from_millis(50)));
    let (pipeline, _store) = pipeline_with(Arc::clone(&provider));

    let request = CreateJobRequest::new(
        "cancelled batch",
        ProjectId::new(),
        shots(4),
        vec![StageSpec::new(StageKind::Keyframe)],
    )
    .with_options(JobOptions {
        auto_retry: true,
        sequential: true,
        max_parallel: 1,
    });
    let job_id = pipeline.create_job(request).await.unwrap();
    pipeline.start(&job_id).await.unwrap();
    pipeline.cancel(&job_id).await.unwrap();

    let progress = wait_until(&pipeline, &job_id, |p| p.status.is_terminal()).await;
    assert_eq!(progress.status, JobStatus::Cancelled);
    // At most the first item's task ever reached the provider.
    assert!(provider.submissions() <= 1, "{}", provider.submissions());
}

#[tokio::test]
async fn create_job_surfaces_checkpoint_failure() {
    struct FailingStore;

    #[async_trait::async_trait]
    impl JobStore for FailingStore {
        async fn save(&self, _job: &JobRecord) -> StoreResult<()> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        async fn load(&self, _job_id: &JobId) -> StoreResult<Option<JobRecord>> {
            Ok(None)
        }

        async fn load_all(&self) -> StoreResult<Vec<JobRecord>> {
            Ok(Vec::new())
        }
    }

    let runner = Arc::new(StageRunner::new(
        Arc::new(MockProvider::new()),
        PollConfig::fast(),
    ));
    let pipeline = BatchPipeline::new(runner, Arc::new(FailingStore), &fast_concurrency());

    let err = pipeline
        .create_job(CreateJobRequest::new(
            "unpersistable",
            ProjectId::new(),
            shots(1),
            vec![StageSpec::new(StageKind::Keyframe)],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Persistence(_)));
}

#[tokio::test]
async fn jobs_are_listed_newest_first() {
    let provider = Arc::new(MockProvider::new());
    let (pipeline, _store) = pipeline_with(provider);

    let first = pipeline
        .create_job(CreateJobRequest::new(
            "first",
            ProjectId::new(),
            shots(1),
            vec![StageSpec::new(StageKind::Keyframe)],
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = pipeline
        .create_job(CreateJobRequest::new(
            "second",
            ProjectId::new(),
            shots(1),
            vec![StageSpec::new(StageKind::Keyframe)],
        ))
        .await
        .unwrap();

    let listed = pipeline.list_jobs().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].job_id, second);
    assert_eq!(listed[1].job_id, first);
}

#[tokio::test]
async fn unknown_job_is_reported() {
    let (pipeline, _store) = pipeline_with(Arc::new(MockProvider::new()));
    let missing = JobId::new();
    assert!(matches!(
        pipeline.get_progress(&missing).await.unwrap_err(),
        PipelineError::JobNotFound(_)
    ));
    assert!(matches!(
        pipeline.start(&missing).await.unwrap_err(),
        PipelineError::JobNotFound(_)
    ));
}
