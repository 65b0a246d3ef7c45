//! Stage execution: payload construction and provider calls.
//!
//! A stage task is one provider round trip (submit, poll to completion,
//! optionally localize the artifact). The queue wraps each call in the
//! attempt timeout and classifies failures for retry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use animagen_models::{
    GenerationParams, ItemRecord, ResourceClass, StageKind, StageOutput, StagePayload, StageSpec,
    TaskError,
};
use animagen_providers::{
    artifact, await_completion, GenerationProvider, GenerationRequest, PollConfig,
};

/// Build the payload for one stage of one item from the item's inputs and the
/// prior stage's persisted output.
pub fn build_payload(
    params: &GenerationParams,
    spec: &StageSpec,
    item: &ItemRecord,
    stage_index: usize,
) -> Result<StagePayload, TaskError> {
    match spec.kind {
        StageKind::Llm => Ok(StagePayload::Llm {
            shot_id: item.shot_id.clone(),
            prompt: item.prompt.clone(),
        }),
        StageKind::Keyframe => Ok(StagePayload::Keyframe {
            shot_id: item.shot_id.clone(),
            prompt: item.prompt.clone(),
            character_refs: item.character_refs.clone(),
            scene_ref: item.scene_ref.clone(),
            resolution: params.resolution,
        }),
        StageKind::Video => {
            let keyframe_path = item
                .prior_output(stage_index)
                .and_then(|o| o.keyframe_path())
                .ok_or_else(|| {
                    TaskError::dependency_failed("video stage requires a completed keyframe")
                })?;
            Ok(StagePayload::Video {
                shot_id: item.shot_id.clone(),
                prompt: item.prompt.clone(),
                keyframe_path: keyframe_path.to_string(),
                duration: params.duration,
                resolution: params.resolution,
                watermark: params.watermark,
            })
        }
    }
}

/// Executes stage payloads against the configured providers.
pub struct StageRunner {
    default_provider: Arc<dyn GenerationProvider>,
    providers: HashMap<ResourceClass, Arc<dyn GenerationProvider>>,
    poll: PollConfig,
    artifact_dir: Option<PathBuf>,
    client: reqwest::Client,
}

impl StageRunner {
    pub fn new(default_provider: Arc<dyn GenerationProvider>, poll: PollConfig) -> Self {
        Self {
            default_provider,
            providers: HashMap::new(),
            poll,
            artifact_dir: None,
            client: reqwest::Client::new(),
        }
    }

    /// Route one resource class to a dedicated provider.
    pub fn with_provider(
        mut self,
        class: ResourceClass,
        provider: Arc<dyn GenerationProvider>,
    ) -> Self {
        self.providers.insert(class, provider);
        self
    }

    /// Download remote artifacts into this directory instead of keeping
    /// provider URLs.
    pub fn with_artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    fn provider(&self, class: ResourceClass) -> &Arc<dyn GenerationProvider> {
        self.providers.get(&class).unwrap_or(&self.default_provider)
    }

    /// Run one stage to completion. Errors come back classified so the queue
    /// can decide between retry and terminal failure.
    pub async fn execute(&self, payload: StagePayload) -> Result<StageOutput, TaskError> {
        let kind = payload.kind();
        let class = kind.resource_class();
        let shot_id = payload.shot_id().clone();
        let provider = self.provider(class);

        let request = request_for(&payload);
        let handle = provider.submit(request).await.map_err(TaskError::from)?;
        debug!(
            provider = provider.name(),
            shot = %shot_id,
            stage = %kind,
            handle = %handle.id,
            "stage submitted"
        );
        let output = await_completion(provider.as_ref(), &handle, &self.poll)
            .await
            .map_err(TaskError::from)?;

        match kind {
            StageKind::Llm => Ok(StageOutput::Llm {
                text: output.artifact,
            }),
            StageKind::Keyframe => {
                let path = self.localize(&output.artifact, &shot_id, "png").await?;
                Ok(StageOutput::Keyframe { path })
            }
            StageKind::Video => {
                let path = self.localize(&output.artifact, &shot_id, "mp4").await?;
                Ok(StageOutput::Video {
                    path,
                    provider_task: Some(handle.id),
                })
            }
        }
    }

    /// Download an http(s) artifact when an artifact directory is
    /// configured; otherwise pass the provider's path/URL through.
    async fn localize(
        &self,
        artifact_ref: &str,
        shot_id: &animagen_models::ShotId,
        ext: &str,
    ) -> Result<String, TaskError> {
        let Some(dir) = &self.artifact_dir else {
            return Ok(artifact_ref.to_string());
        };
        if !artifact_ref.starts_with("http://") && !artifact_ref.starts_with("https://") {
            return Ok(artifact_ref.to_string());
        }
        let dest = dir.join(format!("{shot_id}.{ext}"));
        let downloaded = artifact::download(&self.client, artifact_ref, &dest)
            .await
            .map_err(TaskError::from)?;
        debug!(
            shot = %shot_id,
            path = %downloaded.path.display(),
            checksum = %downloaded.checksum,
            "artifact localized"
        );
        Ok(downloaded.path.to_string_lossy().into_owned())
    }
}

fn request_for(payload: &StagePayload) -> GenerationRequest {
    match payload {
        StagePayload::Llm { prompt, .. } => GenerationRequest::llm(prompt.clone()),
        StagePayload::Keyframe {
            prompt,
            character_refs,
            scene_ref,
            resolution,
            ..
        } => {
            let mut refs = character_refs.clone();
            if let Some(scene) = scene_ref {
                refs.push(scene.clone());
            }
            GenerationRequest::image(prompt.clone())
                .with_references(refs)
                .with_resolution(*resolution)
        }
        StagePayload::Video {
            prompt,
            keyframe_path,
            duration,
            resolution,
            watermark,
            ..
        } => GenerationRequest::video(prompt.clone(), keyframe_path.clone())
            .with_duration(*duration)
            .with_resolution(*resolution)
            .with_watermark(*watermark),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use animagen_models::{ErrorKind, ItemInput, JobId, StageStatus, VideoDuration};
    use animagen_providers::MockProvider;

    fn item_with_stages(stage_count: usize) -> ItemRecord {
        ItemRecord::new(
            &JobId::from("batch_test"),
            0,
            ItemInput::new("shot_001", "slow pan over rooftops"),
            stage_count,
        )
    }

    #[test]
    fn video_payload_consumes_prior_keyframe() {
        let mut item = item_with_stages(2);
        item.stages[0].status = StageStatus::Succeeded;
        item.stages[0].output = Some(StageOutput::Keyframe {
            path: "/art/shot_001.png".to_string(),
        });
        let params = GenerationParams {
            duration: VideoDuration::Seconds8,
            ..GenerationParams::default()
        };
        let spec = StageSpec::new(StageKind::Video);

        let payload = build_payload(&params, &spec, &item, 1).unwrap();
        match payload {
            StagePayload::Video {
                keyframe_path,
                duration,
                ..
            } => {
                assert_eq!(keyframe_path, "/art/shot_001.png");
                assert_eq!(duration, VideoDuration::Seconds8);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn video_payload_without_keyframe_is_dependency_failure() {
        let item = item_with_stages(2);
        let params = GenerationParams::default();
        let spec = StageSpec::new(StageKind::Video);

        let err = build_payload(&params, &spec, &item, 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DependencyFailed);
    }

    #[tokio::test]
    async fn keyframe_stage_runs_against_mock() {
        let provider = Arc::new(MockProvider::new());
        let runner = StageRunner::new(provider, PollConfig::fast());
        let item = item_with_stages(1);
        let payload = build_payload(
            &GenerationParams::default(),
            &StageSpec::new(StageKind::Keyframe),
            &item,
            0,
        )
        .unwrap();

        let output = runner.execute(payload).await.unwrap();
        match output {
            StageOutput::Keyframe { path } => assert!(path.starts_with("mock://image/")),
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_failure_keeps_its_kind() {
        let provider = Arc::new(MockProvider::new());
        provider.push_failure(TaskError::rate_limited("quota exhausted"));
        let runner = StageRunner::new(provider, PollConfig::fast());
        let item = item_with_stages(1);
        let payload = build_payload(
            &GenerationParams::default(),
            &StageSpec::new(StageKind::Llm),
            &item,
            0,
        )
        .unwrap();

        let err = runner.execute(payload).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }
}
