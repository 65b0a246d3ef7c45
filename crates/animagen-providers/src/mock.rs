//! Mock provider for tests and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use animagen_models::TaskError;

use crate::error::{ProviderError, ProviderResult};
use crate::types::{GenerationOutput, GenerationRequest, ProviderHandle, ProviderStatus};
use crate::provider::GenerationProvider;

struct MockTask {
    request: GenerationRequest,
    ready_at: Instant,
    failure: Option<TaskError>,
}

/// Simulated provider. Completes after a configurable latency and can be
/// scripted to fail, which is what the retry tests lean on.
pub struct MockProvider {
    latency: Duration,
    submissions: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
    scripted_failures: Mutex<VecDeque<TaskError>>,
    tasks: Mutex<HashMap<String, MockTask>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            submissions: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a failure; each one is consumed by a single subsequent
    /// submission, which then reports it at poll time.
    pub fn push_failure(&self, error: TaskError) {
        self.scripted_failures
            .lock()
            .expect("mock lock poisoned")
            .push_back(error);
    }

    /// Queue the same failure `n` times.
    pub fn push_failures(&self, n: usize, error: TaskError) {
        for _ in 0..n {
            self.push_failure(error.clone());
        }
    }

    /// Number of submissions seen so far.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Every request submitted, in submission order.
    pub fn submitted_requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("mock lock poisoned").clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, request: GenerationRequest) -> ProviderResult<ProviderHandle> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("mock_{:06}", n);

        let failure = self
            .scripted_failures
            .lock()
            .expect("mock lock poisoned")
            .pop_front();

        debug!(handle = %id, class = %request.class, failing = failure.is_some(), "mock submit");

        self.requests
            .lock()
            .expect("mock lock poisoned")
            .push(request.clone());
        self.tasks.lock().expect("mock lock poisoned").insert(
            id.clone(),
            MockTask {
                request,
                ready_at: Instant::now() + self.latency,
                failure,
            },
        );
        Ok(ProviderHandle::new(id))
    }

    async fn poll(&self, handle: &ProviderHandle) -> ProviderResult<ProviderStatus> {
        let tasks = self.tasks.lock().expect("mock lock poisoned");
        let task = tasks
            .get(&handle.id)
            .ok_or_else(|| ProviderError::invalid_request(format!("unknown handle {}", handle.id)))?;

        if let Some(error) = &task.failure {
            return Ok(ProviderStatus::Failed {
                error: error.clone(),
            });
        }
        if Instant::now() < task.ready_at {
            return Ok(ProviderStatus::Processing { progress: 50 });
        }
        Ok(ProviderStatus::Completed {
            output: GenerationOutput {
                artifact: format!("mock://{}/{}", task.request.class, handle.id),
            },
        })
    }
}
