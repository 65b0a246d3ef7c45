//! Generic HTTP JSON provider.
//!
//! Speaks the submit/status protocol shared by the hosted generation
//! gateways: POST a generation request, then GET its status until a terminal
//! state is reported.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use async_trait::async_trait;

use animagen_models::TaskError;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::GenerationProvider;
use crate::types::{GenerationOutput, GenerationRequest, ProviderHandle, ProviderStatus};

/// HTTP provider configuration.
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Gateway base URL.
    pub base_url: String,
    /// Bearer token, if the gateway requires one.
    pub api_key: Option<String>,
    /// Submission endpoint, POST.
    pub submit_path: String,
    /// Status endpoint; the handle id is appended, GET.
    pub status_path: String,
    /// Connect/read timeout for individual HTTP calls.
    pub request_timeout: Duration,
}

impl Default for HttpProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            submit_path: "/v1/generations".to_string(),
            status_path: "/v1/generations".to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl HttpProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ANIMAGEN_PROVIDER_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            api_key: std::env::var("ANIMAGEN_PROVIDER_KEY").ok(),
            submit_path: std::env::var("ANIMAGEN_PROVIDER_SUBMIT_PATH")
                .unwrap_or_else(|_| "/v1/generations".to_string()),
            status_path: std::env::var("ANIMAGEN_PROVIDER_STATUS_PATH")
                .unwrap_or_else(|_| "/v1/generations".to_string()),
            request_timeout: Duration::from_secs(
                std::env::var("ANIMAGEN_PROVIDER_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Generation provider over a JSON submit/status gateway.
pub struct HttpProvider {
    client: reqwest::Client,
    config: HttpProviderConfig,
}

impl HttpProvider {
    pub fn new(config: HttpProviderConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> ProviderResult<Self> {
        Self::new(HttpProviderConfig::from_env())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Map a non-success HTTP response into a classified error.
    async fn error_from_response(resp: reqwest::Response) -> ProviderError {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        if status == 429 {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::Http { status, message }
        }
    }
}

#[async_trait]
impl GenerationProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: GenerationRequest) -> ProviderResult<ProviderHandle> {
        let url = self.url(&self.config.submit_path);
        let resp = self
            .authorize(self.client.post(&url).json(&request))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let body: SubmitResponse = resp.json().await?;
        debug!(task_id = %body.task_id, %url, "generation submitted");
        Ok(ProviderHandle::new(body.task_id))
    }

    async fn poll(&self, handle: &ProviderHandle) -> ProviderResult<ProviderStatus> {
        let url = format!("{}/{}", self.url(&self.config.status_path), handle.id);
        let resp = self.authorize(self.client.get(&url)).send().await?;

        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }

        let body: StatusResponse = resp.json().await?;
        match body.status.as_str() {
            "submitted" => Ok(ProviderStatus::Submitted),
            "processing" => Ok(ProviderStatus::Processing {
                progress: body.progress.unwrap_or(0),
            }),
            "completed" => {
                let artifact = body.url.ok_or_else(|| {
                    ProviderError::UnexpectedResponse(
                        "completed status without artifact url".to_string(),
                    )
                })?;
                Ok(ProviderStatus::Completed {
                    output: GenerationOutput { artifact },
                })
            }
            "failed" => Ok(ProviderStatus::Failed {
                error: TaskError::transient(
                    body.error.unwrap_or_else(|| "generation failed".to_string()),
                ),
            }),
            other => Err(ProviderError::UnexpectedResponse(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::generate;
    use crate::types::PollConfig;
    use animagen_models::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> HttpProvider {
        HttpProvider::new(HttpProviderConfig {
            base_url: server.uri(),
            ..HttpProviderConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn submit_then_poll_to_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/generations/t-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "url": "https://cdn.example/clip.mp4"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let output = generate(
            &provider,
            GenerationRequest::video("dolly in", "/tmp/kf.png"),
            &PollConfig::fast(),
        )
        .await
        .unwrap();
        assert_eq!(output.artifact, "https://cdn.example/clip.mp4");
    }

    #[tokio::test]
    async fn rate_limit_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .submit(GenerationRequest::image("a lighthouse"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn bad_request_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unsupported resolution"))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = provider
            .submit(GenerationRequest::image("a lighthouse"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn reported_failure_ends_polling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"task_id": "t-2"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/generations/t-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "failed",
                "error": "content policy"
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server).await;
        let err = generate(
            &provider,
            GenerationRequest::image("a lighthouse"),
            &PollConfig::fast(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("content policy"));
    }
}
