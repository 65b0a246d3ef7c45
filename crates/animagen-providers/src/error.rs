//! Provider error types.

use thiserror::Error;

use animagen_models::{ErrorKind, TaskError};

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("generation failed: {0}")]
    Generation(String),

    /// Failure reported by the provider itself, with its own classification.
    #[error("{0}")]
    Reported(TaskError),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ProviderError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    /// Classification consumed by the queue's retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Reported(err) => err.kind,
            ProviderError::RateLimited(_) => ErrorKind::RateLimited,
            ProviderError::InvalidRequest(_) => ErrorKind::Permanent,
            ProviderError::Http { status: 429, .. } => ErrorKind::RateLimited,
            ProviderError::Http { status, .. } if (400..500).contains(status) => {
                ErrorKind::Permanent
            }
            // 5xx, transport, io, malformed bodies: worth another attempt.
            _ => ErrorKind::Transient,
        }
    }
}

impl From<ProviderError> for TaskError {
    fn from(err: ProviderError) -> Self {
        match err {
            // Recorded verbatim; the provider already classified it.
            ProviderError::Reported(inner) => inner,
            other => TaskError::new(other.kind(), other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_classification() {
        assert_eq!(
            ProviderError::Http {
                status: 429,
                message: "slow down".into()
            }
            .kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            ProviderError::Http {
                status: 400,
                message: "bad prompt".into()
            }
            .kind(),
            ErrorKind::Permanent
        );
        assert_eq!(
            ProviderError::Http {
                status: 503,
                message: "overloaded".into()
            }
            .kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn converts_into_task_error() {
        let err: TaskError = ProviderError::invalid_request("unsupported size").into();
        assert_eq!(err.kind, ErrorKind::Permanent);
        assert!(err.message.contains("unsupported size"));
    }

    #[test]
    fn reported_failures_pass_through_verbatim() {
        let reported = TaskError::permanent("unsupported aspect ratio");
        let err: TaskError = ProviderError::Reported(reported.clone()).into();
        assert_eq!(err, reported);
    }
}
