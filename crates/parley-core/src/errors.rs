use std::time::Duration;

/// Coarse failure taxonomy surfaced to callers of the API client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Transient failure (timeout, connection error, 5xx), or retries exhausted.
    RemoteUnavailable,
    /// Authorization or validation failure. Never retried.
    RemoteRejected,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RemoteUnavailable => f.write_str("remote unavailable"),
            Self::RemoteRejected => f.write_str("remote rejected"),
        }
    }
}

/// Typed error hierarchy for calls against the remote chat service.
/// Classifies errors as fatal (don't retry), retryable, or terminal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    // Fatal: never retried
    #[error("authorization failed: {0}")]
    Unauthorized(String),
    #[error("request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    // Retryable
    #[error("rate limited")]
    RateLimited,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // Terminal
    #[error("remote unavailable after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: Box<ApiError> },
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError { .. } | Self::Network(_) | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized(_) | Self::Rejected { .. } | Self::InvalidResponse(_)
        )
    }

    pub fn kind(&self) -> FailureKind {
        if self.is_fatal() {
            FailureKind::RemoteRejected
        } else {
            FailureKind::RemoteUnavailable
        }
    }

    /// The underlying per-attempt failure, unwrapping `Exhausted`.
    pub fn root_cause(&self) -> &ApiError {
        match self {
            Self::Exhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Exhausted { .. } => "exhausted",
        }
    }

    /// Classify a non-success HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(body),
            429 => Self::RateLimited,
            500..=599 => Self::ServerError { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ApiError::RateLimited.is_retryable());
        assert!(ApiError::ServerError { status: 502, body: "bad gateway".into() }.is_retryable());
        assert!(ApiError::Network("connection reset".into()).is_retryable());
        assert!(ApiError::Timeout(Duration::from_secs(300)).is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(ApiError::Unauthorized("bad key".into()).is_fatal());
        assert!(ApiError::Rejected { status: 422, body: "invalid".into() }.is_fatal());
        assert!(ApiError::InvalidResponse("missing id".into()).is_fatal());
    }

    #[test]
    fn exhausted_is_terminal() {
        let err = ApiError::Exhausted {
            attempts: 3,
            last: Box::new(ApiError::Timeout(Duration::from_secs(1))),
        };
        assert!(!err.is_retryable());
        assert!(!err.is_fatal());
        assert_eq!(err.kind(), FailureKind::RemoteUnavailable);
        assert!(matches!(err.root_cause(), ApiError::Timeout(_)));
        assert!(err.to_string().contains("after 3 attempt(s)"));
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn kind_mapping() {
        assert_eq!(ApiError::RateLimited.kind(), FailureKind::RemoteUnavailable);
        assert_eq!(
            ApiError::Unauthorized("x".into()).kind(),
            FailureKind::RemoteRejected
        );
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(ApiError::from_status(401, String::new()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(403, String::new()), ApiError::Unauthorized(_)));
        assert!(matches!(ApiError::from_status(400, String::new()), ApiError::Rejected { status: 400, .. }));
        assert!(matches!(ApiError::from_status(404, String::new()), ApiError::Rejected { status: 404, .. }));
        assert!(ApiError::from_status(429, String::new()).is_retryable());
        assert!(ApiError::from_status(500, String::new()).is_retryable());
        assert!(ApiError::from_status(503, String::new()).is_retryable());
        assert!(ApiError::from_status(302, String::new()).is_fatal());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(ApiError::RateLimited.error_kind(), "rate_limited");
        assert_eq!(ApiError::Network("x".into()).error_kind(), "network_error");
    }
}
