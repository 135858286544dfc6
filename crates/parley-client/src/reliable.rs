use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use parley_core::config::{ClientConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_WAIT, DEFAULT_TIMEOUT};
use parley_core::errors::ApiError;
use parley_core::ids::{ExperimentId, ParticipantId, SessionId};
use parley_core::messages::Message;
use parley_core::service::{
    ChatService, ExperimentPage, ExperimentSummary, SessionDetail, SessionPage,
};

/// Retry behavior for [`ReliableService`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    /// Total attempts per operation, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub retry_wait: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait: DEFAULT_RETRY_WAIT,
            attempt_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&ClientConfig> for ReliableConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_wait: config.retry_wait,
            attempt_timeout: config.timeout,
        }
    }
}

/// Wraps a [`ChatService`] with bounded retries.
///
/// - Each attempt is cut off after `attempt_timeout`
/// - Transient failures are retried after a fixed `retry_wait`
/// - Fatal failures (auth, validation, malformed reply) return immediately
/// - Running out of attempts yields [`ApiError::Exhausted`] carrying the last cause
pub struct ReliableService<S: ChatService> {
    inner: S,
    config: ReliableConfig,
    total_retries: Arc<AtomicU64>,
}

impl<S: ChatService> ReliableService<S> {
    pub fn new(inner: S, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &S {
        &self.inner
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.config.attempt_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::Timeout(self.config.attempt_timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            if attempt >= max_attempts {
                warn!(
                    operation,
                    attempts = attempt,
                    error = %err,
                    error_kind = err.error_kind(),
                    "giving up after final attempt"
                );
                return Err(ApiError::Exhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            self.total_retries.fetch_add(1, Ordering::Relaxed);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = self.config.retry_wait.as_millis() as u64,
                error = %err,
                "retrying after error"
            );
            tokio::time::sleep(self.config.retry_wait).await;
        }
    }
}

#[async_trait]
impl<S: ChatService> ChatService for ReliableService<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn create_session(
        &self,
        experiment: &ExperimentId,
        participant: &ParticipantId,
        seed_history: Option<&[Message]>,
    ) -> Result<SessionId, ApiError> {
        self.with_retry("create_session", move || {
            self.inner.create_session(experiment, participant, seed_history)
        })
        .await
    }

    async fn send_message(
        &self,
        experiment: &ExperimentId,
        content: &str,
        session: &SessionId,
    ) -> Result<String, ApiError> {
        self.with_retry("send_message", move || {
            self.inner.send_message(experiment, content, session)
        })
        .await
    }

    async fn list_experiments(&self, cursor: Option<&str>) -> Result<ExperimentPage, ApiError> {
        self.with_retry("list_experiments", move || self.inner.list_experiments(cursor))
            .await
    }

    async fn retrieve_experiment(
        &self,
        experiment: &ExperimentId,
    ) -> Result<ExperimentSummary, ApiError> {
        self.with_retry("retrieve_experiment", move || {
            self.inner.retrieve_experiment(experiment)
        })
        .await
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        ordering: Option<&str>,
    ) -> Result<SessionPage, ApiError> {
        self.with_retry("list_sessions", move || self.inner.list_sessions(cursor, ordering))
            .await
    }

    async fn retrieve_session(&self, session: &SessionId) -> Result<SessionDetail, ApiError> {
        self.with_retry("retrieve_session", move || self.inner.retrieve_session(session))
            .await
    }
}
