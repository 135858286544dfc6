use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use parley_core::config::ClientConfig;
use parley_core::errors::ApiError;
use parley_core::ids::{ExperimentId, ParticipantId, SessionId};
use parley_core::messages::Message;
use parley_core::security::ApiKey;
use parley_core::service::{
    ChatService, ExperimentPage, ExperimentSummary, SessionDetail, SessionPage,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct CreateSessionBody<'a> {
    experiment: &'a str,
    participant: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<&'a [Message]>,
}

#[derive(Deserialize)]
struct CreateSessionReply {
    id: String,
}

#[derive(Serialize)]
struct SendMessageBody<'a> {
    message: &'a str,
    session: &'a str,
}

#[derive(Deserialize)]
struct SendMessageReply {
    response: String,
}

/// HTTP implementation of [`ChatService`] against an Open Chat Studio
/// deployment. Makes exactly one attempt per call; wrap it in
/// [`crate::ReliableService`] for retries.
pub struct OcsClient {
    client: Client,
    base_url: String,
    api_key: ApiKey,
    timeout: Duration,
}

impl OcsClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, ApiError> {
        if self.api_key.is_empty() {
            return Err(ApiError::Unauthorized("no API key configured".into()));
        }
        Ok(req
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("accept", "application/json"))
    }

    /// Send a request and decode the JSON reply, classifying failures.
    async fn execute<T: DeserializeOwned>(
        &self,
        action: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = self.authorize(req)?.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout)
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if status.is_client_error() {
                warn!(action, status = status.as_u16(), body = %body, "request rejected");
            } else {
                warn!(action, status = status.as_u16(), "request failed");
            }
            return Err(ApiError::from_status(status.as_u16(), body));
        }

        let bytes = resp.bytes().await.map_err(|e| ApiError::Network(e.to_string()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::InvalidResponse(format!("{action}: {e}")))
    }
}

#[async_trait]
impl ChatService for OcsClient {
    fn name(&self) -> &str {
        "ocs"
    }

    #[instrument(skip(self, seed_history), fields(experiment = %experiment, seeded = seed_history.map_or(0, <[Message]>::len)))]
    async fn create_session(
        &self,
        experiment: &ExperimentId,
        participant: &ParticipantId,
        seed_history: Option<&[Message]>,
    ) -> Result<SessionId, ApiError> {
        let body = CreateSessionBody {
            experiment: experiment.as_str(),
            participant: participant.as_str(),
            messages: seed_history.filter(|history| !history.is_empty()),
        };
        let req = self.client.post(self.url("/api/sessions/")).json(&body);
        let reply: CreateSessionReply = self.execute("creating session", req).await?;
        if reply.id.is_empty() {
            return Err(ApiError::InvalidResponse("creating session: empty session id".into()));
        }
        debug!(session_id = %reply.id, "session created");
        Ok(SessionId::from_raw(reply.id))
    }

    #[instrument(skip(self, content), fields(experiment = %experiment, session_id = %session))]
    async fn send_message(
        &self,
        experiment: &ExperimentId,
        content: &str,
        session: &SessionId,
    ) -> Result<String, ApiError> {
        let body = SendMessageBody {
            message: content,
            session: session.as_str(),
        };
        let path = format!("/channels/api/{}/incoming_message", experiment.as_str());
        let req = self.client.post(self.url(&path)).json(&body);
        let reply: SendMessageReply = self.execute("sending message", req).await?;
        Ok(reply.response)
    }

    async fn list_experiments(&self, cursor: Option<&str>) -> Result<ExperimentPage, ApiError> {
        let mut req = self.client.get(self.url("/api/experiments/"));
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        self.execute("listing experiments", req).await
    }

    async fn retrieve_experiment(
        &self,
        experiment: &ExperimentId,
    ) -> Result<ExperimentSummary, ApiError> {
        let path = format!("/api/experiments/{}/", experiment.as_str());
        self.execute("retrieving experiment", self.client.get(self.url(&path)))
            .await
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        ordering: Option<&str>,
    ) -> Result<SessionPage, ApiError> {
        let mut req = self.client.get(self.url("/api/sessions/"));
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        if let Some(ordering) = ordering {
            req = req.query(&[("ordering", ordering)]);
        }
        self.execute("listing sessions", req).await
    }

    #[instrument(skip(self), fields(session_id = %session))]
    async fn retrieve_session(&self, session: &SessionId) -> Result<SessionDetail, ApiError> {
        let path = format!("/api/sessions/{}/", session.as_str());
        let detail: SessionDetail = self
            .execute("retrieving session", self.client.get(self.url(&path)))
            .await?;
        debug!(messages = detail.messages.len(), "session retrieved");
        Ok(detail)
    }
}
