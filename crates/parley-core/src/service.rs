use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::ApiError;
use crate::ids::{ExperimentId, ParticipantId, SessionId};
use crate::messages::Message;

/// One experiment (hosted agent) as listed by the remote service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub id: ExperimentId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantSummary {
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

/// A stored session as listed by the remote service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<ParticipantSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// A stored session together with its message history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub summary: SessionSummary,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// One cursor-paginated page of a listing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// URL of the next page, carrying the `cursor` query parameter.
    #[serde(default)]
    pub next: Option<String>,
}

pub type ExperimentPage = Page<ExperimentSummary>;
pub type SessionPage = Page<SessionSummary>;

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            next: None,
        }
    }
}

impl<T> Page<T> {
    /// The decoded cursor for the next page, if any. A `next` value that is
    /// not an absolute URL ends pagination.
    pub fn next_cursor(&self) -> Option<String> {
        let next = Url::parse(self.next.as_deref()?).ok()?;
        next.query_pairs()
            .find(|(key, _)| key == "cursor")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }
}

/// Operations consumed from the remote chat service.
///
/// Sessions are opaque handles: callers only pass them back.
#[async_trait]
pub trait ChatService: Send + Sync {
    fn name(&self) -> &str;

    /// Create a conversation context for one experiment, optionally
    /// pre-loaded with `seed_history`.
    async fn create_session(
        &self,
        experiment: &ExperimentId,
        participant: &ParticipantId,
        seed_history: Option<&[Message]>,
    ) -> Result<SessionId, ApiError>;

    /// Post one message into an existing session and return the agent's reply.
    async fn send_message(
        &self,
        experiment: &ExperimentId,
        content: &str,
        session: &SessionId,
    ) -> Result<String, ApiError>;

    async fn list_experiments(&self, cursor: Option<&str>) -> Result<ExperimentPage, ApiError>;

    async fn retrieve_experiment(
        &self,
        experiment: &ExperimentId,
    ) -> Result<ExperimentSummary, ApiError>;

    /// `ordering` names a field, prefixed with `-` for descending order.
    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        ordering: Option<&str>,
    ) -> Result<SessionPage, ApiError>;

    async fn retrieve_session(&self, session: &SessionId) -> Result<SessionDetail, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    #[test]
    fn next_cursor_extracted() {
        let page = ExperimentPage {
            results: vec![],
            next: Some("https://example.org/api/experiments/?cursor=cD0yMDI0&page_size=10".into()),
        };
        assert_eq!(page.next_cursor().as_deref(), Some("cD0yMDI0"));
    }

    #[test]
    fn next_cursor_is_percent_decoded() {
        let page = SessionPage {
            results: vec![],
            next: Some("https://example.org/api/sessions/?cursor=cD0yMDI0%3D&ordering=-created_at".into()),
        };
        assert_eq!(page.next_cursor().as_deref(), Some("cD0yMDI0="));
    }

    #[test]
    fn no_next_page() {
        assert_eq!(ExperimentPage::default().next_cursor(), None);
        let page = ExperimentPage {
            results: vec![],
            next: Some("https://example.org/api/experiments/".into()),
        };
        assert_eq!(page.next_cursor(), None);
        let relative = ExperimentPage {
            results: vec![],
            next: Some("/api/experiments/?cursor=abc".into()),
        };
        assert_eq!(relative.next_cursor(), None);
    }

    #[test]
    fn page_deserializes_with_missing_fields() {
        let page: ExperimentPage = serde_json::from_str(
            r#"{"results":[{"id":"exp-1","name":"Coach","url":"https://x/exp-1"},{"id":"exp-2"}]}"#,
        )
        .unwrap();
        assert_eq!(page.results.len(), 2);
        assert_eq!(page.results[0].name, "Coach");
        assert_eq!(page.results[1].name, "");
        assert!(page.next.is_none());
    }

    #[test]
    fn session_detail_flattens_summary() {
        let detail: SessionDetail = serde_json::from_str(
            r#"{
                "id": "sess-1",
                "team": {"name": "Eval", "slug": "eval"},
                "experiment": {"id": "exp-1", "name": "Coach", "url": "https://x/exp-1"},
                "participant": {"identifier": "p@example.org", "remote_id": ""},
                "created_at": "2024-05-01T10:00:00Z",
                "updated_at": "2024-05-01T10:05:00Z",
                "messages": [
                    {"role": "user", "content": "hi", "created_at": "2024-05-01T10:00:01Z"},
                    {"role": "assistant", "content": "hello", "created_at": "2024-05-01T10:00:02Z"}
                ],
                "tags": []
            }"#,
        )
        .unwrap();
        assert_eq!(detail.summary.id.as_str(), "sess-1");
        assert_eq!(detail.summary.participant.unwrap().identifier, "p@example.org");
        assert_eq!(detail.messages.len(), 2);
        assert_eq!(detail.messages[1].role, Role::Assistant);
    }
}
