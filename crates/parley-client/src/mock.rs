use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use parley_core::errors::ApiError;
use parley_core::ids::{ExperimentId, ParticipantId, SessionId};
use parley_core::messages::Message;
use parley_core::service::{
    ChatService, ExperimentPage, ExperimentSummary, SessionDetail, SessionPage,
};

/// Pre-programmed reply to one `send_message` call.
#[derive(Clone, Debug)]
pub enum MockReply {
    Text(String),
    Error(ApiError),
    /// Wait a duration, then resolve the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// One call observed by [`MockService`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockCall {
    CreateSession {
        experiment: ExperimentId,
        participant: ParticipantId,
        seed_history: Vec<Message>,
    },
    SendMessage {
        experiment: ExperimentId,
        content: String,
        session: SessionId,
    },
    ListExperiments {
        cursor: Option<String>,
    },
    RetrieveExperiment {
        experiment: ExperimentId,
    },
    ListSessions {
        cursor: Option<String>,
        ordering: Option<String>,
    },
    RetrieveSession {
        session: SessionId,
    },
}

#[derive(Default)]
struct MockState {
    replies: HashMap<ExperimentId, VecDeque<MockReply>>,
    session_failures: HashMap<ExperimentId, VecDeque<ApiError>>,
    lookup_failures: VecDeque<ApiError>,
    calls: Vec<MockCall>,
}

impl MockState {
    fn record_lookup(&mut self, call: MockCall) -> Result<(), ApiError> {
        self.calls.push(call);
        match self.lookup_failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn not_found() -> ApiError {
    ApiError::Rejected {
        status: 404,
        body: "not found".into(),
    }
}

/// In-memory [`ChatService`] with scripted replies per experiment.
///
/// Replies are consumed in order; a call with nothing scripted fails with
/// `InvalidResponse`. Sessions always succeed unless a failure is queued.
/// Lookups of unknown experiments or sessions fail with a 404 rejection.
#[derive(Default)]
pub struct MockService {
    state: Mutex<MockState>,
    experiments: Vec<ExperimentSummary>,
    sessions: Vec<SessionDetail>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(self, experiment: &ExperimentId, replies: Vec<MockReply>) -> Self {
        self.state
            .lock()
            .replies
            .entry(experiment.clone())
            .or_default()
            .extend(replies);
        self
    }

    /// Queue failures returned by `create_session` before it starts succeeding.
    pub fn with_session_failures(self, experiment: &ExperimentId, failures: Vec<ApiError>) -> Self {
        self.state
            .lock()
            .session_failures
            .entry(experiment.clone())
            .or_default()
            .extend(failures);
        self
    }

    pub fn with_experiments(mut self, experiments: Vec<ExperimentSummary>) -> Self {
        self.experiments = experiments;
        self
    }

    pub fn with_sessions(mut self, sessions: Vec<SessionDetail>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Queue failures returned by the next experiment or session lookups.
    pub fn with_lookup_failures(self, failures: Vec<ApiError>) -> Self {
        self.state.lock().lookup_failures.extend(failures);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn send_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::SendMessage { .. }))
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::CreateSession { .. }))
            .count()
    }

    /// Messages sent to `experiment`, in order.
    pub fn sent_to(&self, experiment: &ExperimentId) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::SendMessage {
                    experiment: e,
                    content,
                    ..
                } if e == experiment => Some(content.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatService for MockService {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_session(
        &self,
        experiment: &ExperimentId,
        participant: &ParticipantId,
        seed_history: Option<&[Message]>,
    ) -> Result<SessionId, ApiError> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::CreateSession {
            experiment: experiment.clone(),
            participant: participant.clone(),
            seed_history: seed_history.map(<[Message]>::to_vec).unwrap_or_default(),
        });
        let failure = state
            .session_failures
            .get_mut(experiment)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(err) => Err(err),
            None => Ok(SessionId::generate()),
        }
    }

    async fn send_message(
        &self,
        experiment: &ExperimentId,
        content: &str,
        session: &SessionId,
    ) -> Result<String, ApiError> {
        let reply = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::SendMessage {
                experiment: experiment.clone(),
                content: content.to_string(),
                session: session.clone(),
            });
            state.replies.get_mut(experiment).and_then(VecDeque::pop_front)
        };

        match reply {
            Some(reply) => resolve_reply(reply).await,
            None => Err(ApiError::InvalidResponse(format!(
                "MockService: no reply configured for experiment {experiment}"
            ))),
        }
    }

    async fn list_experiments(&self, cursor: Option<&str>) -> Result<ExperimentPage, ApiError> {
        self.state.lock().calls.push(MockCall::ListExperiments {
            cursor: cursor.map(str::to_string),
        });
        Ok(ExperimentPage {
            results: self.experiments.clone(),
            next: None,
        })
    }

    async fn retrieve_experiment(
        &self,
        experiment: &ExperimentId,
    ) -> Result<ExperimentSummary, ApiError> {
        self.state.lock().record_lookup(MockCall::RetrieveExperiment {
            experiment: experiment.clone(),
        })?;
        self.experiments
            .iter()
            .find(|e| &e.id == experiment)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn list_sessions(
        &self,
        cursor: Option<&str>,
        ordering: Option<&str>,
    ) -> Result<SessionPage, ApiError> {
        self.state.lock().record_lookup(MockCall::ListSessions {
            cursor: cursor.map(str::to_string),
            ordering: ordering.map(str::to_string),
        })?;
        Ok(SessionPage {
            results: self.sessions.iter().map(|s| s.summary.clone()).collect(),
            next: None,
        })
    }

    async fn retrieve_session(&self, session: &SessionId) -> Result<SessionDetail, ApiError> {
        self.state.lock().record_lookup(MockCall::RetrieveSession {
            session: session.clone(),
        })?;
        self.sessions
            .iter()
            .find(|s| &s.summary.id == session)
            .cloned()
            .ok_or_else(not_found)
    }
}

/// Resolve a reply, unrolling nested delays iteratively.
async fn resolve_reply(reply: MockReply) -> Result<String, ApiError> {
    let mut current = reply;
    loop {
        match current {
            MockReply::Text(text) => return Ok(text),
            MockReply::Error(e) => return Err(e),
            MockReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
