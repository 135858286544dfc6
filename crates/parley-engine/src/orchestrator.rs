use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use parley_core::config::RunConfig;
use parley_core::conversation::{
    ConversationResult, ConversationSpec, RecordedExchange, SeedContext, TerminationReason, Turn,
};
use parley_core::errors::ApiError;
use parley_core::ids::{ExperimentId, ParticipantId, SessionId};
use parley_core::service::ChatService;

use crate::error::EngineError;
use crate::termination::{ExactSentinel, TerminationPolicy};

/// Transcript under construction for one conversation.
struct Transcript {
    spec_id: String,
    session_id: Option<SessionId>,
    user_session_id: Option<SessionId>,
    turns: Vec<Turn>,
    error: Option<String>,
}

impl Transcript {
    fn new(spec_id: &str) -> Self {
        Self {
            spec_id: spec_id.to_string(),
            session_id: None,
            user_session_id: None,
            turns: Vec::new(),
            error: None,
        }
    }

    fn finish(self, reason: TerminationReason) -> ConversationResult {
        info!(
            spec_id = %self.spec_id,
            turns = self.turns.len(),
            reason = %reason,
            failed = self.error.is_some(),
            "conversation finished"
        );
        ConversationResult {
            spec_id: self.spec_id,
            session_id: self.session_id,
            user_session_id: self.user_session_id,
            turns: self.turns,
            terminated_reason: reason,
            error: self.error,
        }
    }
}

/// Drives one conversation to completion against the remote service.
///
/// Simulation mode alternates between a user-simulating experiment and the
/// assistant experiment under test. Replay and fixed-query modes send
/// recorded queries to the assistant only, one fresh session per exchange.
pub struct Orchestrator {
    service: Arc<dyn ChatService>,
    assistant: ExperimentId,
    user_simulator: Option<ExperimentId>,
    participant: ParticipantId,
    config: RunConfig,
    termination: Arc<dyn TerminationPolicy>,
}

impl Orchestrator {
    pub fn new(
        service: Arc<dyn ChatService>,
        assistant: ExperimentId,
        participant: ParticipantId,
        config: RunConfig,
    ) -> Self {
        Self {
            service,
            assistant,
            user_simulator: None,
            participant,
            config,
            termination: Arc::new(ExactSentinel::default()),
        }
    }

    pub fn with_user_simulator(mut self, experiment: ExperimentId) -> Self {
        self.user_simulator = Some(experiment);
        self
    }

    pub fn with_termination(mut self, policy: Arc<dyn TerminationPolicy>) -> Self {
        self.termination = policy;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[instrument(skip(self, spec), fields(spec_id = %spec.id, mode = spec.seed.mode_name()))]
    pub async fn run(&self, spec: &ConversationSpec) -> Result<ConversationResult, EngineError> {
        match &spec.seed {
            SeedContext::Scenario(scenario) => self.simulate(&spec.id, scenario).await,
            SeedContext::Replay(exchanges) => self.replay(&spec.id, &spec.seed, exchanges).await,
            SeedContext::Query(query) => {
                let exchange = RecordedExchange {
                    message_id: spec.id.clone(),
                    query: query.clone(),
                    original_response: String::new(),
                };
                let mut result = self
                    .replay(&spec.id, &spec.seed, std::slice::from_ref(&exchange))
                    .await?;
                result.session_id = result.turns.first().and_then(|t| t.session_id.clone());
                Ok(result)
            }
        }
    }

    async fn simulate(&self, spec_id: &str, scenario: &str) -> Result<ConversationResult, EngineError> {
        let user_experiment = self
            .user_simulator
            .as_ref()
            .ok_or_else(|| EngineError::MissingUserSimulator(spec_id.to_string()))?;
        let max_exchanges = self.config.max_exchanges;
        let mut transcript = Transcript::new(spec_id);
        debug!(
            max_exchanges,
            termination = %self.termination.describe(),
            "starting simulation"
        );

        if max_exchanges == 0 {
            return Ok(transcript.finish(TerminationReason::MaxExchanges));
        }

        let user_session = match self
            .service
            .create_session(user_experiment, &self.participant, None)
            .await
        {
            Ok(session) => session,
            Err(e) => return self.abandon(transcript, "creating user-simulator session", e),
        };
        transcript.user_session_id = Some(user_session.clone());

        // The scenario is the user simulator's opening prompt; its reply is the first query.
        let mut query = match self
            .service
            .send_message(user_experiment, scenario, &user_session)
            .await
        {
            Ok(reply) => reply,
            Err(e) => return self.abandon(transcript, "seeding user simulator", e),
        };
        if self.termination.is_terminal(&query) {
            return Ok(transcript.finish(TerminationReason::Sentinel));
        }

        let session = match self
            .service
            .create_session(&self.assistant, &self.participant, None)
            .await
        {
            Ok(session) => session,
            Err(e) => return self.abandon(transcript, "creating assistant session", e),
        };
        transcript.session_id = Some(session.clone());

        loop {
            let response = match self.service.send_message(&self.assistant, &query, &session).await {
                Ok(response) => response,
                Err(e) => {
                    let cause = self.absorb(spec_id, "assistant turn", e)?;
                    transcript
                        .turns
                        .push(Turn::failed(query, &cause, Some(session)));
                    transcript.error = Some(cause);
                    return Ok(transcript.finish(TerminationReason::Error));
                }
            };

            let assistant_ended = self.termination.is_terminal(&response);
            transcript
                .turns
                .push(Turn::new(query, response.clone(), Some(session.clone())));
            debug!(turn = transcript.turns.len(), "exchange recorded");

            if assistant_ended {
                warn!(spec_id, "assistant replied with the termination token");
                return Ok(transcript.finish(TerminationReason::Sentinel));
            }
            if transcript.turns.len() >= max_exchanges {
                return Ok(transcript.finish(TerminationReason::MaxExchanges));
            }

            query = match self
                .service
                .send_message(user_experiment, &response, &user_session)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    // No next query exists; the marker turn carries the cause into the output.
                    let cause = self.absorb(spec_id, "user-simulator turn", e)?;
                    transcript
                        .turns
                        .push(Turn::failed(String::new(), &cause, Some(session)));
                    transcript.error = Some(cause);
                    return Ok(transcript.finish(TerminationReason::Error));
                }
            };
            if self.termination.is_terminal(&query) {
                return Ok(transcript.finish(TerminationReason::Sentinel));
            }
        }
    }

    /// Send each recorded query to a fresh assistant session seeded with the
    /// exchanges that preceded it.
    async fn replay(
        &self,
        spec_id: &str,
        seed: &SeedContext,
        exchanges: &[RecordedExchange],
    ) -> Result<ConversationResult, EngineError> {
        let mut transcript = Transcript::new(spec_id);

        for (index, exchange) in exchanges.iter().enumerate() {
            if index >= self.config.max_exchanges {
                debug!(skipped = exchanges.len() - index, "replay truncated");
                return Ok(transcript.finish(TerminationReason::MaxExchanges));
            }

            let history = seed.history_before(index);
            let seed_history = (!history.is_empty()).then_some(history.as_slice());

            let session = match self
                .service
                .create_session(&self.assistant, &self.participant, seed_history)
                .await
            {
                Ok(session) => session,
                Err(e) => {
                    let cause = self.absorb(spec_id, "creating replay session", e)?;
                    transcript
                        .turns
                        .push(Turn::failed(exchange.query.clone(), &cause, None));
                    transcript.error = Some(cause);
                    continue;
                }
            };

            match self
                .service
                .send_message(&self.assistant, &exchange.query, &session)
                .await
            {
                Ok(response) => {
                    transcript
                        .turns
                        .push(Turn::new(exchange.query.clone(), response, Some(session)));
                    debug!(message_id = %exchange.message_id, "exchange replayed");
                }
                Err(e) => {
                    let cause = self.absorb(spec_id, "replaying exchange", e)?;
                    transcript
                        .turns
                        .push(Turn::failed(exchange.query.clone(), &cause, Some(session)));
                    transcript.error = Some(cause);
                }
            }
        }

        Ok(transcript.finish(TerminationReason::SourceExhausted))
    }

    /// Apply the error policy: hand back the cause to record, or abort.
    fn absorb(&self, spec_id: &str, stage: &str, err: ApiError) -> Result<String, EngineError> {
        if !self.config.continue_on_error {
            return Err(EngineError::aborted(spec_id, err));
        }
        error!(
            spec_id,
            stage,
            error = %err,
            error_kind = err.error_kind(),
            "continuing after conversation error"
        );
        Ok(err.to_string())
    }

    fn abandon(
        &self,
        mut transcript: Transcript,
        stage: &str,
        err: ApiError,
    ) -> Result<ConversationResult, EngineError> {
        let cause = self.absorb(&transcript.spec_id, stage, err)?;
        transcript.error = Some(cause);
        Ok(transcript.finish(TerminationReason::Error))
    }
}
