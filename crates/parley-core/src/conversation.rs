use serde::{Deserialize, Serialize};

use crate::ids::SessionId;
use crate::messages::Message;

/// Prefix of the synthetic response recorded for a turn whose API call failed.
pub const ERROR_MARKER: &str = "ERROR: ";

/// One human/ai pair taken from a recorded transcript.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedExchange {
    pub message_id: String,
    pub query: String,
    pub original_response: String,
}

/// What starts a conversation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", content = "seed", rename_all = "snake_case")]
pub enum SeedContext {
    /// Persona/scenario text opening a bot-to-bot simulation.
    Scenario(String),
    /// Prior transcript whose human turns are replayed in order.
    Replay(Vec<RecordedExchange>),
    /// A single fixed query.
    Query(String),
}

impl SeedContext {
    /// Seed history for replaying exchange `index`: every recorded exchange
    /// before it, flattened into alternating user/assistant messages.
    pub fn history_before(&self, index: usize) -> Vec<Message> {
        match self {
            Self::Replay(exchanges) => exchanges
                .iter()
                .take(index)
                .flat_map(|ex| {
                    [
                        Message::user(ex.query.clone()),
                        Message::assistant(ex.original_response.clone()),
                    ]
                })
                .collect(),
            Self::Scenario(_) | Self::Query(_) => Vec::new(),
        }
    }

    /// Number of exchanges a replay or fixed query will produce. `None` for
    /// simulations, whose length depends on the remote agents.
    pub fn scheduled_exchanges(&self) -> Option<usize> {
        match self {
            Self::Replay(exchanges) => Some(exchanges.len()),
            Self::Query(_) => Some(1),
            Self::Scenario(_) => None,
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Scenario(_) => "simulation",
            Self::Replay(_) => "replay",
            Self::Query(_) => "query",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSpec {
    pub id: String,
    pub seed: SeedContext,
}

impl ConversationSpec {
    pub fn new(id: impl Into<String>, seed: SeedContext) -> Self {
        Self {
            id: id.into(),
            seed,
        }
    }
}

/// One recorded query/response exchange.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub query: String,
    pub response: String,
    /// Assistant-side session that answered this turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Turn {
    pub fn new(query: impl Into<String>, response: impl Into<String>, session_id: Option<SessionId>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            session_id,
        }
    }

    /// A turn whose response is replaced by an error marker embedding `cause`.
    pub fn failed(query: impl Into<String>, cause: &dyn std::fmt::Display, session_id: Option<SessionId>) -> Self {
        Self::new(query, format!("{ERROR_MARKER}{cause}"), session_id)
    }

    pub fn is_error_marker(&self) -> bool {
        self.response.starts_with(ERROR_MARKER)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxExchanges,
    Sentinel,
    SourceExhausted,
    Error,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxExchanges => f.write_str("max_exchanges"),
            Self::Sentinel => f.write_str("sentinel"),
            Self::SourceExhausted => f.write_str("source_exhausted"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Outcome of one processed `ConversationSpec`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationResult {
    pub spec_id: String,
    /// Assistant session (simulation and fixed-query modes). Replay allocates
    /// one session per turn, recorded on each `Turn` instead.
    pub session_id: Option<SessionId>,
    /// User-simulator session (simulation mode only).
    pub user_session_id: Option<SessionId>,
    pub turns: Vec<Turn>,
    pub terminated_reason: TerminationReason,
    pub error: Option<String>,
}

impl ConversationResult {
    /// Result for a conversation that failed before any turn completed.
    pub fn failed(spec_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            spec_id: spec_id.into(),
            session_id: None,
            user_session_id: None,
            turns: Vec::new(),
            terminated_reason: TerminationReason::Error,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange(id: &str, q: &str, a: &str) -> RecordedExchange {
        RecordedExchange {
            message_id: id.into(),
            query: q.into(),
            original_response: a.into(),
        }
    }

    #[test]
    fn history_before_flattens_prior_exchanges() {
        let seed = SeedContext::Replay(vec![
            exchange("m1", "hi", "hello"),
            exchange("m3", "how are you", "fine"),
            exchange("m5", "bye", "goodbye"),
        ]);
        assert!(seed.history_before(0).is_empty());
        assert_eq!(
            seed.history_before(2),
            vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("how are you"),
                Message::assistant("fine"),
            ]
        );
    }

    #[test]
    fn history_is_empty_outside_replay() {
        assert!(SeedContext::Scenario("persona".into()).history_before(3).is_empty());
        assert!(SeedContext::Query("q".into()).history_before(1).is_empty());
    }

    #[test]
    fn scheduled_exchanges_per_mode() {
        assert_eq!(SeedContext::Query("q".into()).scheduled_exchanges(), Some(1));
        assert_eq!(
            SeedContext::Replay(vec![exchange("m1", "a", "b")]).scheduled_exchanges(),
            Some(1)
        );
        assert_eq!(SeedContext::Scenario("s".into()).scheduled_exchanges(), None);
    }

    #[test]
    fn failed_turn_carries_marker() {
        let cause = "request rejected (400): nope";
        let turn = Turn::failed("q", &cause, None);
        assert!(turn.is_error_marker());
        assert_eq!(turn.response, "ERROR: request rejected (400): nope");
        assert!(!Turn::new("q", "fine", None).is_error_marker());
    }

    #[test]
    fn termination_reason_wire_names() {
        assert_eq!(TerminationReason::MaxExchanges.to_string(), "max_exchanges");
        assert_eq!(
            serde_json::to_string(&TerminationReason::SourceExhausted).unwrap(),
            "\"source_exhausted\""
        );
    }

    #[test]
    fn failed_result_shape() {
        let result = ConversationResult::failed("sim-1", "boom");
        assert!(result.turns.is_empty());
        assert_eq!(result.terminated_reason, TerminationReason::Error);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
