//! Shared vocabulary for parley: ids, messages, the conversation data model,
//! the API error taxonomy and the `ChatService` seam.

pub mod config;
pub mod conversation;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod security;
pub mod service;

pub use config::{ClientConfig, RunConfig};
pub use conversation::{
    ConversationResult, ConversationSpec, RecordedExchange, SeedContext, TerminationReason, Turn,
};
pub use errors::{ApiError, FailureKind};
pub use ids::{ExperimentId, ParticipantId, SessionId};
pub use messages::{Message, Role};
pub use security::ApiKey;
pub use service::{
    ChatService, ExperimentPage, ExperimentSummary, Page, ParticipantSummary, SessionDetail,
    SessionPage, SessionSummary,
};
