use serde::{Deserialize, Serialize};
use tracing::debug;

use parley_core::conversation::{ConversationSpec, RecordedExchange, SeedContext};
use parley_core::messages::Role;
use parley_core::service::SessionDetail;

use crate::rows::string_or_number;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[serde(alias = "Human")]
    Human,
    #[serde(alias = "AI", alias = "Ai")]
    Ai,
}

/// One message of a recorded transcript export.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranscriptRow {
    #[serde(rename = "Message ID", deserialize_with = "string_or_number")]
    pub message_id: String,
    #[serde(rename = "Message Type")]
    pub message_type: MessageType,
    #[serde(rename = "Message Content")]
    pub content: String,
    #[serde(rename = "Session ID", deserialize_with = "string_or_number")]
    pub session_id: String,
}

/// Group transcript rows into replay specs, one per contiguous run of equal
/// `Session ID`s.
///
/// Within a group each human message immediately followed by an ai message
/// forms one exchange. A human message without an ai reply and an ai message
/// without a preceding human message are skipped. Groups with no exchanges
/// produce no spec.
pub fn group_transcripts(rows: &[TranscriptRow]) -> Vec<ConversationSpec> {
    let mut specs = Vec::new();
    let mut start = 0;

    while start < rows.len() {
        let session_id = &rows[start].session_id;
        let end = rows[start..]
            .iter()
            .position(|row| &row.session_id != session_id)
            .map_or(rows.len(), |offset| start + offset);

        let exchanges = pair_exchanges(&rows[start..end]);
        if exchanges.is_empty() {
            debug!(session_id = %session_id, rows = end - start, "no human/ai pairs in session");
        } else {
            specs.push(ConversationSpec::new(
                session_id.clone(),
                SeedContext::Replay(exchanges),
            ));
        }
        start = end;
    }

    specs
}

/// Flatten a stored session into transcript rows ready for [`group_transcripts`].
///
/// Message IDs are 1-based positions in the stored history. System messages
/// are dropped.
pub fn transcript_rows(session: &SessionDetail) -> Vec<TranscriptRow> {
    let session_id = session.summary.id.to_string();
    session
        .messages
        .iter()
        .enumerate()
        .filter_map(|(index, message)| {
            let message_type = match message.role {
                Role::User => MessageType::Human,
                Role::Assistant => MessageType::Ai,
                Role::System => return None,
            };
            Some(TranscriptRow {
                message_id: (index + 1).to_string(),
                message_type,
                content: message.content.clone(),
                session_id: session_id.clone(),
            })
        })
        .collect()
}

fn pair_exchanges(group: &[TranscriptRow]) -> Vec<RecordedExchange> {
    let mut exchanges = Vec::new();
    let mut pending: Option<&TranscriptRow> = None;

    for row in group {
        match row.message_type {
            MessageType::Human => {
                if let Some(unanswered) = pending.replace(row) {
                    debug!(message_id = %unanswered.message_id, "human message without reply skipped");
                }
            }
            MessageType::Ai => match pending.take() {
                Some(human) => exchanges.push(RecordedExchange {
                    message_id: human.message_id.clone(),
                    query: human.content.clone(),
                    original_response: row.content.clone(),
                }),
                None => debug!(message_id = %row.message_id, "ai message without query skipped"),
            },
        }
    }

    if let Some(unanswered) = pending {
        debug!(message_id = %unanswered.message_id, "trailing human message skipped");
    }
    exchanges
}
