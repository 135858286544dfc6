//! Tabular shapes consumed and produced around a run, and the flattening of
//! conversation results into output rows.

use serde::{Deserialize, Deserializer, Serialize};

use parley_core::conversation::{ConversationResult, ConversationSpec, SeedContext, ERROR_MARKER};
use parley_core::ids::SessionId;

/// Accept a JSON string or number as a string id.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
    })
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "string_or_number")] String);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(s)| s))
}

fn session_str(session: Option<&SessionId>) -> String {
    session.map(|s| s.as_str().to_string()).unwrap_or_default()
}

// --- Inputs ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryInputRow {
    pub query: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub query_id: Option<String>,
    #[serde(default)]
    pub expected_response: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationInputRow {
    pub context: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub simulation_id: Option<String>,
}

/// Fixed-query specs; ids default to the 0-based row index.
pub fn query_specs(rows: &[QueryInputRow]) -> Vec<ConversationSpec> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let id = row.query_id.clone().unwrap_or_else(|| index.to_string());
            ConversationSpec::new(id, SeedContext::Query(row.query.clone()))
        })
        .collect()
}

/// Simulation specs; ids default to the 0-based row index.
pub fn simulation_specs(rows: &[SimulationInputRow]) -> Vec<ConversationSpec> {
    rows.iter()
        .enumerate()
        .map(|(index, row)| {
            let id = row.simulation_id.clone().unwrap_or_else(|| index.to_string());
            ConversationSpec::new(id, SeedContext::Scenario(row.context.clone()))
        })
        .collect()
}

// --- Outputs ---

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRow {
    pub query_id: String,
    pub session_id: String,
    pub query: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_response: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplayRow {
    pub message_id: String,
    pub session_id: String,
    pub replay_session_id: String,
    pub query: String,
    pub response: String,
    pub orig_response: String,
    /// JSON-serialized history the replay session was seeded with.
    pub context: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationRow {
    pub simulation_id: String,
    pub session_id: String,
    pub context: String,
    pub query: String,
    pub response: String,
}

/// One row per input query, in input order. `expected_response` is passed
/// through unchanged.
pub fn query_rows(inputs: &[QueryInputRow], results: &[ConversationResult]) -> Vec<QueryRow> {
    inputs
        .iter()
        .zip(results)
        .map(|(input, result)| {
            let response = match result.turns.first() {
                Some(turn) => turn.response.clone(),
                None => format!("{ERROR_MARKER}{}", result.error.as_deref().unwrap_or("no response")),
            };
            QueryRow {
                query_id: result.spec_id.clone(),
                session_id: session_str(result.session_id.as_ref()),
                query: input.query.clone(),
                response,
                expected_response: input.expected_response.clone(),
            }
        })
        .collect()
}

/// One row per replayed turn. Fails only if a seed history cannot be encoded
/// for the `context` column.
pub fn replay_rows(
    specs: &[ConversationSpec],
    results: &[ConversationResult],
) -> Result<Vec<ReplayRow>, serde_json::Error> {
    let mut rows = Vec::new();
    for (spec, result) in specs.iter().zip(results) {
        let SeedContext::Replay(exchanges) = &spec.seed else {
            continue;
        };
        for (index, (turn, exchange)) in result.turns.iter().zip(exchanges).enumerate() {
            let context = serde_json::to_string(&spec.seed.history_before(index))?;
            rows.push(ReplayRow {
                message_id: exchange.message_id.clone(),
                session_id: spec.id.clone(),
                replay_session_id: session_str(turn.session_id.as_ref()),
                query: turn.query.clone(),
                response: turn.response.clone(),
                orig_response: exchange.original_response.clone(),
                context,
            });
        }
    }
    Ok(rows)
}

/// One row per simulated turn. A failure the transcript does not already
/// show as a marker turn adds a trailing row carrying the error marker, so a
/// simulation that failed before its first turn still yields one row.
pub fn simulation_rows(specs: &[ConversationSpec], results: &[ConversationResult]) -> Vec<SimulationRow> {
    let mut rows = Vec::new();
    for (spec, result) in specs.iter().zip(results) {
        let context = match &spec.seed {
            SeedContext::Scenario(context) => context.clone(),
            _ => continue,
        };
        let session_id = session_str(result.session_id.as_ref());

        rows.extend(result.turns.iter().map(|turn| SimulationRow {
            simulation_id: result.spec_id.clone(),
            session_id: session_id.clone(),
            context: context.clone(),
            query: turn.query.clone(),
            response: turn.response.clone(),
        }));

        let shown = result.turns.last().is_some_and(|turn| turn.is_error_marker());
        if let Some(error) = result.error.as_deref().filter(|_| !shown) {
            rows.push(SimulationRow {
                simulation_id: result.spec_id.clone(),
                session_id,
                context,
                query: String::new(),
                response: format!("{ERROR_MARKER}{error}"),
            });
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::conversation::{RecordedExchange, TerminationReason, Turn};

    fn result(spec_id: &str, session: Option<&str>, turns: Vec<Turn>) -> ConversationResult {
        ConversationResult {
            spec_id: spec_id.into(),
            session_id: session.map(SessionId::from_raw),
            user_session_id: None,
            turns,
            terminated_reason: TerminationReason::SourceExhausted,
            error: None,
        }
    }

    #[test]
    fn query_ids_default_to_row_index() {
        let rows: Vec<QueryInputRow> = [
            r#"{"query": "a"}"#,
            r#"{"query": "b", "query_id": 99}"#,
            r#"{"query": "c", "query_id": "custom"}"#,
        ]
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

        let ids: Vec<_> = query_specs(&rows).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["0", "99", "custom"]);
    }

    #[test]
    fn simulation_ids_default_to_row_index() {
        let rows = vec![
            SimulationInputRow {
                context: "x".into(),
                simulation_id: None,
            },
            SimulationInputRow {
                context: "y".into(),
                simulation_id: None,
            },
        ];
        let specs = simulation_specs(&rows);
        assert_eq!(specs[1].id, "1");
        assert_eq!(specs[1].seed, SeedContext::Scenario("y".into()));
    }

    #[test]
    fn query_rows_omit_missing_expected_response() {
        let inputs: Vec<QueryInputRow> = (0..3)
            .map(|i| QueryInputRow {
                query: format!("q{i}"),
                query_id: None,
                expected_response: None,
            })
            .collect();
        let results: Vec<_> = (0..3)
            .map(|i| {
                let session = format!("sess-{i}");
                result(
                    &i.to_string(),
                    Some(session.as_str()),
                    vec![Turn::new(format!("q{i}"), format!("r{i}"), Some(SessionId::from_raw(session.as_str())))],
                )
            })
            .collect();

        let rows = query_rows(&inputs, &results);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert!(!row.session_id.is_empty());
            let json = serde_json::to_value(row).unwrap();
            let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
            assert_eq!(keys.len(), 4);
            assert!(!keys.contains(&"expected_response".to_string()));
        }
    }

    #[test]
    fn query_rows_pass_expected_response_through() {
        let inputs = vec![QueryInputRow {
            query: "q".into(),
            query_id: Some("7".into()),
            expected_response: Some("  exact  ".into()),
        }];
        let results = vec![result("7", Some("s"), vec![Turn::new("q", "r", None)])];
        let rows = query_rows(&inputs, &results);
        assert_eq!(rows[0].expected_response.as_deref(), Some("  exact  "));
        assert_eq!(rows[0].query_id, "7");
    }

    #[test]
    fn replay_rows_carry_original_response_and_context() {
        let spec = ConversationSpec::new(
            "orig",
            SeedContext::Replay(vec![
                RecordedExchange {
                    message_id: "m1".into(),
                    query: "hi".into(),
                    original_response: "hello".into(),
                },
                RecordedExchange {
                    message_id: "m3".into(),
                    query: "bye".into(),
                    original_response: "ciao".into(),
                },
            ]),
        );
        let res = result(
            "orig",
            None,
            vec![
                Turn::new("hi", "hey there", Some(SessionId::from_raw("r1"))),
                Turn::new("bye", "see you", Some(SessionId::from_raw("r2"))),
            ],
        );

        let rows = replay_rows(&[spec], &[res]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].context, "[]");
        assert_eq!(rows[1].message_id, "m3");
        assert_eq!(rows[1].session_id, "orig");
        assert_eq!(rows[1].replay_session_id, "r2");
        assert_eq!(rows[1].orig_response, "ciao");
        let history: serde_json::Value = serde_json::from_str(&rows[1].context).unwrap();
        assert_eq!(
            history,
            serde_json::json!([
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ])
        );
    }

    #[test]
    fn simulation_rows_one_per_turn() {
        let spec = ConversationSpec::new("sim", SeedContext::Scenario("persona".into()));
        let res = result(
            "sim",
            Some("asst"),
            vec![Turn::new("q1", "r1", None), Turn::new("q2", "r2", None)],
        );
        let rows = simulation_rows(&[spec], &[res]);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.context == "persona" && r.session_id == "asst"));
        assert_eq!(rows[1].query, "q2");
    }

    #[test]
    fn failed_simulation_still_reported() {
        let spec = ConversationSpec::new("sim", SeedContext::Scenario("persona".into()));
        let res = ConversationResult::failed("sim", "remote unavailable");
        let rows = simulation_rows(&[spec], &[res]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].response, "ERROR: remote unavailable");
    }

    #[test]
    fn mid_simulation_error_after_plain_turns_gets_trailing_row() {
        let spec = ConversationSpec::new("sim", SeedContext::Scenario("persona".into()));
        let mut res = result("sim", Some("asst"), vec![Turn::new("q1", "a1", None)]);
        res.terminated_reason = TerminationReason::Error;
        res.error = Some("request rejected (400): boom".into());

        let rows = simulation_rows(&[spec], &[res]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].response, "a1");
        assert_eq!(rows[1].query, "");
        assert_eq!(rows[1].response, "ERROR: request rejected (400): boom");
        assert_eq!(rows[1].session_id, "asst");
    }

    #[test]
    fn marker_turn_is_not_reported_twice() {
        let spec = ConversationSpec::new("sim", SeedContext::Scenario("persona".into()));
        let mut res = result(
            "sim",
            Some("asst"),
            vec![
                Turn::new("q1", "a1", None),
                Turn::failed("", &"request rejected (400): boom", None),
            ],
        );
        res.error = Some("request rejected (400): boom".into());

        let rows = simulation_rows(&[spec], &[res]);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].response.contains("boom"));
    }
}
