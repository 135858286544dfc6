use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use parley_client::{OcsClient, ReliableService};
use parley_core::errors::ApiError;
use parley_core::ids::{ExperimentId, ParticipantId, SessionId};
use parley_core::service::{ChatService, ExperimentSummary, Page, SessionSummary};
use parley_core::{ConversationResult, ConversationSpec, SeedContext};
use parley_engine::{
    group_transcripts, query_rows, query_specs, replay_rows, simulation_rows, simulation_specs,
    transcript_rows, ExactSentinel, Orchestrator, QueryInputRow, QueryRow, ReplayRow, RunStatus,
    SimulationInputRow, SimulationRow, SimulationRunner, TranscriptRow,
};
use parley_settings::ParleySettings;

use crate::cli::{Command, RunArgs};
use crate::export::DatasetExporter;
use crate::io;

/// Upper bound on pages fetched by one listing.
const MAX_LISTING_PAGES: usize = 1000;

pub async fn dispatch(
    command: Command,
    settings: ParleySettings,
    service: Arc<dyn ChatService>,
) -> Result<()> {
    let mode = command.mode();
    match command {
        Command::Query(args) => {
            let inputs: Vec<QueryInputRow> = io::read_rows(&args.input)
                .with_context(|| format!("failed to read queries: {}", args.input.display()))?;
            let rows = run_query(service, &settings, &inputs).await?;
            finish(mode, &args, &settings, &rows).await
        }
        Command::Replay(args) => {
            let transcripts: Vec<TranscriptRow> = io::read_rows(&args.input).with_context(|| {
                format!("failed to read transcripts: {}", args.input.display())
            })?;
            let rows = run_replay(service, &settings, &transcripts).await?;
            finish(mode, &args, &settings, &rows).await
        }
        Command::Simulate(args) => {
            let inputs: Vec<SimulationInputRow> = io::read_rows(&args.run.input)
                .with_context(|| {
                    format!("failed to read scenarios: {}", args.run.input.display())
                })?;
            let rows = run_simulate(service, &settings, &inputs).await?;
            finish(mode, &args.run, &settings, &rows).await
        }
        Command::Experiments { id: Some(id), output } => {
            let experiment = service
                .retrieve_experiment(&ExperimentId::from_raw(id.as_str()))
                .await
                .with_context(|| format!("failed to fetch experiment {id}"))?;
            io::write_output(output.as_deref(), &[experiment])
                .context("failed to write experiment")
        }
        Command::Experiments { id: None, output } => {
            let experiments = list_all_experiments(service.as_ref()).await?;
            io::write_output(output.as_deref(), &experiments)
                .context("failed to write experiment list")
        }
        Command::Sessions { ordering, output } => {
            let sessions = list_all_sessions(service.as_ref(), ordering.as_deref()).await?;
            io::write_output(output.as_deref(), &sessions)
                .context("failed to write session list")
        }
        Command::Transcripts {
            session_ids,
            output,
        } => {
            let rows = export_transcripts(service.as_ref(), &session_ids).await?;
            io::write_output(output.as_deref(), &rows).context("failed to write transcripts")
        }
    }
}

pub async fn run_query(
    service: Arc<dyn ChatService>,
    settings: &ParleySettings,
    inputs: &[QueryInputRow],
) -> Result<Vec<QueryRow>> {
    let specs = query_specs(inputs);
    let results = run_specs(build_orchestrator(service, settings, false)?, &specs).await?;
    Ok(query_rows(inputs, &results))
}

pub async fn run_replay(
    service: Arc<dyn ChatService>,
    settings: &ParleySettings,
    transcripts: &[TranscriptRow],
) -> Result<Vec<ReplayRow>> {
    let specs = group_transcripts(transcripts);
    if specs.is_empty() && !transcripts.is_empty() {
        warn!(rows = transcripts.len(), "no human/ai exchanges found in transcripts");
    }
    let results = run_specs(build_orchestrator(service, settings, false)?, &specs).await?;
    replay_rows(&specs, &results).context("failed to encode replay context")
}

pub async fn run_simulate(
    service: Arc<dyn ChatService>,
    settings: &ParleySettings,
    inputs: &[SimulationInputRow],
) -> Result<Vec<SimulationRow>> {
    let specs = simulation_specs(inputs);
    let results = run_specs(build_orchestrator(service, settings, true)?, &specs).await?;
    Ok(simulation_rows(&specs, &results))
}

fn build_orchestrator(
    service: Arc<dyn ChatService>,
    settings: &ParleySettings,
    simulate: bool,
) -> Result<Orchestrator> {
    let ids = &settings.experiments;
    let Some(assistant) = non_blank(&ids.experiment_id) else {
        bail!("no assistant experiment configured (--experiment-id or PARLEY_EXPERIMENT_ID)");
    };
    let Some(participant) = non_blank(&ids.participant_id) else {
        bail!("no participant configured (--participant-id or PARLEY_PARTICIPANT_ID)");
    };
    let config = settings.run_config().context("invalid run settings")?;

    let mut orchestrator = Orchestrator::new(
        service,
        ExperimentId::from_raw(assistant),
        ParticipantId::from_raw(participant),
        config,
    )
    .with_termination(Arc::new(ExactSentinel::new(settings.run.sentinel.clone())));

    if simulate {
        let Some(user) = non_blank(&ids.user_experiment_id) else {
            bail!("simulation needs a user experiment (--user-experiment-id or PARLEY_USER_EXPERIMENT_ID)");
        };
        orchestrator = orchestrator.with_user_simulator(ExperimentId::from_raw(user));
    }
    Ok(orchestrator)
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

async fn run_specs(
    orchestrator: Orchestrator,
    specs: &[ConversationSpec],
) -> Result<Vec<ConversationResult>> {
    let total = specs.len();
    let progress = move |status: RunStatus, spec_id: &str, seed: &SeedContext| {
        info!(%status, spec_id, mode = seed.mode_name(), total, "progress");
    };
    let runner = SimulationRunner::new(orchestrator);
    let results = match runner.run(specs, Some(&progress)).await {
        Ok(results) => results,
        Err(e) => {
            if let Some(cause) = e.api_error() {
                warn!(error_kind = cause.error_kind(), "stopping on first failure");
            }
            return Err(e).context("run aborted");
        }
    };

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
        warn!(failed, total, "some conversations ended with errors");
    }
    Ok(results)
}

async fn finish<T: Serialize>(
    mode: &str,
    args: &RunArgs,
    settings: &ParleySettings,
    rows: &[T],
) -> Result<()> {
    io::write_output(args.output.as_deref(), rows).with_context(|| match &args.output {
        Some(path) => format!("failed to write results: {}", path.display()),
        None => "failed to write results to stdout".to_string(),
    })?;
    if let Some(path) = &args.output {
        info!(rows = rows.len(), path = %path.display(), "results written");
    }

    if !args.no_export {
        export_rows(mode, args.dataset_name.as_deref(), settings, rows).await;
    }
    Ok(())
}

/// Upload failures never fail the run; the rows are already on disk.
async fn export_rows<T: Serialize>(
    mode: &str,
    name: Option<&str>,
    settings: &ParleySettings,
    rows: &[T],
) {
    let exporter = match DatasetExporter::from_settings(&settings.dataset) {
        Ok(Some(exporter)) => exporter,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "dataset export unavailable");
            eprintln!("dataset export skipped: {e}");
            return;
        }
    };
    let name = name
        .map(str::to_string)
        .unwrap_or_else(|| DatasetExporter::default_name(mode));
    if let Err(e) = exporter.export(&name, rows).await {
        warn!(error = %e, dataset = %name, "dataset export failed");
        eprintln!("dataset export failed: {e}");
    }
}

/// Follow `next` cursors until the listing ends, a cursor repeats, or the
/// page cap is hit.
async fn collect_pages<T, F, Fut>(listing: &'static str, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>, ApiError>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LISTING_PAGES {
        let page = fetch(cursor.clone())
            .await
            .with_context(|| format!("failed to list {listing}"))?;
        let next = page.next_cursor();
        items.extend(page.results);
        match next {
            Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
            _ => return Ok(items),
        }
    }
    warn!(listing, pages = MAX_LISTING_PAGES, "listing truncated");
    Ok(items)
}

pub async fn list_all_experiments(service: &dyn ChatService) -> Result<Vec<ExperimentSummary>> {
    collect_pages("experiments", |cursor| async move {
        service.list_experiments(cursor.as_deref()).await
    })
    .await
}

pub async fn list_all_sessions(
    service: &dyn ChatService,
    ordering: Option<&str>,
) -> Result<Vec<SessionSummary>> {
    collect_pages("sessions", |cursor| async move {
        service.list_sessions(cursor.as_deref(), ordering).await
    })
    .await
}

/// Fetch stored sessions and flatten them into replayable transcript rows.
pub async fn export_transcripts(
    service: &dyn ChatService,
    session_ids: &[String],
) -> Result<Vec<TranscriptRow>> {
    let mut rows = Vec::new();
    for id in session_ids {
        let session = service
            .retrieve_session(&SessionId::from_raw(id.as_str()))
            .await
            .with_context(|| format!("failed to fetch session {id}"))?;
        let exported = transcript_rows(&session);
        info!(session_id = %id, rows = exported.len(), "session exported");
        rows.extend(exported);
    }
    Ok(rows)
}

/// Refuse to start without credentials rather than failing every request.
pub fn connect(settings: &ParleySettings) -> Result<Arc<ReliableService<OcsClient>>> {
    let config = settings.client_config().context("invalid API settings")?;
    if config.api_key.is_empty() {
        bail!("no API key configured (set api.apiKey in settings or PARLEY_API_KEY)");
    }
    let client = parley_client::connect(&config).context("failed to build API client")?;
    Ok(Arc::new(client))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_client::{MockCall, MockReply, MockService};
    use parley_core::service::SessionDetail;

    fn settings() -> ParleySettings {
        let mut settings = ParleySettings::default();
        settings.experiments.experiment_id = Some("bot".into());
        settings.experiments.user_experiment_id = Some("user".into());
        settings.experiments.participant_id = Some("eval@example.com".into());
        settings.run.continue_on_error = true;
        settings
    }

    fn bot() -> ExperimentId {
        ExperimentId::from_raw("bot")
    }

    fn user() -> ExperimentId {
        ExperimentId::from_raw("user")
    }

    fn query(text: &str) -> QueryInputRow {
        QueryInputRow {
            query: text.into(),
            query_id: None,
            expected_response: None,
        }
    }

    #[tokio::test]
    async fn query_run_one_row_per_input() {
        let mock = Arc::new(MockService::new().with_replies(
            &bot(),
            vec![
                MockReply::text("r1"),
                MockReply::text("r2"),
                MockReply::text("r3"),
            ],
        ));
        let inputs = vec![query("a"), query("b"), query("c")];

        let rows = run_query(mock.clone(), &settings(), &inputs).await.unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].query_id, "0");
        assert_eq!(rows[2].response, "r3");
        assert!(rows.iter().all(|r| !r.session_id.is_empty()));
        assert!(rows.iter().all(|r| r.expected_response.is_none()));
        assert_eq!(mock.session_count(), 3);
    }

    #[tokio::test]
    async fn query_failure_recorded_and_run_continues() {
        let mock = Arc::new(MockService::new().with_replies(
            &bot(),
            vec![
                MockReply::Error(ApiError::Unauthorized("bad key".into())),
                MockReply::text("ok"),
            ],
        ));
        let inputs = vec![query("a"), query("b")];

        let rows = run_query(mock, &settings(), &inputs).await.unwrap();

        assert!(rows[0].response.starts_with("ERROR: "));
        assert_eq!(rows[1].response, "ok");
    }

    #[tokio::test]
    async fn fail_fast_aborts_query_run() {
        let mock = Arc::new(MockService::new().with_replies(
            &bot(),
            vec![MockReply::Error(ApiError::Unauthorized("bad key".into()))],
        ));
        let mut settings = settings();
        settings.run.continue_on_error = false;

        let err = run_query(mock.clone(), &settings, &[query("a"), query("b")])
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("aborted"));
        assert_eq!(mock.send_count(), 1);
    }

    #[tokio::test]
    async fn simulation_until_sentinel() {
        let mock = Arc::new(
            MockService::new()
                .with_replies(
                    &user(),
                    vec![MockReply::text("hello"), MockReply::text("thanks")],
                )
                .with_replies(&bot(), vec![MockReply::text("hi"), MockReply::text("END")]),
        );
        let inputs = vec![SimulationInputRow {
            context: "You want a refund.".into(),
            simulation_id: Some("s1".into()),
        }];

        let rows = run_simulate(mock.clone(), &settings(), &inputs).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].query, "hello");
        assert_eq!(rows[1].response, "END");
        assert!(rows.iter().all(|r| r.simulation_id == "s1"));
        assert_eq!(mock.sent_to(&user())[0], "You want a refund.");
    }

    #[tokio::test]
    async fn simulation_honours_custom_sentinel() {
        let mock = Arc::new(
            MockService::new()
                .with_replies(&user(), vec![MockReply::text("q1"), MockReply::text("q2")])
                .with_replies(&bot(), vec![MockReply::text("DONE")]),
        );
        let mut settings = settings();
        settings.run.sentinel = "DONE".into();
        let inputs = vec![SimulationInputRow {
            context: "ctx".into(),
            simulation_id: None,
        }];

        let rows = run_simulate(mock.clone(), &settings, &inputs).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(mock.sent_to(&user()).len(), 1);
    }

    #[tokio::test]
    async fn simulate_requires_user_experiment() {
        let mock = Arc::new(MockService::new());
        let mut settings = settings();
        settings.experiments.user_experiment_id = None;

        let err = run_simulate(mock, &settings, &[]).await.unwrap_err();
        assert!(err.to_string().contains("user experiment"));
    }

    #[tokio::test]
    async fn missing_participant_is_rejected() {
        let mock = Arc::new(MockService::new());
        let mut settings = settings();
        settings.experiments.participant_id = Some("  ".into());

        let err = run_query(mock, &settings, &[query("a")]).await.unwrap_err();
        assert!(err.to_string().contains("participant"));
    }

    #[tokio::test]
    async fn replay_sends_recorded_queries() {
        let row = |id: u32, kind: &str, content: &str| -> TranscriptRow {
            serde_json::from_value(serde_json::json!({
                "Message ID": id,
                "Message Type": kind,
                "Message Content": content,
                "Session ID": "orig",
            }))
            .unwrap()
        };
        let transcripts = vec![
            row(1, "human", "hi"),
            row(2, "ai", "hello"),
            row(3, "human", "price?"),
            row(4, "ai", "$5"),
        ];
        let mock = Arc::new(
            MockService::new().with_replies(&bot(), vec![MockReply::text("hey"), MockReply::text("$6")]),
        );

        let rows = run_replay(mock.clone(), &settings(), &transcripts)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].query, "price?");
        assert_eq!(rows[1].orig_response, "$5");
        assert_eq!(rows[1].response, "$6");
        assert_eq!(rows[1].session_id, "orig");
        let seeded = mock
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::CreateSession { seed_history, .. } => Some(seed_history.len()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(seeded, vec![0, 2]);
    }

    #[tokio::test]
    async fn lists_experiments() {
        let mock = MockService::new().with_experiments(vec![ExperimentSummary {
            id: ExperimentId::from_raw("e1"),
            name: "Support bot".into(),
            url: None,
        }]);
        let experiments = list_all_experiments(&mock).await.unwrap();
        assert_eq!(experiments.len(), 1);
        assert_eq!(experiments[0].name, "Support bot");
    }

    #[test]
    fn connect_requires_api_key() {
        let err = connect(&ParleySettings::default()).err().unwrap();
        assert!(err.to_string().contains("API key"));
    }

    fn stored(id: &str, messages: Vec<parley_core::Message>) -> SessionDetail {
        SessionDetail {
            summary: SessionSummary {
                id: SessionId::from_raw(id),
                experiment: None,
                participant: None,
                created_at: None,
                updated_at: None,
            },
            messages,
        }
    }

    #[tokio::test]
    async fn lists_sessions_with_ordering() {
        let mock = MockService::new().with_sessions(vec![stored("s1", vec![]), stored("s2", vec![])]);

        let sessions = list_all_sessions(&mock, Some("-created_at")).await.unwrap();

        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2"]);
        assert_eq!(
            mock.calls(),
            vec![MockCall::ListSessions {
                cursor: None,
                ordering: Some("-created_at".into()),
            }]
        );
    }

    #[tokio::test]
    async fn pager_follows_cursor_and_stops_on_repeat() {
        let mut pages = vec![
            Page {
                results: vec![3],
                next: Some("https://x/api/sessions/?cursor=c2".into()),
            },
            Page {
                results: vec![2],
                next: Some("https://x/api/sessions/?cursor=c2".into()),
            },
            Page {
                results: vec![1],
                next: Some("https://x/api/sessions/?cursor=c%3D1".into()),
            },
        ];
        let mut seen = Vec::new();

        let items = collect_pages("numbers", |cursor| {
            seen.push(cursor);
            let page = pages.pop();
            async move { page.ok_or(ApiError::RateLimited) }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(seen, vec![None, Some("c=1".to_string()), Some("c2".to_string())]);
    }

    #[tokio::test]
    async fn listing_failure_names_listing() {
        let err = collect_pages::<u32, _, _>("sessions", |_| async {
            Err(ApiError::Unauthorized("bad key".into()))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to list sessions"));
    }

    #[tokio::test]
    async fn exported_transcripts_replay() {
        use parley_core::Message;
        let source = MockService::new().with_sessions(vec![
            stored("s1", vec![Message::user("hi"), Message::assistant("hello")]),
            stored("s2", vec![Message::user("price?"), Message::assistant("$5")]),
        ]);

        let rows = export_transcripts(&source, &["s1".into(), "s2".into()]).await.unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2].session_id, "s2");

        let target = Arc::new(
            MockService::new().with_replies(&bot(), vec![MockReply::text("hey"), MockReply::text("$6")]),
        );
        let replayed = run_replay(target, &settings(), &rows).await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[1].orig_response, "$5");
        assert_eq!(replayed[1].response, "$6");
    }

    #[tokio::test]
    async fn unknown_session_fails_export() {
        let err = export_transcripts(&MockService::new(), &["gone".into()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gone"));
    }

    #[tokio::test]
    async fn zero_exchange_cap_rejected_before_running() {
        let mock = Arc::new(MockService::new());
        let mut settings = settings();
        settings.run.max_exchanges = 0;

        let err = run_simulate(mock.clone(), &settings, &[]).await.unwrap_err();
        assert!(err.to_string().contains("invalid run settings"));
        assert!(mock.calls().is_empty());
    }
}
