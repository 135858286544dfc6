use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::Level;

use parley_settings::ParleySettings;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    version,
    about = "Drive scripted, replayed and simulated conversations against Open Chat Studio experiments"
)]
pub struct Cli {
    /// Settings file (defaults to ~/.parley/settings.json)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Default log level; RUST_LOG takes precedence
    #[arg(long, global = true, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Emit logs as JSON objects
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send each input query to a fresh assistant session
    Query(RunArgs),
    /// Replay recorded transcripts against the assistant
    Replay(RunArgs),
    /// Let a user-simulating experiment talk to the assistant
    Simulate(SimulateArgs),
    /// List experiments visible to the configured key
    Experiments {
        /// Fetch a single experiment instead of listing all
        #[arg(long)]
        id: Option<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List stored sessions
    Sessions {
        /// Sort field, prefixed with `-` for descending (e.g. -created_at)
        #[arg(long, allow_hyphen_values = true)]
        ordering: Option<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Export stored sessions as transcript rows accepted by `replay`
    Transcripts {
        #[arg(required = true, num_args = 1..)]
        session_ids: Vec<String>,

        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

impl Command {
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Replay(_) => "replay",
            Self::Simulate(_) => "simulate",
            Self::Experiments { .. } => "experiments",
            Self::Sessions { .. } => "sessions",
            Self::Transcripts { .. } => "transcripts",
        }
    }

    /// Layer command-line flags over file and environment settings.
    pub fn apply_to(&self, settings: &mut ParleySettings) {
        match self {
            Self::Query(args) | Self::Replay(args) => args.apply_to(settings),
            Self::Simulate(args) => args.apply_to(settings),
            Self::Experiments { .. } | Self::Sessions { .. } | Self::Transcripts { .. } => {}
        }
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Input rows (JSON Lines)
    #[arg(long, short)]
    pub input: PathBuf,

    /// Output rows (JSON Lines); stdout when omitted
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Assistant experiment under test
    #[arg(long)]
    pub experiment_id: Option<String>,

    #[arg(long)]
    pub participant_id: Option<String>,

    #[arg(long)]
    pub base_url: Option<String>,

    /// Abort the whole run on the first conversation failure
    #[arg(long, conflicts_with = "continue_on_error")]
    pub fail_fast: bool,

    /// Record failures in the output and keep going
    #[arg(long)]
    pub continue_on_error: bool,

    /// Dataset name used when exporting
    #[arg(long)]
    pub dataset_name: Option<String>,

    /// Skip dataset export even when configured
    #[arg(long)]
    pub no_export: bool,
}

#[derive(Debug, Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Experiment that plays the user
    #[arg(long)]
    pub user_experiment_id: Option<String>,

    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max_exchanges: Option<u64>,

    /// Reply that ends a simulated conversation
    #[arg(long, value_parser = parse_sentinel)]
    pub sentinel: Option<String>,
}

fn parse_sentinel(value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        Err("sentinel must not be blank".to_string())
    } else {
        Ok(value.to_string())
    }
}

impl RunArgs {
    pub fn apply_to(&self, settings: &mut ParleySettings) {
        if let Some(id) = &self.experiment_id {
            settings.experiments.experiment_id = Some(id.clone());
        }
        if let Some(id) = &self.participant_id {
            settings.experiments.participant_id = Some(id.clone());
        }
        if let Some(url) = &self.base_url {
            settings.api.base_url = url.clone();
        }
        if self.fail_fast {
            settings.run.continue_on_error = false;
        }
        if self.continue_on_error {
            settings.run.continue_on_error = true;
        }
    }
}

impl SimulateArgs {
    pub fn apply_to(&self, settings: &mut ParleySettings) {
        self.run.apply_to(settings);
        if let Some(id) = &self.user_experiment_id {
            settings.experiments.user_experiment_id = Some(id.clone());
        }
        if let Some(max) = self.max_exchanges {
            settings.run.max_exchanges = max as usize;
        }
        if let Some(sentinel) = &self.sentinel {
            settings.run.sentinel = sentinel.clone();
        }
    }
}
