pub mod error;
pub mod orchestrator;
pub mod replay;
pub mod rows;
pub mod runner;
pub mod termination;

pub use error::EngineError;
pub use orchestrator::Orchestrator;
pub use replay::{group_transcripts, transcript_rows, MessageType, TranscriptRow};
pub use rows::{
    query_rows, query_specs, replay_rows, simulation_rows, simulation_specs, QueryInputRow,
    QueryRow, ReplayRow, SimulationInputRow, SimulationRow,
};
pub use runner::{RunObserver, RunStatus, SimulationRunner};
pub use termination::{ExactSentinel, TerminationPolicy};
