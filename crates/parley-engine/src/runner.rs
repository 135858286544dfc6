use std::fmt;

use tracing::{error, info, instrument};

use parley_core::conversation::{ConversationResult, ConversationSpec, SeedContext};

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

/// Progress points reported to a [`RunObserver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    PreSim,
    PostSim,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PreSim => "PRE-SIM",
            Self::PostSim => "POST-SIM",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress hook. Called around every spec; has no effect on control flow.
pub trait RunObserver: Send + Sync {
    fn on_status(&self, status: RunStatus, spec_id: &str, seed: &SeedContext);
}

impl<F> RunObserver for F
where
    F: Fn(RunStatus, &str, &SeedContext) + Send + Sync,
{
    fn on_status(&self, status: RunStatus, spec_id: &str, seed: &SeedContext) {
        self(status, spec_id, seed)
    }
}

/// Runs a batch of conversations one after another.
pub struct SimulationRunner {
    orchestrator: Orchestrator,
}

impl SimulationRunner {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Process `specs` in order. Under continue-on-error every spec yields
    /// exactly one result; under fail-fast the first error is returned and
    /// the remaining specs are skipped.
    #[instrument(skip_all, fields(specs = specs.len()))]
    pub async fn run(
        &self,
        specs: &[ConversationSpec],
        observer: Option<&dyn RunObserver>,
    ) -> Result<Vec<ConversationResult>, EngineError> {
        let continue_on_error = self.orchestrator.config().continue_on_error;
        let mut results = Vec::with_capacity(specs.len());

        for (position, spec) in specs.iter().enumerate() {
            if let Some(observer) = observer {
                observer.on_status(RunStatus::PreSim, &spec.id, &spec.seed);
            }
            info!(
                spec_id = %spec.id,
                position = position + 1,
                total = specs.len(),
                scheduled = ?spec.seed.scheduled_exchanges(),
                "starting conversation"
            );

            let result = match self.orchestrator.run(spec).await {
                Ok(result) => result,
                Err(e) if continue_on_error => {
                    error!(spec_id = %spec.id, error = %e, "conversation failed, continuing with next");
                    ConversationResult::failed(spec.id.clone(), e.to_string())
                }
                Err(e) => return Err(e),
            };
            results.push(result);

            if let Some(observer) = observer {
                observer.on_status(RunStatus::PostSim, &spec.id, &spec.seed);
            }
        }

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        info!(completed = results.len(), failed, "batch finished");
        Ok(results)
    }
}
