use parley_core::errors::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Fail-fast policy hit a terminal API failure; the batch stops here.
    #[error("run aborted on {spec_id}: {source}")]
    RunAborted {
        spec_id: String,
        #[source]
        source: ApiError,
    },

    #[error("simulation {0} needs a user-simulator experiment")]
    MissingUserSimulator(String),
}

impl EngineError {
    pub fn aborted(spec_id: impl Into<String>, source: ApiError) -> Self {
        Self::RunAborted {
            spec_id: spec_id.into(),
            source,
        }
    }

    /// The API failure behind an abort, if any.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::RunAborted { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_names_spec_and_cause() {
        let err = EngineError::aborted("sim-3", ApiError::Unauthorized("bad key".into()));
        assert_eq!(err.to_string(), "run aborted on sim-3: authorization failed: bad key");
        assert!(matches!(err.api_error(), Some(ApiError::Unauthorized(_))));
        assert!(EngineError::MissingUserSimulator("sim-3".into())
            .api_error()
            .is_none());
    }
}
