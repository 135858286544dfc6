use parley_core::config::DEFAULT_SENTINEL;

/// Decides whether a reply ends the conversation instead of continuing it.
pub trait TerminationPolicy: Send + Sync {
    fn is_terminal(&self, reply: &str) -> bool;

    fn describe(&self) -> String;
}

/// Ends on a reply that is exactly the sentinel token. Case-sensitive, no
/// trimming.
#[derive(Clone, Debug)]
pub struct ExactSentinel {
    token: String,
}

impl ExactSentinel {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl Default for ExactSentinel {
    fn default() -> Self {
        Self::new(DEFAULT_SENTINEL)
    }
}

impl TerminationPolicy for ExactSentinel {
    fn is_terminal(&self, reply: &str) -> bool {
        reply == self.token
    }

    fn describe(&self) -> String {
        format!("exact sentinel {:?}", self.token)
    }
}
