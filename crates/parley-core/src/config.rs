use std::time::Duration;

use crate::security::ApiKey;

pub const DEFAULT_BASE_URL: &str = "https://chatbots.dimagi.com";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);
pub const DEFAULT_MAX_EXCHANGES: usize = 20;
/// Reply the user simulator sends to end a conversation.
pub const DEFAULT_SENTINEL: &str = "END";

/// Connection and resilience parameters for the API client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: ApiKey,
    /// Per-attempt timeout; an attempt exceeding it is abandoned.
    pub timeout: Duration,
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: ApiKey::default(),
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait: DEFAULT_RETRY_WAIT,
        }
    }
}

/// Run-wide policy passed to the orchestrator and runner.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub max_exchanges: usize,
    pub continue_on_error: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_exchanges: DEFAULT_MAX_EXCHANGES,
            continue_on_error: true,
        }
    }
}
