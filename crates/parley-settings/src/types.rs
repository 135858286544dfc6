//! Settings types. JSON keys are camelCase; every field has a default so a
//! partial user file deep-merges cleanly.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use parley_core::config::{
    ClientConfig, RunConfig, DEFAULT_BASE_URL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_EXCHANGES,
    DEFAULT_RETRY_WAIT, DEFAULT_SENTINEL, DEFAULT_TIMEOUT,
};
use parley_core::security::ApiKey;

use crate::errors::{Result, SettingsError};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    pub api: ApiSettings,
    pub experiments: ExperimentSettings,
    pub run: RunSettings,
    pub dataset: DatasetSettings,
}

/// Remote chat service connection.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_wait_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_wait_secs: DEFAULT_RETRY_WAIT.as_secs(),
        }
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_wait_secs", &self.retry_wait_secs)
            .finish()
    }
}

/// Which hosted experiments play which role.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentSettings {
    /// Assistant under test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    /// User simulator (simulation mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RunSettings {
    pub max_exchanges: usize,
    pub continue_on_error: bool,
    pub sentinel: String,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            max_exchanges: DEFAULT_MAX_EXCHANGES,
            continue_on_error: true,
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

/// Optional upload of output rows to a dataset-hosting service.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasetSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl fmt::Debug for DatasetSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasetSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("description", &self.description)
            .finish()
    }
}

impl DatasetSettings {
    /// Export runs only with a non-blank credential.
    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }
}

impl ParleySettings {
    pub fn client_config(&self) -> Result<ClientConfig> {
        if self.api.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("api.baseUrl is empty".into()));
        }
        if self.api.timeout_secs == 0 {
            return Err(SettingsError::InvalidValue("api.timeoutSecs must be positive".into()));
        }
        if self.api.retry_attempts == 0 {
            return Err(SettingsError::InvalidValue("api.retryAttempts must be at least 1".into()));
        }
        Ok(ClientConfig {
            base_url: self.api.base_url.clone(),
            api_key: ApiKey::new(self.api.api_key.clone().unwrap_or_default()),
            timeout: Duration::from_secs(self.api.timeout_secs),
            max_attempts: self.api.retry_attempts,
            retry_wait: Duration::from_secs(self.api.retry_wait_secs),
        })
    }

    pub fn run_config(&self) -> Result<RunConfig> {
        if self.run.max_exchanges == 0 {
            return Err(SettingsError::InvalidValue("run.maxExchanges must be at least 1".into()));
        }
        if self.run.sentinel.trim().is_empty() {
            return Err(SettingsError::InvalidValue("run.sentinel is blank".into()));
        }
        Ok(RunConfig {
            max_exchanges: self.run.max_exchanges,
            continue_on_error: self.run.continue_on_error,
        })
    }
}
