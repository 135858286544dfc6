//! Optional upload of output rows to a dataset-hosting service.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use parley_core::security::ApiKey;
use parley_settings::DatasetSettings;

const EXPORT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("dataset upload failed: {0}")]
    Http(String),
    #[error("dataset service rejected upload ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Serialize)]
struct DatasetPayload<'a, T: Serialize> {
    name: &'a str,
    description: &'a str,
    rows: &'a [T],
}

pub struct DatasetExporter {
    client: Client,
    url: String,
    api_key: ApiKey,
    description: String,
}

impl DatasetExporter {
    /// `None` unless a non-blank credential and an endpoint are configured.
    pub fn from_settings(settings: &DatasetSettings) -> Result<Option<Self>, ExportError> {
        if !settings.is_enabled() {
            return Ok(None);
        }
        let Some(url) = settings.base_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            tracing::warn!("dataset api key set but no dataset URL configured, skipping export");
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| ExportError::Http(e.to_string()))?;

        Ok(Some(Self {
            client,
            url: url.to_string(),
            api_key: ApiKey::new(settings.api_key.clone().unwrap_or_default()),
            description: settings.description.clone().unwrap_or_default(),
        }))
    }

    /// `<mode>-<UTC timestamp>`.
    pub fn default_name(mode: &str) -> String {
        format!("{mode}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"))
    }

    pub async fn export<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<(), ExportError> {
        let payload = DatasetPayload {
            name,
            description: &self.description,
            rows,
        };
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ExportError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExportError::Rejected { status, body });
        }

        info!(name, rows = rows.len(), "dataset exported");
        Ok(())
    }
}
