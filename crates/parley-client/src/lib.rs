pub mod ocs;
pub mod reliable;

pub mod mock;

pub use mock::{MockCall, MockReply, MockService};
pub use ocs::OcsClient;
pub use reliable::{ReliableConfig, ReliableService};

use parley_core::config::ClientConfig;
use parley_core::errors::ApiError;

/// Build the production client: HTTP transport wrapped in bounded retries.
pub fn connect(config: &ClientConfig) -> Result<ReliableService<OcsClient>, ApiError> {
    let client = OcsClient::new(config)?;
    Ok(ReliableService::new(client, ReliableConfig::from(config)))
}
