//! Client tuning options.

use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for the underlying HTTP client and the response cache.
///
/// Every field has a default, so an empty config section deserializes to
/// [`ClientOptions::default`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientOptions {
    /// Upper bound for requests that do not carry their own timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum number of cached responses (unbounded when unset)
    #[serde(default)]
    pub cache_capacity: Option<usize>,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("MediaLib/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            cache_capacity: None,
        }
    }
}

impl ClientOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Build a reqwest client with these options.
    pub fn build_http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.request_timeout())
            .connect_timeout(self.connect_timeout())
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| ApiError::invalid_configuration(format!("Failed to build HTTP client: {}", e)))
    }
}
