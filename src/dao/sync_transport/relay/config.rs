use std::time::Duration;

use thiserror::Error;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Failures while assembling a relay configuration.
#[derive(Debug, Error)]
pub enum RelayConfigError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build relay client")]
    ClientBuilder {
        /// Error reported by the client builder.
        #[source]
        source: reqwest::Error,
    },
}

/// Runtime configuration describing how to reach the relay server.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the relay, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Timeout applied to row reads and writes (not to the event stream).
    pub request_timeout: Duration,
}

impl RelayConfig {
    /// Construct a configuration from an explicit base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}
