//! HTTP clients for the identity directory and the public key source.

pub mod github;
pub mod onelogin;

use std::time::Duration;

use pubkeyd_core::ProviderError;

pub use github::GitHubKeys;
pub use onelogin::OneLoginDirectory;

/// User agent sent to upstream services.
pub const USER_AGENT: &str = concat!("pubkeyd/", env!("CARGO_PKG_VERSION"));

fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ProviderError::Configuration(format!("failed to create HTTP client: {e}")))
}

/// Classify a transport error. `timeout` is the client's configured bound.
fn classify(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_decode() {
        ProviderError::parse(err.to_string())
    } else if let Some(status) = err.status() {
        ProviderError::Http(status.as_u16())
    } else {
        ProviderError::network(err.to_string())
    }
}
