use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// What kind of name a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    Identity,
    Role,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Role => write!(f, "role"),
        }
    }
}

/// Errors returned by the directory provider and the key fetcher.
///
/// The type is `Clone` because one key fetch result is handed to every
/// caller that joined the same in-flight miss.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("upstream call timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned HTTP status {0}")]
    Http(u16),

    #[error("failed to parse upstream response: {0}")]
    Parse(String),

    #[error("invalid alias: {0}")]
    InvalidAlias(String),

    #[error("provider configuration error: {0}")]
    Configuration(String),

    #[error("upstream fetch aborted")]
    Aborted,
}

impl ProviderError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Whether the failure was the upstream taking too long.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Errors surfaced by the resolver and the refresh coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubkeyError {
    /// Identity or role unknown in the current snapshot (or ineligible).
    #[error("{kind} not found: {name}")]
    NotFound { kind: LookupKind, name: String },

    /// Directory or key fetch failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] ProviderError),

    /// Malformed identity or role name.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PubkeyError {
    pub fn identity_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: LookupKind::Identity,
            name: name.into(),
        }
    }

    pub fn role_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: LookupKind::Role,
            name: name.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

pub type PubkeyResult<T> = Result<T, PubkeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = PubkeyError::identity_not_found("alice");
        assert_eq!(err.to_string(), "identity not found: alice");
        assert!(err.is_not_found());
        assert!(!err.is_upstream());

        let err = PubkeyError::role_not_found("admins");
        assert_eq!(err.to_string(), "role not found: admins");
    }

    #[test]
    fn test_provider_error_converts_to_upstream() {
        let err: PubkeyError = ProviderError::Http(502).into();
        assert!(err.is_upstream());
        assert_eq!(
            err.to_string(),
            "upstream unavailable: upstream returned HTTP status 502"
        );
    }

    #[test]
    fn test_timeout_detection() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!ProviderError::network("reset").is_timeout());
    }
}
