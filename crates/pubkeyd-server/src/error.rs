//! HTTP error responses.
//!
//! Every error renders as a short plain-text line prefixed with its status
//! code, which is what `AuthorizedKeysCommand` wrappers expect to log.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use pubkeyd_core::{LookupKind, PubkeyError};
use thiserror::Error;

pub const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("400 {0}")]
    BadRequest(String),

    #[error("401 unauthorized")]
    Unauthorized,

    #[error("404 user not found")]
    UserNotFound,

    #[error("404 role not found")]
    RoleNotFound,

    #[error("503 couldn't retrieve users authorized_keys")]
    UserKeysUnavailable,

    #[error("503 couldn't retrieve roles authorized_keys")]
    RoleKeysUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::UserNotFound | Self::RoleNotFound => StatusCode::NOT_FOUND,
            Self::UserKeysUnavailable | Self::RoleKeysUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    /// Map a failed identity lookup.
    pub fn identity(err: PubkeyError) -> Self {
        match err {
            PubkeyError::NotFound { .. } => Self::UserNotFound,
            PubkeyError::UpstreamUnavailable(_) => Self::UserKeysUnavailable,
            PubkeyError::InvalidInput(msg) => Self::BadRequest(msg),
        }
    }

    /// Map a failed role lookup.
    pub fn role(err: PubkeyError) -> Self {
        match err {
            PubkeyError::NotFound {
                kind: LookupKind::Identity,
                ..
            } => Self::UserNotFound,
            PubkeyError::NotFound { .. } => Self::RoleNotFound,
            PubkeyError::UpstreamUnavailable(_) => Self::RoleKeysUnavailable,
            PubkeyError::InvalidInput(msg) => Self::BadRequest(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, TEXT_PLAIN)],
            format!("{self}\n"),
        )
            .into_response()
    }
}
