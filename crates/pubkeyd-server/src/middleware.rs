use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::error::ApiError;

/// Query parameter carrying the shared access token.
pub const AUTH_QUERY_PARAM: &str = "auth";

/// Expected access token for a group of routes; `None` leaves them open.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(Option<Arc<str>>);

impl AccessToken {
    pub fn new(token: Option<&str>) -> Self {
        Self(token.filter(|t| !t.is_empty()).map(Arc::from))
    }

    pub fn open() -> Self {
        Self(None)
    }

    pub fn is_required(&self) -> bool {
        self.0.is_some()
    }

    /// Whether `supplied` satisfies this token.
    pub fn permits(&self, supplied: Option<&str>) -> bool {
        match (&self.0, supplied) {
            (None, _) => true,
            (Some(expected), Some(supplied)) => {
                constant_time_eq(expected.as_bytes(), supplied.as_bytes())
            }
            (Some(_), None) => false,
        }
    }
}

/// Reject requests whose `auth` query parameter does not match the token.
pub async fn require_token(
    State(token): State<AccessToken>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !token.is_required() {
        return next.run(req).await;
    }

    let supplied = req.uri().query().and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == AUTH_QUERY_PARAM)
            .map(|(_, v)| v.into_owned())
    });

    if token.permits(supplied.as_deref()) {
        next.run(req).await
    } else {
        tracing::warn!(
            path = %req.uri().path(),
            token_supplied = supplied.is_some(),
            "Rejected request with missing or invalid access token"
        );
        ApiError::Unauthorized.into_response()
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// Request ID middleware: propagate or generate X-Request-Id
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    // If the incoming request already has a request-id, preserve it; otherwise generate one
    let req_id_value = req.headers().get(&header_name).cloned().unwrap_or_else(|| {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
    });

    // Available to the trace span via request extensions
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);

    res
}
