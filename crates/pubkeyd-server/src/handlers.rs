use axum::{
    extract::{Path, State},
    http::{Method, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::{ApiError, TEXT_PLAIN};
use crate::metrics::{self, names};
use crate::server::AppState;

fn text(status: StatusCode, body: impl Into<String>) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body.into()).into_response()
}

/// Render a handler result and count it under `metric`.
fn respond(metric: &'static str, method: &Method, result: Result<String, ApiError>) -> Response {
    let response = match result {
        Ok(body) => text(StatusCode::OK, body),
        Err(err) => err.into_response(),
    };
    metrics::record_request(metric, method.as_str(), response.status().as_u16());
    response
}

pub async fn health() -> impl IntoResponse {
    tracing::debug!("Returning health status");
    text(StatusCode::OK, "ok\n")
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    metrics::sync_core_stats(&state.resolver);
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        None => text(StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized\n"),
    }
}

pub async fn get_authorized_keys(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<String>,
) -> Response {
    let result = state
        .resolver
        .resolve_identity(&id)
        .await
        .inspect(|_| tracing::info!(identity = %id, "Returning authorized_keys"))
        .map_err(ApiError::identity);
    respond(names::AUTHORIZED_KEYS_REQUESTS_TOTAL, &method, result)
}

pub async fn delete_authorized_keys(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<String>,
) -> Response {
    tracing::debug!(identity = %id, "Received request to purge authorized_keys cache");
    let result = state
        .resolver
        .invalidate_identity(&id)
        .map(|removed| {
            tracing::info!(identity = %id, removed, "Purged authorized_keys cache");
            format!("Purging authorized_keys cache for user {id}\n")
        })
        .map_err(ApiError::identity);
    respond(names::AUTHORIZED_KEYS_REQUESTS_TOTAL, &method, result)
}

pub async fn get_role_authorized_keys(
    State(state): State<AppState>,
    method: Method,
    Path(role): Path<String>,
) -> Response {
    let result = state
        .resolver
        .resolve_role(&role)
        .await
        .inspect(|_| tracing::info!(role = %role, "Returning authorized_keys of role"))
        .map_err(ApiError::role);
    respond(names::ROLE_AUTHORIZED_KEYS_REQUESTS_TOTAL, &method, result)
}

pub async fn get_github_name(
    State(state): State<AppState>,
    method: Method,
    Path(id): Path<String>,
) -> Response {
    let result = state
        .resolver
        .alias_of(&id)
        .map(|alias| {
            tracing::info!(identity = %id, alias = %alias, "Found alias");
            format!("{alias}\n")
        })
        .map_err(ApiError::identity);
    respond(names::GITHUB_NAME_REQUESTS_TOTAL, &method, result)
}

pub async fn refresh(State(state): State<AppState>) -> impl IntoResponse {
    tracing::debug!("Received request to refresh the directory");
    state.resolver.trigger_refresh();
    text(StatusCode::OK, "Refreshing directory\n")
}
