use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::application::error::{AppError, ErrorReport};
use crate::cache::EvictionReport;
use crate::domain::users::UserRecord;

use super::HttpState;
use super::auth::Caller;

pub async fn list_users(State(state): State<HttpState>) -> Result<Json<Vec<UserRecord>>, AppError> {
    state.users.list_users().await.map(Json)
}

pub async fn get_user(
    State(state): State<HttpState>,
    Caller(caller): Caller,
    Path(username): Path<String>,
) -> Result<Json<UserRecord>, AppError> {
    state
        .users
        .get_user(caller.as_ref(), &username)
        .await
        .map(Json)
}

pub async fn delete_user(
    State(state): State<HttpState>,
    Caller(caller): Caller,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    state.users.delete_user(caller.as_ref(), &username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn evict_user_cache(
    State(state): State<HttpState>,
    Path(username): Path<String>,
) -> Result<Response, AppError> {
    let report = state.users.evict_user_cache(&username).await?;
    Ok(eviction_response(
        report,
        format!("Cache invalidated for user: {}", username.trim()),
    ))
}

pub async fn evict_all_cache(State(state): State<HttpState>) -> Response {
    let report = state.users.evict_all_cache().await;
    eviction_response(report, "All user cache invalidated".to_string())
}

pub async fn cache_status(State(state): State<HttpState>) -> String {
    state.users.cache_status()
}

/// `200` with `message` when every namespace was cleared, otherwise `503`
/// naming what was and was not cleared. Cleared namespaces stay cleared.
fn eviction_response(report: EvictionReport, message: String) -> Response {
    if report.is_complete() {
        return (StatusCode::OK, message).into_response();
    }

    let failed = report
        .failed
        .iter()
        .map(|(namespace, _)| namespace.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let cleared = report
        .evicted
        .iter()
        .map(|namespace| namespace.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let body = if cleared.is_empty() {
        format!("Cache invalidation failed for: {failed}")
    } else {
        format!("Cache partially invalidated; cleared: {cleared}; failed: {failed}")
    };

    let mut response = (StatusCode::SERVICE_UNAVAILABLE, body).into_response();
    ErrorReport {
        source: "infra::http::users::eviction_response",
        status: StatusCode::SERVICE_UNAVAILABLE,
        messages: report
            .failed
            .into_iter()
            .map(|(namespace, reason)| format!("{namespace}: {reason}"))
            .collect(),
    }
    .attach(&mut response);
    response
}
