//! HTTP surface: the `/users` routes, health, and request middleware.

mod auth;
mod middleware;
mod users;

pub use auth::{Caller, Claims, JwtVerifier, TokenError};

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::application::error::ErrorReport;
use crate::application::repos::UsersRepo;
use crate::application::users::UserService;

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub users: Arc<UserService>,
    pub health: Arc<dyn UsersRepo>,
    pub verifier: Arc<JwtVerifier>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/users", get(users::list_users))
        .route("/users/", get(users::list_users))
        .route(
            "/users/{username}",
            get(users::get_user).delete(users::delete_user),
        )
        .route(
            "/users/cache/evict/{username}",
            post(users::evict_user_cache),
        )
        .route("/users/cache/evict-all", post(users::evict_all_cache))
        .route("/users/cache/status", get(users::cache_status))
        .route("/health", get(health))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::identify_caller,
        ))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}

async fn health(State(state): State<HttpState>) -> Response {
    match state.health.health_check().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error("infra::http::health", StatusCode::SERVICE_UNAVAILABLE, &err)
                .attach(&mut response);
            response
        }
    }
}
