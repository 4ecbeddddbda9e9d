//! Bearer-token identity extraction.
//!
//! Tokens are HS256 JWTs issued by the auth service; the `username` claim
//! becomes the request's [`CallerIdentity`].

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderValue, Request, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::convert::Infallible;
use thiserror::Error;
use tracing::debug;

use crate::application::auth::CallerIdentity;
use crate::application::error::AppError;

use super::HttpState;

/// Claims carried by tokens from the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Service-to-service tokens from the auth service carry no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("authorization header is not a bearer token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("token rejected: {0}")]
    Invalid(String),
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        // `exp` is checked when present but not demanded.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::new();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<CallerIdentity, TokenError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|err| {
            match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            }
        })?;

        let claims = data.claims;
        let mut caller = CallerIdentity::new(claims.username);
        if let Some(role) = claims.role {
            caller = caller.with_role(role);
        }
        Ok(caller)
    }
}

/// Attach a [`CallerIdentity`] when a bearer token is present. Requests
/// without one continue anonymously; a bad token is rejected outright.
pub async fn identify_caller(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return next.run(request).await;
    };

    let caller = match bearer_token(header).and_then(|token| state.verifier.verify(token)) {
        Ok(caller) => caller,
        Err(err) => {
            debug!(error = %err, "Rejected bearer token");
            return AppError::Unauthenticated.into_response();
        }
    };

    request.extensions_mut().insert(caller.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(caller);
    response
}

fn bearer_token(header: &HeaderValue) -> Result<&str, TokenError> {
    let raw = header.to_str().map_err(|_| TokenError::Malformed)?;
    let token = raw
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(TokenError::Malformed)?;
    if token.is_empty() {
        return Err(TokenError::Malformed);
    }
    Ok(token)
}

/// The request's caller, if any.
pub struct Caller(pub Option<CallerIdentity>);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<CallerIdentity>().cloned()))
    }
}
