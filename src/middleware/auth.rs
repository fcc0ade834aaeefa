use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::utils::{ApiError, JwtUtil};

#[derive(Clone)]
pub struct AuthState {
    pub jwt_util: Arc<JwtUtil>,
}

/// Authenticated caller identity, inserted into request extensions for
/// downstream handlers.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

/// Bearer-token authentication middleware.
/// 1. Verify the JWT
/// 2. Insert `AuthUser` into request extensions
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let uri = req.uri().path().to_string();
    let method = req.method().to_string();

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing authorization header for {} {}", method, uri);
            ApiError::unauthorized("Missing authorization header")
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::warn!("Invalid authorization header format for {} {}", method, uri);
        ApiError::unauthorized("Invalid authorization header format")
    })?;

    let claims = state.jwt_util.verify_token(token).map_err(|err| {
        tracing::warn!("JWT verification failed for {} {}", method, uri);
        err
    })?;

    tracing::debug!(
        "Authenticated user {} (ID: {}) on {} {}",
        claims.username,
        claims.sub,
        method,
        uri
    );

    req.extensions_mut()
        .insert(AuthUser { user_id: claims.sub, username: claims.username });

    Ok(next.run(req).await)
}
