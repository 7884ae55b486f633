//! Bearer token authentication for the admin routes.
//!
//! The presented token is hashed and compared in constant time against the
//! hash of the configured admin token.

use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::api::types::{hash_token, ApiContext};

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(req: &Request<axum::body::Body>) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Require the admin bearer token.
///
/// Accesses `ApiContext` from request extensions (injected by Extension layer).
pub async fn require_admin(req: Request<axum::body::Body>, next: Next) -> Response {
    match require_admin_inner(req, next).await {
        Ok(resp) => resp,
        Err(err) => err.into_response(),
    }
}

async fn require_admin_inner(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let Some(expected) = ctx.admin_token_hash else {
        tracing::warn!(path = %req.uri().path(), "Admin request refused: no admin token configured");
        return Err(ApiError::Unauthorized);
    };

    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;
    let presented = hash_token(token);
    if !bool::from(presented.ct_eq(&expected)) {
        tracing::warn!(path = %req.uri().path(), "Admin request refused: bad token");
        return Err(ApiError::Unauthorized);
    }

    let mut response = next.run(req).await;
    response
        .headers_mut()
        .insert("Cache-Control", HeaderValue::from_static("no-store"));
    Ok(response)
}
