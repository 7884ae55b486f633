//! Per-client rate limiting middleware.
//!
//! Sliding window per client key: the configured requests per minute,
//! ten times that per hour.

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::api::error::ApiError;
use crate::api::types::ApiContext;

/// Rate-limit key: the peer IP. The limiter runs ahead of auth, so the
/// bearer token is unverified here and never feeds the key.
fn rate_key(req: &Request<axum::body::Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Returns 429 if the client exceeded its window.
/// Accesses `ApiContext` from request extensions.
pub async fn limit(req: Request<axum::body::Body>, next: Next) -> Response {
    match limit_inner(req, next).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn limit_inner(req: Request<axum::body::Body>, next: Next) -> Result<Response, ApiError> {
    let ctx: ApiContext = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or(ApiError::Internal("missing API context".into()))?;

    let key = rate_key(&req);

    // MutexGuard is !Send, drop it before .await
    {
        let mut limiter = ctx
            .rate_limiter
            .lock()
            .map_err(|_| ApiError::Internal("rate limiter lock".into()))?;

        limiter.check(&key).map_err(|retry_after| {
            tracing::warn!(key = %key, retry_after, "Rate limit exceeded");
            ApiError::RateLimited { retry_after }
        })?;
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_peer_ip_whatever_the_token() {
        let peer = ConnectInfo(SocketAddr::from(([10, 0, 0, 7], 5000)));
        let mut req = Request::builder().body(axum::body::Body::empty()).unwrap();
        req.extensions_mut().insert(peer);
        assert_eq!(rate_key(&req), "ip:10.0.0.7");

        for token in ["guess-one", "guess-two"] {
            let mut req = Request::builder()
                .header("Authorization", format!("Bearer {token}"))
                .body(axum::body::Body::empty())
                .unwrap();
            req.extensions_mut().insert(peer);
            assert_eq!(rate_key(&req), "ip:10.0.0.7");
        }

        let req = Request::builder()
            .header("Authorization", "Bearer guess-three")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(rate_key(&req), "anonymous");
    }
}
