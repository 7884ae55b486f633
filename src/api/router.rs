//! HTTP router for the seed admin API and the public read endpoints.
//!
//! Returns a composable `Router`. Routes are nested under `/api/`.
//!
//! Middleware stack (outermost → innermost):
//! 1. Rate limiter (keyed by peer IP) → 2. Admin auth (admin routes only)

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// JSON envelope and base64 overhead on top of the raw upload limit.
const BODY_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the API router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer).
/// Endpoint handlers use `State<ApiContext>` (provided via `with_state`).
pub fn api_router(core: Arc<CoreState>) -> Router {
    let ctx = ApiContext::new(core);
    build_router(ctx)
}

/// Build router from a pre-constructed `ApiContext`.
#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx)
}

fn build_router(ctx: ApiContext) -> Router {
    let upload_limit = ctx.core.config.pipeline.limits.max_upload_bytes;
    let body_limit = upload_limit
        .saturating_mul(4)
        .saturating_div(3)
        .saturating_add(BODY_OVERHEAD_BYTES);

    // Layers apply bottom (innermost) to top (outermost).
    // Extension must be outermost so middleware can extract ApiContext.
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let admin = Router::new()
        .route("/admin/seed/validate", post(endpoints::seed::validate))
        .route(
            "/admin/seed/:batch_id",
            get(endpoints::seed::get).delete(endpoints::seed::discard),
        )
        .route("/admin/seed/:batch_id/insert", post(endpoints::seed::insert))
        .with_state(ctx.clone())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum::middleware::from_fn(middleware::auth::require_admin))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Public routes (rate-limited only)
    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/businesses", get(endpoints::businesses::list))
        .route("/categories", get(endpoints::businesses::categories))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .nest("/api", admin)
        .nest("/api", public)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
