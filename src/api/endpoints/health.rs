//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub sink: &'static str,
    pub geocoder: bool,
    pub admin_enabled: bool,
}

/// `GET /api/health`
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    let config = &ctx.core.config;
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        sink: config.sink.kind(),
        geocoder: config.geocoder_enabled,
        admin_enabled: ctx.admin_token_hash.is_some(),
    })
}
