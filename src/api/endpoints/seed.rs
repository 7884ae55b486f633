//! Admin seed endpoints: upload and validate a file, review it, insert it.
//!
//! `POST   /api/admin/seed/validate`          → prepared batch (kept in memory)
//! `GET    /api/admin/seed/:batch_id`         → batch, state and insert report
//! `POST   /api/admin/seed/:batch_id/insert`  → insert report
//! `DELETE /api/admin/seed/:batch_id`         → discard

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, SessionError, SessionState};
use crate::seed::insert::{InsertMode, InsertReport};
use crate::seed::{PreparedBatch, SeedOptions, SeedPipeline};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentEncoding {
    #[default]
    Text,
    Base64,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub file_name: String,
    /// File body, raw text or base64 (a `data:` URL prefix is accepted).
    pub content: String,
    #[serde(default)]
    pub encoding: ContentEncoding,
    #[serde(default)]
    pub geocode: bool,
}

#[derive(Deserialize, Default)]
pub struct InsertRequest {
    #[serde(default)]
    pub mode: InsertMode,
}

#[derive(Serialize)]
pub struct SessionResponse<'a> {
    pub state: SessionState,
    #[serde(flatten)]
    pub batch: &'a PreparedBatch,
    pub insert_report: Option<&'a InsertReport>,
}

/// Decode the uploaded body to bytes.
pub fn decode_content(content: &str, encoding: ContentEncoding) -> Result<Vec<u8>, ApiError> {
    match encoding {
        ContentEncoding::Text => Ok(content.as_bytes().to_vec()),
        ContentEncoding::Base64 => {
            let data = match content.split_once(";base64,") {
                Some((prefix, data)) if prefix.starts_with("data:") => data,
                _ => content,
            };
            let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| ApiError::BadRequest(format!("content is not valid base64: {e}")))
        }
    }
}

fn session_error(batch_id: &Uuid, err: SessionError) -> ApiError {
    match err {
        SessionError::NotFound => ApiError::NotFound(format!("seed batch {batch_id}")),
        SessionError::AlreadyInserted => {
            ApiError::Conflict(format!("seed batch {batch_id} was already inserted"))
        }
        SessionError::InsertInProgress => {
            ApiError::Conflict(format!("seed batch {batch_id} is being inserted"))
        }
        SessionError::StoreFull => {
            ApiError::Unavailable("too many seed batches are being inserted; retry shortly".into())
        }
    }
}

/// `POST /api/admin/seed/validate`
pub async fn validate(
    State(ctx): State<ApiContext>,
    Json(payload): Json<ValidateRequest>,
) -> Result<(StatusCode, Json<PreparedBatch>), ApiError> {
    let file_name = payload.file_name.trim().to_string();
    if file_name.is_empty() {
        return Err(ApiError::BadRequest("file_name is required".into()));
    }
    let bytes = decode_content(&payload.content, payload.encoding)?;
    let opts = SeedOptions {
        geocode: payload.geocode,
    };

    let core = ctx.core.clone();
    let batch = tokio::task::spawn_blocking(move || -> Result<PreparedBatch, ApiError> {
        let conn = core.open_db()?;
        let sink = core.sink(&conn)?;
        let geocoder = if opts.geocode { core.geocoder()? } else { None };

        let mut pipeline = SeedPipeline::new(&conn, sink.as_ref(), core.config.pipeline.clone());
        if let Some(geocoder) = geocoder.as_deref() {
            pipeline = pipeline.with_geocoder(geocoder);
        }
        Ok(pipeline.prepare(&file_name, &bytes, opts)?)
    })
    .await??;

    let stored = {
        let mut sessions = ctx
            .sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock".into()))?;
        let batch_id = batch.batch_id;
        sessions
            .insert(batch)
            .map_err(|e| session_error(&batch_id, e))?
    };

    Ok((StatusCode::CREATED, Json(stored.as_ref().clone())))
}

/// `GET /api/admin/seed/:batch_id`
pub async fn get(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let view = {
        let mut sessions = ctx
            .sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock".into()))?;
        sessions.get(&batch_id)
    }
    .ok_or_else(|| session_error(&batch_id, SessionError::NotFound))?;

    let body = SessionResponse {
        state: view.state,
        batch: view.batch.as_ref(),
        insert_report: view.report.as_ref(),
    };
    let value = serde_json::to_value(&body).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(value))
}

/// `POST /api/admin/seed/:batch_id/insert`
pub async fn insert(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
    payload: Option<Json<InsertRequest>>,
) -> Result<Json<InsertReport>, ApiError> {
    let mode = payload.map(|Json(req)| req.mode).unwrap_or_default();

    let batch: Arc<PreparedBatch> = {
        let mut sessions = ctx
            .sessions
            .lock()
            .map_err(|_| ApiError::Internal("session lock".into()))?;
        sessions
            .begin_insert(&batch_id)
            .map_err(|e| session_error(&batch_id, e))?
    };

    let core = ctx.core.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<InsertReport, ApiError> {
        let conn = core.open_db()?;
        let sink = core.sink(&conn)?;
        let pipeline = SeedPipeline::new(&conn, sink.as_ref(), core.config.pipeline.clone());
        Ok(pipeline.insert(&batch, mode))
    })
    .await;

    let mut sessions = ctx
        .sessions
        .lock()
        .map_err(|_| ApiError::Internal("session lock".into()))?;
    match result {
        Ok(Ok(report)) => {
            tracing::info!(
                batch_id = %batch_id,
                inserted = report.inserted,
                skipped = report.skipped,
                rejected = report.rejected,
                aborted = report.aborted.is_some(),
                "Seed batch inserted"
            );
            sessions.finish_insert(&batch_id, report.clone());
            Ok(Json(report))
        }
        Ok(Err(err)) => {
            sessions.abort_insert(&batch_id);
            Err(err)
        }
        Err(join) => {
            sessions.abort_insert(&batch_id);
            Err(join.into())
        }
    }
}

/// `DELETE /api/admin/seed/:batch_id`
pub async fn discard(
    State(ctx): State<ApiContext>,
    Path(batch_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut sessions = ctx
        .sessions
        .lock()
        .map_err(|_| ApiError::Internal("session lock".into()))?;
    if sessions.remove(&batch_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(session_error(&batch_id, SessionError::NotFound))
    }
}
