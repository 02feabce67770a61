//! HTTP handlers the upload worker polls for pending archives and reports
//! progress through.

use crate::{
    errors::AppError,
    models::resource::{UploadProgress, UploadRequest, UploadStatus},
    services::record_store::{ListUploadsParams, UploadCursor},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query params accepted by `GET /uploads`.
#[derive(Debug, Deserialize)]
pub struct ListUploadsQuery {
    pub status: Option<UploadStatus>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
    #[serde(rename = "continuation-token")]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUploadsResponse {
    pub uploads: Vec<UploadRequest>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// `GET /uploads` — page through upload requests, optionally by status.
pub async fn list_uploads(
    State(state): State<AppState>,
    Query(q): Query<ListUploadsQuery>,
) -> Result<Json<ListUploadsResponse>, AppError> {
    let after = q
        .continuation_token
        .as_deref()
        .map(|token| {
            decode_continuation_token(token)
                .ok_or_else(|| AppError::bad_request("invalid continuation-token"))
        })
        .transpose()?;

    let params = ListUploadsParams {
        status: q.status,
        after,
        max_keys: q.max_keys.unwrap_or(1000).clamp(1, 1000),
    };

    let result = state
        .pipeline
        .records()
        .list_upload_requests(params)
        .await?;

    Ok(Json(ListUploadsResponse {
        uploads: result.requests,
        is_truncated: result.next.is_some(),
        next_continuation_token: result.next.as_ref().map(encode_continuation_token),
    }))
}

/// `PATCH /uploads/{requestId}` — worker reports progress.
pub async fn update_upload(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Json(progress): Json<UploadProgress>,
) -> Result<Json<UploadRequest>, AppError> {
    state
        .pipeline
        .records()
        .record_upload_progress(request_id, progress)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("upload request `{}` not found", request_id)))
}

fn encode_continuation_token(cursor: &UploadCursor) -> String {
    let raw = format!(
        "{}|{}",
        cursor
            .last_updated_time
            .to_rfc3339_opts(SecondsFormat::Nanos, true),
        cursor.request_id
    );
    general_purpose::STANDARD.encode(raw)
}

fn decode_continuation_token(token: &str) -> Option<UploadCursor> {
    let bytes = general_purpose::STANDARD.decode(token).ok()?;
    let raw = String::from_utf8(bytes).ok()?;
    let (time, id) = raw.split_once('|')?;
    Some(UploadCursor {
        last_updated_time: DateTime::parse_from_rfc3339(time)
            .ok()?
            .with_timezone(&Utc),
        request_id: Uuid::parse_str(id).ok()?,
    })
}
