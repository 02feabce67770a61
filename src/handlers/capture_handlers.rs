//! HTTP handlers for capture finalization, lookup and deletion.
//!
//! Finalization streams its lifecycle events back as newline-delimited JSON.
//! The pipeline itself runs on a detached task so a client that disconnects
//! mid-stream does not abort a half-finished finalize.

use crate::{
    errors::AppError,
    models::{capture::CaptureInfo, event::LifecycleEvent, plan::ResourcePlan},
    services::capture_pipeline::{CapturePipeline, PipelineError, PipelineResult},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{error, info, warn};

/// Events buffered between the pipeline task and a slow client.
const EVENT_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCapturesQuery {
    pub participant_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteCaptureResponse {
    capture_id: String,
    deleted: bool,
}

/// `POST /captures` — capture finished; finalize it.
pub async fn finalize_capture(
    State(state): State<AppState>,
    Json(info): Json<CaptureInfo>,
) -> Result<Response, AppError> {
    // reject unusable descriptors with a plain 400 before streaming starts
    ResourcePlan::for_capture(&info).map_err(|err| AppError::bad_request(err.to_string()))?;

    info!(capture_id = %info.capture_id, recapture = info.recapture, "finalize requested");
    let guard = state.locks.acquire(&info.capture_id).await;
    let mut events = spawn_finalize(state.pipeline.clone(), info, guard);

    let body = async_stream::stream! {
        while let Some(item) = events.recv().await {
            let line = match item {
                Ok(event) => serde_json::to_vec(&event),
                Err(err) => serde_json::to_vec(&json!({
                    "event": "Failed",
                    "error": err.to_string(),
                })),
            };
            match line {
                Ok(mut bytes) => {
                    bytes.push(b'\n');
                    yield Ok::<Bytes, io::Error>(Bytes::from(bytes));
                }
                Err(err) => {
                    yield Err(io::Error::other(err));
                    break;
                }
            }
        }
    };

    let mut response = Response::new(Body::from_stream(body));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-ndjson"),
    );
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

/// Drive a finalize to completion on its own task, forwarding events until
/// the receiver goes away. The capture lock is held until the task ends, and
/// a panicking pipeline still ends the sequence with an error item.
fn spawn_finalize(
    pipeline: CapturePipeline,
    info: CaptureInfo,
    guard: OwnedMutexGuard<()>,
) -> mpsc::Receiver<PipelineResult<LifecycleEvent>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let capture_id = info.capture_id.clone();

    let events = tx.clone();
    let task = tokio::spawn(async move {
        let capture_id = info.capture_id.clone();
        let mut stream = Box::pin(pipeline.finalize(info));
        while let Some(item) = stream.next().await {
            match &item {
                Ok(event) if event.is_terminal() => info!(%capture_id, "finalize complete"),
                Ok(_) => {}
                Err(err) => warn!(%capture_id, "finalize failed: {}", err),
            }
            // keep going even if the client has gone away
            let _ = events.send(item).await;
        }
    });

    tokio::spawn(async move {
        let _guard = guard;
        if let Err(err) = task.await {
            error!(%capture_id, "finalize task aborted: {}", err);
            let _ = tx.send(Err(PipelineError::Join(err))).await;
        }
    });
    rx
}

/// `GET /captures?participantId=`
pub async fn list_captures(
    State(state): State<AppState>,
    Query(q): Query<ListCapturesQuery>,
) -> Result<Json<Vec<CaptureInfo>>, AppError> {
    let captures = state
        .pipeline
        .records()
        .list_captures(q.participant_id.as_deref())
        .await?;
    Ok(Json(captures))
}

/// `GET /captures/{id}`
pub async fn get_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
) -> Result<Json<CaptureInfo>, AppError> {
    state
        .pipeline
        .records()
        .get_capture(&capture_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("capture `{}` not found", capture_id)))
}

/// `GET /captures/{id}/resources`
pub async fn list_capture_resources(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let resources = state.pipeline.records().list_resources(&capture_id).await?;
    Ok(Json(resources))
}

/// `DELETE /captures/{id}` — absent captures count as deleted.
pub async fn delete_capture(
    State(state): State<AppState>,
    Path(capture_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let _guard = state.locks.acquire(&capture_id).await;
    let deleted = state.pipeline.delete(&capture_id).await?;
    Ok(Json(DeleteCaptureResponse {
        capture_id,
        deleted,
    }))
}
