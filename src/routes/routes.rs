//! Defines routes for capture lifecycle and upload hand-off operations.
//!
//! ## Structure
//! - **Capture endpoints**
//!   - `POST   /captures` — finalize a capture, streams lifecycle events (NDJSON)
//!   - `GET    /captures` — list captures (supports `participantId`)
//!   - `GET    /captures/{id}` — fetch one capture
//!   - `DELETE /captures/{id}` — delete a capture's records and files
//!   - `GET    /captures/{id}/resources` — resources archived for a capture
//!
//! - **Upload endpoints** (consumed by the upload worker)
//!   - `GET    /uploads` — list upload requests (supports status, max-keys, continuation-token)
//!   - `PATCH  /uploads/{id}` — report upload progress

use crate::{
    handlers::{
        capture_handlers::{
            delete_capture, finalize_capture, get_capture, list_capture_resources, list_captures,
        },
        health_handlers::{healthz, readyz},
        upload_handlers::{list_uploads, update_upload},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, patch},
};

/// Build and return the router for all capture and upload routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Capture routes
        .route("/captures", get(list_captures).post(finalize_capture))
        .route("/captures/{id}", get(get_capture).delete(delete_capture))
        .route("/captures/{id}/resources", get(list_capture_resources))
        // Upload routes
        .route("/uploads", get(list_uploads))
        .route("/uploads/{id}", patch(update_upload))
}
