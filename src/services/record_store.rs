//! src/services/record_store.rs
//!
//! Durable bookkeeping for captures, resources and upload requests. The
//! pipeline only sees the `RecordStore` trait; `SqliteRecordStore` is the
//! production implementation. Lookups return `Option` so callers branch on
//! absence instead of matching on a "row not found" error.

use crate::models::{
    capture::CaptureInfo,
    resource::{ResourceInfo, UploadProgress, UploadRequest, UploadStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const UPLOAD_PAGE_MAX: usize = 1000;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("upload request `{request_id}`: {reason}")]
    InvalidTransition { request_id: Uuid, reason: String },
    #[error("{kind} `{id}` already exists")]
    AlreadyExists { kind: &'static str, id: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Filter and keyset cursor for listing upload requests.
#[derive(Clone, Debug)]
pub struct ListUploadsParams {
    pub status: Option<UploadStatus>,
    pub after: Option<UploadCursor>,
    pub max_keys: usize,
}

/// Position of the last row of a page; rows are ordered by
/// `(last_updated_time, request_id)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadCursor {
    pub last_updated_time: DateTime<Utc>,
    pub request_id: Uuid,
}

#[derive(Debug)]
pub struct ListUploadsResult {
    pub requests: Vec<UploadRequest>,
    pub next: Option<UploadCursor>,
}

/// Storage for the capture → resource → upload request tree.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn add_capture(&self, capture: &CaptureInfo) -> RecordResult<()>;
    async fn get_capture(&self, capture_id: &str) -> RecordResult<Option<CaptureInfo>>;
    async fn list_captures(&self, participant_id: Option<&str>) -> RecordResult<Vec<CaptureInfo>>;

    async fn add_resource(&self, resource: &ResourceInfo) -> RecordResult<()>;
    async fn get_resource(&self, resource_info_id: Uuid) -> RecordResult<Option<ResourceInfo>>;
    async fn list_resources(&self, capture_id: &str) -> RecordResult<Vec<ResourceInfo>>;
    async fn update_resource_status(
        &self,
        resource_info_id: Uuid,
        status: UploadStatus,
    ) -> RecordResult<bool>;

    async fn add_upload_request(&self, request: &UploadRequest) -> RecordResult<()>;
    async fn get_upload_request(&self, request_id: Uuid) -> RecordResult<Option<UploadRequest>>;
    async fn list_upload_requests(
        &self,
        params: ListUploadsParams,
    ) -> RecordResult<ListUploadsResult>;

    /// Apply worker progress to an upload request. Returns `None` when the
    /// request does not exist.
    async fn record_upload_progress(
        &self,
        request_id: Uuid,
        progress: UploadProgress,
    ) -> RecordResult<Option<UploadRequest>>;

    /// Remove every upload request, resource and the capture row itself as
    /// one batch. Returns the number of rows removed.
    async fn delete_all_records_for_capture(&self, capture_id: &str) -> RecordResult<u64>;

    /// Cheap connectivity check used by readiness probes.
    async fn ping(&self) -> RecordResult<()>;
}

/// `RecordStore` backed by a shared SQLite pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    db: Arc<SqlitePool>,
}

impl SqliteRecordStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn add_capture(&self, capture: &CaptureInfo) -> RecordResult<()> {
        sqlx::query(
            "INSERT INTO captures (
                capture_id, participant_id, capture_type, capture_folder,
                capture_settings, recapture, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&capture.capture_id)
        .bind(&capture.participant_id)
        .bind(capture.capture_type)
        .bind(&capture.capture_folder)
        .bind(&capture.capture_settings)
        .bind(capture.recapture)
        .bind(capture.created_at)
        .execute(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RecordError::AlreadyExists {
                    kind: "capture",
                    id: capture.capture_id.clone(),
                }
            } else {
                RecordError::Sqlx(err)
            }
        })?;
        Ok(())
    }

    async fn get_capture(&self, capture_id: &str) -> RecordResult<Option<CaptureInfo>> {
        let capture = sqlx::query_as::<_, CaptureInfo>(
            "SELECT capture_id, participant_id, capture_type, capture_folder,
                    capture_settings, recapture, created_at
             FROM captures WHERE capture_id = ?",
        )
        .bind(capture_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(capture)
    }

    async fn list_captures(&self, participant_id: Option<&str>) -> RecordResult<Vec<CaptureInfo>> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT capture_id, participant_id, capture_type, capture_folder, \
             capture_settings, recapture, created_at FROM captures",
        );
        if let Some(participant) = participant_id {
            builder.push(" WHERE participant_id = ");
            builder.push_bind(participant);
        }
        builder.push(" ORDER BY created_at ASC, capture_id ASC");

        Ok(builder
            .build_query_as::<CaptureInfo>()
            .fetch_all(&*self.db)
            .await?)
    }

    async fn add_resource(&self, resource: &ResourceInfo) -> RecordResult<()> {
        sqlx::query(
            "INSERT INTO resources (
                resource_info_id, capture_id, participant_id, capture_title,
                sensor_type, file_type, resource_folder_relative_path, upload_url, status
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(resource.resource_info_id)
        .bind(&resource.capture_id)
        .bind(&resource.participant_id)
        .bind(&resource.capture_title)
        .bind(resource.sensor_type)
        .bind(&resource.file_type)
        .bind(&resource.resource_folder_relative_path)
        .bind(&resource.upload_url)
        .bind(resource.status)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_resource(&self, resource_info_id: Uuid) -> RecordResult<Option<ResourceInfo>> {
        let resource = sqlx::query_as::<_, ResourceInfo>(
            "SELECT resource_info_id, capture_id, participant_id, capture_title,
                    sensor_type, file_type, resource_folder_relative_path, upload_url, status
             FROM resources WHERE resource_info_id = ?",
        )
        .bind(resource_info_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(resource)
    }

    async fn list_resources(&self, capture_id: &str) -> RecordResult<Vec<ResourceInfo>> {
        let resources = sqlx::query_as::<_, ResourceInfo>(
            "SELECT resource_info_id, capture_id, participant_id, capture_title,
                    sensor_type, file_type, resource_folder_relative_path, upload_url, status
             FROM resources WHERE capture_id = ?
             ORDER BY sensor_type ASC",
        )
        .bind(capture_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(resources)
    }

    async fn update_resource_status(
        &self,
        resource_info_id: Uuid,
        status: UploadStatus,
    ) -> RecordResult<bool> {
        let result = sqlx::query("UPDATE resources SET status = ? WHERE resource_info_id = ?")
            .bind(status)
            .bind(resource_info_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_upload_request(&self, request: &UploadRequest) -> RecordResult<()> {
        sqlx::query(
            "INSERT INTO upload_requests (
                request_id, resource_info_id, archive_path, file_size, file_offset,
                bucket_name, upload_relative_url, is_multi_part, next_part, upload_id,
                status, last_updated_time
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(request.request_id)
        .bind(request.resource_info_id)
        .bind(&request.archive_path)
        .bind(request.file_size)
        .bind(request.file_offset)
        .bind(&request.bucket_name)
        .bind(&request.upload_relative_url)
        .bind(request.is_multi_part)
        .bind(request.next_part)
        .bind(&request.upload_id)
        .bind(request.status)
        .bind(request.last_updated_time)
        .execute(&*self.db)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                RecordError::AlreadyExists {
                    kind: "upload request for resource",
                    id: request.resource_info_id.to_string(),
                }
            } else {
                RecordError::Sqlx(err)
            }
        })?;
        Ok(())
    }

    async fn get_upload_request(&self, request_id: Uuid) -> RecordResult<Option<UploadRequest>> {
        let request = sqlx::query_as::<_, UploadRequest>(
            "SELECT request_id, resource_info_id, archive_path, file_size, file_offset,
                    bucket_name, upload_relative_url, is_multi_part, next_part, upload_id,
                    status, last_updated_time
             FROM upload_requests WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(request)
    }

    async fn list_upload_requests(
        &self,
        params: ListUploadsParams,
    ) -> RecordResult<ListUploadsResult> {
        let max_keys = params.max_keys.clamp(1, UPLOAD_PAGE_MAX);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT request_id, resource_info_id, archive_path, file_size, file_offset, \
             bucket_name, upload_relative_url, is_multi_part, next_part, upload_id, \
             status, last_updated_time FROM upload_requests WHERE 1 = 1",
        );

        if let Some(status) = params.status {
            builder.push(" AND status = ");
            builder.push_bind(status);
        }

        if let Some(cursor) = &params.after {
            builder.push(" AND (last_updated_time > ");
            builder.push_bind(cursor.last_updated_time);
            builder.push(" OR (last_updated_time = ");
            builder.push_bind(cursor.last_updated_time);
            builder.push(" AND request_id > ");
            builder.push_bind(cursor.request_id);
            builder.push("))");
        }

        builder.push(" ORDER BY last_updated_time ASC, request_id ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut requests: Vec<UploadRequest> =
            builder.build_query_as().fetch_all(&*self.db).await?;

        let mut next = None;
        if requests.len() == fetch_limit {
            requests.pop();
            next = requests.last().map(|last| UploadCursor {
                last_updated_time: last.last_updated_time,
                request_id: last.request_id,
            });
        }

        Ok(ListUploadsResult { requests, next })
    }

    async fn record_upload_progress(
        &self,
        request_id: Uuid,
        progress: UploadProgress,
    ) -> RecordResult<Option<UploadRequest>> {
        let mut tx = self.db.begin().await?;

        let current = sqlx::query_as::<_, UploadRequest>(
            "SELECT request_id, resource_info_id, archive_path, file_size, file_offset,
                    bucket_name, upload_relative_url, is_multi_part, next_part, upload_id,
                    status, last_updated_time
             FROM upload_requests WHERE request_id = ?",
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(mut request) = current else {
            return Ok(None);
        };

        apply_progress(&mut request, progress)?;
        request.last_updated_time = Utc::now();

        sqlx::query(
            "UPDATE upload_requests
             SET file_offset = ?, next_part = ?, upload_id = ?, status = ?, last_updated_time = ?
             WHERE request_id = ?",
        )
        .bind(request.file_offset)
        .bind(request.next_part)
        .bind(&request.upload_id)
        .bind(request.status)
        .bind(request.last_updated_time)
        .bind(request.request_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE resources SET status = ? WHERE resource_info_id = ?")
            .bind(request.status)
            .bind(request.resource_info_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(%request_id, status = request.status.as_str(), offset = request.file_offset, "recorded upload progress");
        Ok(Some(request))
    }

    async fn delete_all_records_for_capture(&self, capture_id: &str) -> RecordResult<u64> {
        let mut tx = self.db.begin().await?;

        let uploads = sqlx::query(
            "DELETE FROM upload_requests WHERE resource_info_id IN
                (SELECT resource_info_id FROM resources WHERE capture_id = ?)",
        )
        .bind(capture_id)
        .execute(&mut *tx)
        .await?;

        let resources = sqlx::query("DELETE FROM resources WHERE capture_id = ?")
            .bind(capture_id)
            .execute(&mut *tx)
            .await?;

        let captures = sqlx::query("DELETE FROM captures WHERE capture_id = ?")
            .bind(capture_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let removed = uploads.rows_affected() + resources.rows_affected() + captures.rows_affected();
        debug!(capture_id, removed, "deleted capture records");
        Ok(removed)
    }

    async fn ping(&self) -> RecordResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}

/// Merge worker progress into a request, enforcing that offsets, part
/// numbers and status never move backwards and that terminal states stay
/// terminal.
fn apply_progress(request: &mut UploadRequest, progress: UploadProgress) -> RecordResult<()> {
    let request_id = request.request_id;
    let reject = |reason: String| RecordError::InvalidTransition { request_id, reason };

    if request.status.is_terminal() {
        return Err(reject(format!(
            "status {} is terminal",
            request.status.as_str()
        )));
    }

    if let Some(offset) = progress.file_offset {
        if offset < request.file_offset || offset > request.file_size {
            return Err(reject(format!(
                "file offset {} outside {}..={}",
                offset, request.file_offset, request.file_size
            )));
        }
    }
    if let Some(part) = progress.next_part {
        if part < request.next_part {
            return Err(reject(format!(
                "next part {} is behind {}",
                part, request.next_part
            )));
        }
    }
    if let Some(status) = progress.status {
        if status.rank() < request.status.rank() {
            return Err(reject(format!(
                "status {} cannot follow {}",
                status.as_str(),
                request.status.as_str()
            )));
        }
    }
    if progress.upload_id.is_some() && !request.is_multi_part {
        return Err(reject("upload id set on a single-part upload".into()));
    }

    if let Some(offset) = progress.file_offset {
        request.file_offset = offset;
    }
    if let Some(part) = progress.next_part {
        request.next_part = part;
    }
    if let Some(upload_id) = progress.upload_id {
        request.upload_id = Some(upload_id);
    }
    if let Some(status) = progress.status {
        request.status = status;
    }
    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_capture, sample_resource, sample_upload, test_pool};

    async fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(test_pool().await)
    }

    #[tokio::test]
    async fn capture_lookup_distinguishes_absence() {
        let store = store().await;
        assert!(store.get_capture("missing").await.unwrap().is_none());

        let capture = sample_capture("cap-1", "p-1");
        store.add_capture(&capture).await.unwrap();

        let loaded = store.get_capture("cap-1").await.unwrap().unwrap();
        assert_eq!(loaded.participant_id, "p-1");
        assert_eq!(loaded.capture_settings.title, capture.capture_settings.title);
        assert_eq!(
            loaded.capture_settings.output_formats,
            capture.capture_settings.output_formats
        );
    }

    #[tokio::test]
    async fn duplicate_capture_is_rejected() {
        let store = store().await;
        let capture = sample_capture("cap-1", "p-1");
        store.add_capture(&capture).await.unwrap();

        let err = store.add_capture(&capture).await.unwrap_err();
        assert!(matches!(err, RecordError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn list_captures_filters_by_participant() {
        let store = store().await;
        store.add_capture(&sample_capture("a", "p-1")).await.unwrap();
        store.add_capture(&sample_capture("b", "p-2")).await.unwrap();
        store.add_capture(&sample_capture("c", "p-1")).await.unwrap();

        let ids: Vec<_> = store
            .list_captures(Some("p-1"))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.capture_id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a".to_string()) && ids.contains(&"c".to_string()));
        assert_eq!(store.list_captures(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn batch_delete_removes_whole_tree_only() {
        let store = store().await;
        for id in ["keep", "drop"] {
            store.add_capture(&sample_capture(id, "p-1")).await.unwrap();
            let resource = sample_resource(id);
            store.add_resource(&resource).await.unwrap();
            store
                .add_upload_request(&sample_upload(resource.resource_info_id, 100))
                .await
                .unwrap();
        }

        let removed = store.delete_all_records_for_capture("drop").await.unwrap();
        assert_eq!(removed, 3);
        assert!(store.get_capture("drop").await.unwrap().is_none());
        assert!(store.list_resources("drop").await.unwrap().is_empty());

        assert!(store.get_capture("keep").await.unwrap().is_some());
        assert_eq!(store.list_resources("keep").await.unwrap().len(), 1);
        let remaining = store
            .list_upload_requests(ListUploadsParams {
                status: None,
                after: None,
                max_keys: 10,
            })
            .await
            .unwrap();
        assert_eq!(remaining.requests.len(), 1);

        assert_eq!(store.delete_all_records_for_capture("drop").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn upload_listing_pages_by_cursor() {
        let store = store().await;
        store.add_capture(&sample_capture("cap", "p-1")).await.unwrap();
        for _ in 0..5 {
            let resource = sample_resource("cap");
            store.add_resource(&resource).await.unwrap();
            store
                .add_upload_request(&sample_upload(resource.resource_info_id, 10))
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut after = None;
        loop {
            let page = store
                .list_upload_requests(ListUploadsParams {
                    status: Some(UploadStatus::Pending),
                    after,
                    max_keys: 2,
                })
                .await
                .unwrap();
            assert!(page.requests.len() <= 2);
            seen.extend(page.requests.into_iter().map(|r| r.request_id));
            match page.next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn upload_progress_is_monotonic_and_mirrors_resource_status() {
        let store = store().await;
        store.add_capture(&sample_capture("cap", "p-1")).await.unwrap();
        let resource = sample_resource("cap");
        store.add_resource(&resource).await.unwrap();
        let request = sample_upload(resource.resource_info_id, 100);
        store.add_upload_request(&request).await.unwrap();

        let updated = store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    file_offset: Some(40),
                    next_part: Some(2),
                    upload_id: Some("mp-1".into()),
                    status: Some(UploadStatus::Uploading),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.file_offset, 40);
        assert_eq!(updated.next_part, 2);
        assert_eq!(updated.upload_id.as_deref(), Some("mp-1"));

        let resource_now = store
            .get_resource(resource.resource_info_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resource_now.status, UploadStatus::Uploading);

        let backwards = store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    file_offset: Some(10),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(backwards, RecordError::InvalidTransition { .. }));

        let regressed = store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    status: Some(UploadStatus::Pending),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(regressed, RecordError::InvalidTransition { .. }));
        let still_uploading = store
            .get_upload_request(request.request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still_uploading.status, UploadStatus::Uploading);
        assert_eq!(still_uploading.file_offset, 40);
        assert_eq!(
            store
                .get_resource(resource.resource_info_id)
                .await
                .unwrap()
                .unwrap()
                .status,
            UploadStatus::Uploading
        );

        // same status again is a plain progress report
        store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    file_offset: Some(60),
                    status: Some(UploadStatus::Uploading),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    file_offset: Some(100),
                    status: Some(UploadStatus::Completed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let after_done = store
            .record_upload_progress(
                request.request_id,
                UploadProgress {
                    status: Some(UploadStatus::Uploading),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(after_done, RecordError::InvalidTransition { .. }));

        assert!(
            store
                .record_upload_progress(Uuid::new_v4(), UploadProgress::default())
                .await
                .unwrap()
                .is_none()
        );
    }
}
