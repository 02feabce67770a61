//! Shared fixtures for unit tests.

use crate::{
    db,
    models::{
        capture::{CaptureInfo, CaptureSettings, CaptureType, SensorType},
        resource::{ResourceInfo, UploadRequest, UploadStatus},
    },
    services::{
        capture_pipeline::{CapturePipeline, PipelineConfig},
        file_area::FileArea,
        record_store::SqliteRecordStore,
    },
};
use chrono::Utc;
use sqlx::{SqlitePool, types::Json};
use std::{fs, sync::Arc};
use tempfile::TempDir;
use uuid::Uuid;

/// Single-connection in-memory database with the schema applied.
pub async fn test_pool() -> Arc<SqlitePool> {
    let pool = db::connect("sqlite::memory:").await.unwrap();
    db::apply_schema(&pool).await.unwrap();
    Arc::new(pool)
}

pub fn capture_info(
    capture_id: &str,
    participant_id: &str,
    capture_type: CaptureType,
    recapture: bool,
) -> CaptureInfo {
    let mut output_formats = std::collections::BTreeMap::new();
    output_formats.insert(
        SensorType::Camera,
        match capture_type {
            CaptureType::Image => "jpg".to_string(),
            _ => "mp4".to_string(),
        },
    );
    output_formats.insert(SensorType::Signal, "csv".to_string());

    CaptureInfo {
        capture_id: capture_id.to_string(),
        participant_id: participant_id.to_string(),
        capture_type,
        capture_folder: format!("{participant_id}/{capture_id}"),
        capture_settings: Json(CaptureSettings {
            title: format!("{capture_id} title"),
            output_formats,
        }),
        recapture,
        created_at: Utc::now(),
    }
}

pub fn sample_capture(capture_id: &str, participant_id: &str) -> CaptureInfo {
    capture_info(capture_id, participant_id, CaptureType::Image, false)
}

pub fn sample_resource(capture_id: &str) -> ResourceInfo {
    ResourceInfo {
        resource_info_id: Uuid::new_v4(),
        capture_id: capture_id.to_string(),
        participant_id: "p-1".to_string(),
        capture_title: "title".to_string(),
        sensor_type: SensorType::Camera,
        file_type: "jpg".to_string(),
        resource_folder_relative_path: format!("p-1/{capture_id}/CAMERA"),
        upload_url: format!("https://uploads.test/bucket/p-1/{capture_id}/CAMERA.zip"),
        status: UploadStatus::Pending,
    }
}

pub fn sample_upload(resource_info_id: Uuid, file_size: i64) -> UploadRequest {
    UploadRequest {
        request_id: Uuid::new_v4(),
        resource_info_id,
        archive_path: "/tmp/archive.zip".to_string(),
        file_size,
        file_offset: 0,
        bucket_name: "bucket".to_string(),
        upload_relative_url: "p-1/cap/CAMERA.zip".to_string(),
        is_multi_part: true,
        next_part: 1,
        upload_id: None,
        status: UploadStatus::Pending,
        last_updated_time: Utc::now(),
    }
}

/// A pipeline wired to temporary roots and an in-memory record store.
pub struct Harness {
    _tmp: TempDir,
    pub store: Arc<SqliteRecordStore>,
    pub files: FileArea,
    pub pipeline: CapturePipeline,
}

impl Harness {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let files = FileArea::new(tmp.path().join("staging"), tmp.path().join("durable"));
        files.ensure_roots().await.unwrap();

        let store = Arc::new(SqliteRecordStore::new(test_pool().await));
        let pipeline = CapturePipeline::new(
            store.clone(),
            files.clone(),
            PipelineConfig {
                bucket_name: "bucket".to_string(),
                upload_base_url: "https://uploads.test/bucket/".to_string(),
                multipart: true,
            },
        );

        Self {
            _tmp: tmp,
            store,
            files,
            pipeline,
        }
    }

    pub fn write_durable(&self, relative: &str, content: &[u8]) {
        write_file(&self.files.durable(relative), content);
    }

    pub fn write_staging(&self, relative: &str, content: &[u8]) {
        write_file(&self.files.staging(relative), content);
    }
}

fn write_file(path: &std::path::Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}
