//! Archived sensor output and the upload bookkeeping attached to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::capture::SensorType;

/// Transfer state shared by resources and their upload requests.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl UploadStatus {
    /// Completed and failed transfers are never reopened.
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadStatus::Completed | UploadStatus::Failed)
    }

    /// Position in the PENDING → UPLOADING → terminal lifecycle. A transfer
    /// never moves to a lower rank.
    pub fn rank(self) -> u8 {
        match self {
            UploadStatus::Pending => 0,
            UploadStatus::Uploading => 1,
            UploadStatus::Completed | UploadStatus::Failed => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "PENDING",
            UploadStatus::Uploading => "UPLOADING",
            UploadStatus::Completed => "COMPLETED",
            UploadStatus::Failed => "FAILED",
        }
    }
}

/// One sensor's output folder, archived into a single uploadable artifact.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub resource_info_id: Uuid,

    /// Owning capture.
    pub capture_id: String,

    pub participant_id: String,

    pub capture_title: String,

    pub sensor_type: SensorType,

    /// Output format configured for the sensor (e.g. "mp4").
    pub file_type: String,

    /// `{captureFolder}/{sensorType}`, relative to the durable root.
    pub resource_folder_relative_path: String,

    /// Absolute destination for the archive.
    #[serde(rename = "uploadURL")]
    pub upload_url: String,

    pub status: UploadStatus,
}

/// Resumable upload state for one resource archive.
///
/// Created by the finalization pipeline; afterwards only the upload worker
/// advances `file_offset`, `next_part`, `upload_id` and `status`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub request_id: Uuid,

    /// Owning resource (1:1).
    pub resource_info_id: Uuid,

    /// Location of the archive on disk.
    pub archive_path: String,

    /// Archive size in bytes at creation time.
    pub file_size: i64,

    /// Bytes confirmed uploaded so far.
    pub file_offset: i64,

    pub bucket_name: String,

    #[serde(rename = "uploadRelativeURL")]
    pub upload_relative_url: String,

    pub is_multi_part: bool,

    /// Next multipart part number (1-based).
    pub next_part: i64,

    /// External multipart session id, unset until the worker opens one.
    pub upload_id: Option<String>,

    pub status: UploadStatus,

    pub last_updated_time: DateTime<Utc>,
}

/// Progress reported by the upload worker. Unset fields are left unchanged.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub file_offset: Option<i64>,
    pub next_part: Option<i64>,
    pub upload_id: Option<String>,
    pub status: Option<UploadStatus>,
}
