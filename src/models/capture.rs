//! Represents one capture session and the sensors that produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use std::{collections::BTreeMap, fmt};

/// Kind of recording a capture holds. Determines which sensors contribute
/// output folders.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaptureType {
    Image,
    Video,
    VideoWithSignal,
    Signal,
}

/// A sensor whose output folder becomes one archived resource.
#[derive(
    Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
    Camera,
    Signal,
}

impl CaptureType {
    /// Fixed set of sensors participating in this capture type.
    pub fn sensors(self) -> &'static [SensorType] {
        match self {
            CaptureType::Image | CaptureType::Video => &[SensorType::Camera],
            CaptureType::VideoWithSignal => &[SensorType::Camera, SensorType::Signal],
            CaptureType::Signal => &[SensorType::Signal],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaptureType::Image => "IMAGE",
            CaptureType::Video => "VIDEO",
            CaptureType::VideoWithSignal => "VIDEO_WITH_SIGNAL",
            CaptureType::Signal => "SIGNAL",
        }
    }
}

impl SensorType {
    /// Folder name the capture front end writes this sensor's output into.
    pub fn as_str(self) -> &'static str {
        match self {
            SensorType::Camera => "CAMERA",
            SensorType::Signal => "SIGNAL",
        }
    }
}

impl fmt::Display for CaptureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing settings recorded with a capture.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    /// Human readable title, copied onto every resource.
    pub title: String,

    /// Output file format per sensor (e.g. `CAMERA -> "jpg"`).
    #[serde(default)]
    pub output_formats: BTreeMap<SensorType, String>,
}

/// One finalized capture session.
///
/// Rows are written exactly once per finalization and never patched; a
/// recapture deletes the previous row and writes a fresh one.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    /// Caller supplied identifier, unique among current captures.
    pub capture_id: String,

    /// Participant the capture was recorded for.
    pub participant_id: String,

    pub capture_type: CaptureType,

    /// Path relative to both the staging and the durable roots.
    pub capture_folder: String,

    pub capture_settings: Json<CaptureSettings>,

    /// True when this capture supersedes an earlier one with the same id.
    #[serde(default)]
    pub recapture: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
