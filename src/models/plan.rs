//! Resolves which resources a capture produces and where they live.
//!
//! The table is keyed by (capture type, sensor) and validated up front, so a
//! capture with an incomplete output-format mapping is rejected before the
//! pipeline touches the record store or the disk.

use std::path::{Component, Path};
use thiserror::Error;

use super::capture::{CaptureInfo, CaptureType, SensorType};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("capture type {capture_type} has no output format for sensor {sensor}")]
    MissingSensorFormat {
        capture_type: CaptureType,
        sensor: SensorType,
    },
    #[error("capture folder `{0}` must be a non-empty relative path")]
    InvalidCaptureFolder(String),
}

/// Deterministic layout of one sensor resource inside a capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourcePlan {
    pub sensor: SensorType,
    pub file_type: String,
    /// `{captureFolder}/{sensorType}`
    pub resource_folder_relative_path: String,
    /// `{resourceFolderRelativePath}.zip`
    pub archive_relative_path: String,
}

impl ResourcePlan {
    /// Build one plan per sensor of the capture type, in sensor order.
    pub fn for_capture(info: &CaptureInfo) -> Result<Vec<ResourcePlan>, PlanError> {
        let folder = normalize_capture_folder(&info.capture_folder)?;

        info.capture_type
            .sensors()
            .iter()
            .map(|&sensor| -> Result<ResourcePlan, PlanError> {
                let file_type = info
                    .capture_settings
                    .output_formats
                    .get(&sensor)
                    .cloned()
                    .ok_or(PlanError::MissingSensorFormat {
                        capture_type: info.capture_type,
                        sensor,
                    })?;
                let resource_folder_relative_path = format!("{}/{}", folder, sensor.as_str());
                let archive_relative_path = format!("{}.zip", resource_folder_relative_path);
                Ok(ResourcePlan {
                    sensor,
                    file_type,
                    resource_folder_relative_path,
                    archive_relative_path,
                })
            })
            .collect()
    }
}

/// Reject folders that would escape the file roots and strip trailing
/// separators.
pub fn normalize_capture_folder(folder: &str) -> Result<&str, PlanError> {
    let trimmed = folder.trim_end_matches('/');
    let invalid = || PlanError::InvalidCaptureFolder(folder.to_string());

    if trimmed.is_empty() || trimmed.contains('\\') {
        return Err(invalid());
    }
    if !Path::new(trimmed)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(invalid());
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::CaptureSettings;
    use chrono::Utc;
    use sqlx::types::Json;
    use std::collections::BTreeMap;

    fn capture(capture_type: CaptureType, formats: &[(SensorType, &str)]) -> CaptureInfo {
        CaptureInfo {
            capture_id: "cap-1".into(),
            participant_id: "p-1".into(),
            capture_type,
            capture_folder: "p-1/cap-1/".into(),
            capture_settings: Json(CaptureSettings {
                title: "Left hand".into(),
                output_formats: formats
                    .iter()
                    .map(|(s, f)| (*s, f.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            }),
            recapture: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn image_capture_has_single_camera_resource() {
        let plans =
            ResourcePlan::for_capture(&capture(CaptureType::Image, &[(SensorType::Camera, "jpg")]))
                .unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].sensor, SensorType::Camera);
        assert_eq!(plans[0].file_type, "jpg");
        assert_eq!(plans[0].resource_folder_relative_path, "p-1/cap-1/CAMERA");
        assert_eq!(plans[0].archive_relative_path, "p-1/cap-1/CAMERA.zip");
    }

    #[test]
    fn video_with_signal_plans_both_sensors_in_order() {
        let plans = ResourcePlan::for_capture(&capture(
            CaptureType::VideoWithSignal,
            &[(SensorType::Signal, "csv"), (SensorType::Camera, "mp4")],
        ))
        .unwrap();

        let sensors: Vec<_> = plans.iter().map(|p| p.sensor).collect();
        assert_eq!(sensors, vec![SensorType::Camera, SensorType::Signal]);
        assert_eq!(plans[1].file_type, "csv");
    }

    #[test]
    fn missing_format_is_rejected() {
        let err = ResourcePlan::for_capture(&capture(
            CaptureType::VideoWithSignal,
            &[(SensorType::Camera, "mp4")],
        ))
        .unwrap_err();

        assert_eq!(
            err,
            PlanError::MissingSensorFormat {
                capture_type: CaptureType::VideoWithSignal,
                sensor: SensorType::Signal,
            }
        );
    }

    #[test]
    fn escaping_folders_are_rejected() {
        for folder in ["", "/", "/abs/path", "p-1/../other", "./p-1", "a\\b"] {
            assert!(
                normalize_capture_folder(folder).is_err(),
                "{folder:?} should be rejected"
            );
        }
        assert_eq!(normalize_capture_folder("p-1/cap-1//").unwrap(), "p-1/cap-1");
    }
}
