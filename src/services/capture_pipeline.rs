//! src/services/capture_pipeline.rs
//!
//! CapturePipeline — finalizes a recorded capture into durable records and
//! uploadable archives. Each call to [`CapturePipeline::finalize`] returns a
//! stream of [`LifecycleEvent`]s; the work happens as the stream is polled,
//! one step per event. Steps are not rolled back: a failure ends the stream
//! with an error and leaves everything already written in place.

use crate::{
    models::{
        capture::CaptureInfo,
        event::LifecycleEvent,
        plan::{PlanError, ResourcePlan},
        resource::{ResourceInfo, UploadRequest, UploadStatus},
    },
    services::{
        archiver::{ArchiveError, archive_folder},
        deletion::delete_capture,
        file_area::FileArea,
        record_store::{RecordError, RecordStore},
    },
};
use async_stream::try_stream;
use chrono::Utc;
use futures::Stream;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("archiving failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error("record store failure: {0}")]
    Records(#[from] RecordError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("pipeline task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Upload destination settings stamped onto new resources and requests.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub bucket_name: String,
    /// Base bucket URL; archive paths are appended to it.
    pub upload_base_url: String,
    pub multipart: bool,
}

impl PipelineConfig {
    fn upload_url(&self, archive_relative_path: &str) -> String {
        format!(
            "{}/{}",
            self.upload_base_url.trim_end_matches('/'),
            archive_relative_path
        )
    }
}

/// Finalization and deletion of captures against injected collaborators.
///
/// Holds no per-capture state; callers serialize operations on the same
/// capture id (see `CaptureLocks`).
#[derive(Clone)]
pub struct CapturePipeline {
    records: Arc<dyn RecordStore>,
    files: FileArea,
    config: PipelineConfig,
}

impl CapturePipeline {
    pub fn new(records: Arc<dyn RecordStore>, files: FileArea, config: PipelineConfig) -> Self {
        Self {
            records,
            files,
            config,
        }
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn files(&self) -> &FileArea {
        &self.files
    }

    /// Finalize a capture, yielding one event per completed step.
    ///
    /// Order: `CaptureInfoCreated`, then per sensor `ResourceMetaInfoCreated`
    /// and `UploadRequestCreated`, then `ResourcesStored`. A failed step
    /// yields a single `Err` and ends the stream.
    pub fn finalize(
        &self,
        info: CaptureInfo,
    ) -> impl Stream<Item = PipelineResult<LifecycleEvent>> + Send + 'static {
        let pipeline = self.clone();
        try_stream! {
            let plans = pipeline.plan(&info)?;

            if info.recapture {
                pipeline.supersede(&info).await?;
            }

            pipeline.create_capture(&info).await?;
            yield emitted(LifecycleEvent::CaptureInfoCreated {
                capture_id: info.capture_id.clone(),
            });

            for plan in &plans {
                let resource = pipeline.create_resource(&info, plan).await?;
                yield emitted(LifecycleEvent::ResourceMetaInfoCreated {
                    resource_info_id: resource.resource_info_id,
                });

                let request = pipeline.store_resource(&resource, plan).await?;
                yield emitted(LifecycleEvent::UploadRequestCreated {
                    request_id: request.request_id,
                });
            }

            yield emitted(LifecycleEvent::ResourcesStored {
                capture_id: info.capture_id.clone(),
            });
        }
    }

    /// Remove all records and files of a capture. See [`delete_capture`].
    pub async fn delete(&self, capture_id: &str) -> PipelineResult<bool> {
        delete_capture(self.records.as_ref(), &self.files, capture_id).await
    }

    fn plan(&self, info: &CaptureInfo) -> PipelineResult<Vec<ResourcePlan>> {
        Ok(ResourcePlan::for_capture(info)?)
    }

    /// Drop the capture this one replaces and promote the new recording
    /// from staging. A recapture of a capture that was never stored is a
    /// no-op.
    async fn supersede(&self, info: &CaptureInfo) -> PipelineResult<()> {
        let Some(previous) = self.records.get_capture(&info.capture_id).await? else {
            debug!(capture_id = %info.capture_id, "recapture has no previous capture");
            return Ok(());
        };

        if !self.delete(&previous.capture_id).await? {
            warn!(
                capture_id = %info.capture_id,
                "previous capture folder was not fully removed, merging new recording over it"
            );
        }

        let src = self.files.staging(&info.capture_folder);
        let dst = self.files.durable(&info.capture_folder);
        self.files.move_directory(&src, &dst).await?;
        info!(capture_id = %info.capture_id, "superseded previous capture");
        Ok(())
    }

    async fn create_capture(&self, info: &CaptureInfo) -> PipelineResult<()> {
        self.records.add_capture(info).await?;
        Ok(())
    }

    async fn create_resource(
        &self,
        info: &CaptureInfo,
        plan: &ResourcePlan,
    ) -> PipelineResult<ResourceInfo> {
        let resource = ResourceInfo {
            resource_info_id: Uuid::new_v4(),
            capture_id: info.capture_id.clone(),
            participant_id: info.participant_id.clone(),
            capture_title: info.capture_settings.title.clone(),
            sensor_type: plan.sensor,
            file_type: plan.file_type.clone(),
            resource_folder_relative_path: plan.resource_folder_relative_path.clone(),
            upload_url: self.config.upload_url(&plan.archive_relative_path),
            status: UploadStatus::Pending,
        };
        self.records.add_resource(&resource).await?;
        Ok(resource)
    }

    /// Archive the sensor folder and register the upload request for it.
    ///
    /// If archiving fails the resource is marked FAILED and the partial
    /// archive is left on disk.
    async fn store_resource(
        &self,
        resource: &ResourceInfo,
        plan: &ResourcePlan,
    ) -> PipelineResult<UploadRequest> {
        let source = self.files.durable(&plan.resource_folder_relative_path);
        let destination = self.files.durable(&plan.archive_relative_path);

        let file_size = match archive_folder(&source, &destination).await {
            Ok(size) => size,
            Err(err) => {
                warn!(
                    resource_info_id = %resource.resource_info_id,
                    "archiving {} failed: {}",
                    source.display(),
                    err
                );
                if let Err(mark_err) = self
                    .records
                    .update_resource_status(resource.resource_info_id, UploadStatus::Failed)
                    .await
                {
                    warn!(
                        resource_info_id = %resource.resource_info_id,
                        "could not mark resource failed: {}",
                        mark_err
                    );
                }
                return Err(err.into());
            }
        };

        let request = UploadRequest {
            request_id: Uuid::new_v4(),
            resource_info_id: resource.resource_info_id,
            archive_path: destination.to_string_lossy().into_owned(),
            file_size: file_size as i64,
            file_offset: 0,
            bucket_name: self.config.bucket_name.clone(),
            upload_relative_url: plan.archive_relative_path.clone(),
            is_multi_part: self.config.multipart,
            next_part: 1,
            upload_id: None,
            status: UploadStatus::Pending,
            last_updated_time: Utc::now(),
        };
        self.records.add_upload_request(&request).await?;
        Ok(request)
    }
}

fn emitted(event: LifecycleEvent) -> LifecycleEvent {
    info!(?event, "lifecycle event");
    event
}
