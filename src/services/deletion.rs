//! Removes a capture's record tree and its durable folder.

use crate::{
    models::plan::normalize_capture_folder,
    services::{
        capture_pipeline::PipelineResult, file_area::FileArea, record_store::RecordStore,
    },
};
use tracing::{debug, info, instrument, warn};

/// Delete every record and file belonging to `capture_id`.
///
/// Returns `true` when the capture is gone afterwards, including when it
/// never existed. Returns `false` only when the records were removed but the
/// capture folder could not be deleted. An emptied participant folder is
/// removed best-effort.
#[instrument(skip(records, files))]
pub async fn delete_capture(
    records: &dyn RecordStore,
    files: &FileArea,
    capture_id: &str,
) -> PipelineResult<bool> {
    let Some(capture) = records.get_capture(capture_id).await? else {
        debug!("capture not found, nothing to delete");
        return Ok(true);
    };
    let folder = normalize_capture_folder(&capture.capture_folder)?;

    let removed = records.delete_all_records_for_capture(capture_id).await?;
    debug!(removed, "capture records deleted");

    let capture_dir = files.durable(folder);
    if let Err(err) = files.delete_recursive(&capture_dir).await {
        warn!("failed to remove capture folder {}: {}", capture_dir.display(), err);
        return Ok(false);
    }

    if let Some(participant_dir) = capture_dir.parent() {
        if participant_dir != files.durable_root() {
            match files.remove_if_empty(participant_dir).await {
                Ok(true) => debug!("removed empty folder {}", participant_dir.display()),
                Ok(false) => {}
                Err(err) => debug!(
                    "failed to prune folder {}: {}",
                    participant_dir.display(),
                    err
                ),
            }
        }
    }

    info!("capture deleted");
    Ok(true)
}
