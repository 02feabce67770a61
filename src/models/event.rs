//! Progress markers emitted while a capture is finalized.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One discrete step of the finalization pipeline.
///
/// For a single capture the order is always `CaptureInfoCreated`, then per
/// sensor `ResourceMetaInfoCreated` followed by its `UploadRequestCreated`,
/// then `ResourcesStored`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    CaptureInfoCreated { capture_id: String },
    ResourceMetaInfoCreated { resource_info_id: Uuid },
    UploadRequestCreated { request_id: Uuid },
    ResourcesStored { capture_id: String },
}

impl LifecycleEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleEvent::ResourcesStored { .. })
    }
}
