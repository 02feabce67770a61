//! Shared handler state.

use crate::services::{capture_locks::CaptureLocks, capture_pipeline::CapturePipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: CapturePipeline,
    /// Serializes finalize/delete per capture id.
    pub locks: CaptureLocks,
}

impl AppState {
    pub fn new(pipeline: CapturePipeline) -> Self {
        Self {
            pipeline,
            locks: CaptureLocks::new(),
        }
    }
}
