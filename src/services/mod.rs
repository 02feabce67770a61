pub mod archiver;
pub mod capture_locks;
pub mod capture_pipeline;
pub mod deletion;
pub mod file_area;
pub mod record_store;
