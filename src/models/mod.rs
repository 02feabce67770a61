//! Core data models for the capture lifecycle service.
//!
//! Captures own resources, resources own exactly one upload request. The
//! row types map to SQLite tables via `sqlx::FromRow` and serialize as
//! camelCase JSON via `serde`.

pub mod capture;
pub mod event;
pub mod plan;
pub mod resource;
