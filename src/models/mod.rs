//! Core data models for the thumbnail service.
//!
//! Notifications come in as `event` types, rendered previews are described
//! in `thumbnail`, the dispatcher answers with a `report`, and `object`
//! mirrors the metadata table of the local storage backend.

pub mod event;
pub mod object;
pub mod report;
pub mod thumbnail;
