//! Core data models for the file-sharing service.
//!
//! These entities represent stored files and the transfer grants layered on
//! top of them. They serialize naturally as JSON via `serde`, both in the
//! snapshot files and in API responses.

pub mod file_record;
pub mod response;
pub mod transfer;
