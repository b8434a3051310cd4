//! filedrop — a small file-sharing service.
//!
//! Users upload files (whole or in chunks), manage their metadata, and
//! hand out code-protected transfer links that third parties redeem
//! without an account. Metadata lives in an in-memory index snapshotted to
//! JSON on every mutation; artifacts live on local disk under a single
//! storage root.

pub mod config;
pub mod content;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
