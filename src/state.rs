//! Shared application state handed to every handler.

use crate::services::{
    chunk_assembler::ChunkAssembler, file_store::FileStore, transfer_store::TransferStore,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: Arc<FileStore>,
    pub transfers: Arc<TransferStore>,
    pub assembler: Arc<ChunkAssembler>,

    /// Age past which an abandoned chunk session is evicted by the sweep.
    pub session_ttl: chrono::Duration,
}
