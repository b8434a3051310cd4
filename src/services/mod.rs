//! Service layer: the metadata store, the chunk assembler, and the
//! transfer-access controller, plus the snapshot persistence they share.
//!
//! Each store owns one JSON snapshot file under the storage root and
//! rewrites it in full on every mutation: serialize to a temp file, rotate
//! the previous snapshot to `.bak`, then rename the temp file into place.

pub mod chunk_assembler;
pub mod file_store;
pub mod transfer_store;

use serde::{Serialize, de::DeserializeOwned};
use std::io::{self, ErrorKind};
use std::path::Path;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use tracing::warn;
use uuid::Uuid;

/// Snapshot file for file records.
pub(crate) const FILE_INDEX_FILE: &str = "fileindex.json";

/// Snapshot file for transfer requests.
pub(crate) const TRANSFERS_FILE: &str = "transfers.json";

/// Directory holding completed artifacts, one subdirectory per file id.
pub(crate) const USER_FILES_DIR: &str = "user_files";

/// Staging area for in-flight chunked uploads.
pub(crate) const CHUNKS_DIR: &str = "chunks";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("transfer request `{0}` not found")]
    TransferNotFound(String),
    #[error("requester is not the owner of `{0}`")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("chunk {index} of upload `{file_id}` missing at combine time")]
    ChunkMissing { file_id: String, index: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// True for files the stores create for themselves; the recovery scan must
/// never synthesize records for these.
pub(crate) fn is_internal_file(name: &str) -> bool {
    name == FILE_INDEX_FILE
        || name == TRANSFERS_FILE
        || name.ends_with(".bak")
        || name.starts_with(".tmp-")
}

/// Atomically replace `snapshot_path` with the serialized `items`.
///
/// The write goes to a sibling temp file which is fsynced before the rename,
/// so a crash leaves either the old snapshot or the new one, never a torn
/// file. The previous snapshot survives one generation as `.bak`.
pub(crate) async fn write_snapshot<T: Serialize>(
    snapshot_path: &Path,
    items: &[T],
) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(items)?;

    let parent = snapshot_path.parent().ok_or_else(|| {
        StoreError::Io(io::Error::other("snapshot path missing parent directory"))
    })?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

    let mut file = fs::File::create(&tmp_path).await?;
    if let Err(err) = file.write_all(&bytes).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    drop(file);

    // Best-effort rotation of the previous snapshot; an existing .bak is
    // overwritten.
    let bak_path = snapshot_path.with_extension("json.bak");
    match fs::rename(snapshot_path, &bak_path).await {
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(
            "could not rotate snapshot {} to backup: {err}",
            snapshot_path.display()
        ),
    }

    if let Err(err) = fs::rename(&tmp_path, snapshot_path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(err.into());
    }
    Ok(())
}

/// Load a snapshot, treating a missing, empty, or unreadable file as an
/// empty store. Only genuine I/O errors propagate.
pub(crate) async fn read_snapshot<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    match fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => {
            warn!("snapshot {} is empty, re-initializing", path.display());
            Ok(Vec::new())
        }
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(items) => Ok(items),
            Err(err) => {
                warn!(
                    "snapshot {} is unreadable, starting empty: {err}",
                    path.display()
                );
                Ok(Vec::new())
            }
        },
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}
