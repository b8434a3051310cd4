//! Chunk assembler — tracks partial uploads per file id, detects
//! completion, and concatenates the chunks into one artifact.
//!
//! Each chunk is written durably to `chunks/{file_id}/{index}` before its
//! index is marked received, so a failed write never corrupts the received
//! set. A per-file lock guards the mark → completion-check → combine
//! sequence: concurrent chunks for different files assemble in parallel,
//! but the combine for one file runs exactly once.

use crate::content;
use crate::models::file_record::{FileRecord, STATUS_UPLOADED};
use crate::services::file_store::FileStore;
use crate::services::{CHUNKS_DIR, StoreError, StoreResult, USER_FILES_DIR};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of accepting one chunk.
#[derive(Debug)]
pub enum ChunkOutcome {
    /// More chunks are still missing.
    Pending { received: u32, total: u32 },
    /// This chunk completed the upload; the record is published.
    Complete(FileRecord),
}

/// Transient bookkeeping for one in-progress chunked upload.
#[derive(Debug)]
struct ChunkSession {
    received: HashSet<u32>,
    created_at: DateTime<Utc>,
    /// Set once the combine has been claimed; late duplicates of the final
    /// chunk must not trigger a second assembly.
    completed: bool,
}

impl ChunkSession {
    fn new() -> Self {
        Self {
            received: HashSet::new(),
            created_at: Utc::now(),
            completed: false,
        }
    }
}

/// Reassembles chunked uploads and hands completed files to the
/// [`FileStore`].
pub struct ChunkAssembler {
    chunks_dir: PathBuf,
    files_dir: PathBuf,
    retention_days: i64,
    files: Arc<FileStore>,

    /// Session handles by file id. The outer lock is held only long enough
    /// to fetch or insert a handle; all real work happens under the
    /// per-file session lock.
    sessions: Mutex<HashMap<String, Arc<Mutex<ChunkSession>>>>,
}

impl ChunkAssembler {
    pub fn new(files: Arc<FileStore>, retention_days: i64) -> Self {
        let storage_root = files.storage_root().to_path_buf();
        Self {
            chunks_dir: storage_root.join(CHUNKS_DIR),
            files_dir: storage_root.join(USER_FILES_DIR),
            retention_days,
            files,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Accept one chunk of an upload.
    ///
    /// `total_chunks` is restated on every call rather than stored
    /// per-session. Completion requires every index in `[0, total_chunks)`
    /// to have been received; duplicates and out-of-range indices can never
    /// complete an upload early.
    pub async fn receive_chunk(
        &self,
        file_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        payload: Bytes,
        user_id: &str,
    ) -> StoreResult<ChunkOutcome> {
        ensure_file_id_safe(file_id)?;
        if total_chunks == 0 {
            return Err(StoreError::Validation(
                "total chunk count must be positive".into(),
            ));
        }
        if chunk_index >= total_chunks {
            return Err(StoreError::Validation(format!(
                "chunk index {chunk_index} exceeds total chunks {total_chunks}"
            )));
        }

        let handle = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .entry(file_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(ChunkSession::new())))
                .clone()
        };
        let mut session = handle.lock().await;

        if session.completed {
            // A duplicate of the final chunk racing the combine; the
            // artifact is already being assembled.
            return Ok(ChunkOutcome::Pending {
                received: session.received.len() as u32,
                total: total_chunks,
            });
        }

        // Write the chunk durably before marking it received.
        let chunk_dir = self.chunks_dir.join(file_id);
        fs::create_dir_all(&chunk_dir).await?;
        let chunk_path = chunk_dir.join(chunk_index.to_string());
        let mut chunk_file = File::create(&chunk_path).await?;
        if let Err(err) = chunk_file.write_all(&payload).await {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = chunk_file.sync_all().await {
            let _ = fs::remove_file(&chunk_path).await;
            return Err(StoreError::Io(err));
        }
        drop(chunk_file);

        session.received.insert(chunk_index);
        debug!(
            "chunk {chunk_index}/{total_chunks} received for `{file_id}` ({} so far)",
            session.received.len()
        );

        // Size equality alone would be fooled by duplicates; every index
        // must actually be covered.
        let complete = session.received.len() == total_chunks as usize
            && (0..total_chunks).all(|i| session.received.contains(&i));
        if !complete {
            return Ok(ChunkOutcome::Pending {
                received: session.received.len() as u32,
                total: total_chunks,
            });
        }

        session.completed = true;
        {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(file_id);
        }

        let result = self.combine(file_id, total_chunks, user_id).await;
        if let Err(err) = fs::remove_dir_all(&chunk_dir).await {
            if err.kind() != ErrorKind::NotFound {
                warn!("could not remove chunk directory for `{file_id}`: {err}");
            }
        }
        match result {
            Ok(record) => {
                info!(
                    "chunked upload `{file_id}` assembled ({} bytes)",
                    record.size
                );
                Ok(ChunkOutcome::Complete(record))
            }
            Err(err) => {
                // Failed assemblies leave no trace under the artifact root.
                let _ = fs::remove_dir(self.files_dir.join(file_id)).await;
                Err(err)
            }
        }
    }

    /// Concatenate the chunks in index order into the final artifact,
    /// checksum the result, and publish the record. The record is only
    /// published after the artifact is fully written and fsynced.
    async fn combine(
        &self,
        file_id: &str,
        total_chunks: u32,
        user_id: &str,
    ) -> StoreResult<FileRecord> {
        let chunk_dir = self.chunks_dir.join(file_id);
        let existing = self.files.get(file_id).await;
        let display_name = existing
            .as_ref()
            .map(|record| record.original_file_name.clone())
            .unwrap_or_else(|| file_id.to_string());
        let safe_name = content::sanitize_file_name(&display_name, file_id);

        let dest_dir = self.files_dir.join(file_id);
        fs::create_dir_all(&dest_dir).await?;
        let tmp_path = dest_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut out = File::create(&tmp_path).await?;

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        for index in 0..total_chunks {
            let chunk_path = chunk_dir.join(index.to_string());
            let bytes = match fs::read(&chunk_path).await {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    // The index discipline should make this impossible; a
                    // truncated artifact must never be published anyway.
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::ChunkMissing {
                        file_id: file_id.to_string(),
                        index,
                    });
                }
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            hasher.update(&bytes);
            size += bytes.len() as u64;
            if let Err(err) = out.write_all(&bytes).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = out.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = out.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(out);

        let final_path = dest_dir.join(&safe_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let checksum = content::hex_digest(&hasher.finalize());
        let now = Utc::now();
        let record = match existing {
            Some(mut record) => {
                record.file_name = safe_name;
                record.path = final_path.clone();
                record.size = size;
                record.status = STATUS_UPLOADED.to_string();
                record.checksum = Some(checksum);
                record
            }
            None => FileRecord {
                id: file_id.to_string(),
                file_name: safe_name.clone(),
                original_file_name: display_name,
                content_type: Some(content::content_type_for(&safe_name).to_string()),
                size,
                path: final_path.clone(),
                uploaded_at: now,
                expires_at: Some(now + Duration::days(self.retention_days)),
                uploaded_by: Some(user_id.to_string()),
                status: STATUS_UPLOADED.to_string(),
                checksum: Some(checksum),
                is_public: false,
                download_count: 0,
                description: None,
            },
        };

        if let Err(err) = self.files.put(record.clone()).await {
            // Publishing failed; a record must never point at an artifact
            // the index doesn't know about, so remove the remnant.
            let _ = fs::remove_file(&final_path).await;
            return Err(err);
        }
        Ok(record)
    }

    /// Evict sessions older than `max_age` along with their chunk
    /// directories. Clients that abandon an upload never call back, so this
    /// sweep is the only reclamation path.
    pub async fn evict_stale(&self, max_age: Duration) -> StoreResult<usize> {
        let cutoff = Utc::now() - max_age;
        let mut sessions = self.sessions.lock().await;

        let stale: Vec<String> = sessions
            .iter()
            .filter_map(|(id, handle)| {
                // A locked session has a chunk in flight; skip it this
                // round.
                let session = handle.try_lock().ok()?;
                (session.created_at < cutoff).then(|| id.clone())
            })
            .collect();

        for id in &stale {
            sessions.remove(id);
            if let Err(err) = fs::remove_dir_all(self.chunks_dir.join(id)).await {
                if err.kind() != ErrorKind::NotFound {
                    warn!("could not remove stale chunk directory for `{id}`: {err}");
                }
            }
            info!("evicted stale chunk session `{id}`");
        }
        Ok(stale.len())
    }

    /// Number of uploads currently in flight.
    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

/// File ids name directories under the staging and artifact roots, so they
/// must not smuggle path components.
fn ensure_file_id_safe(file_id: &str) -> StoreResult<()> {
    if file_id.is_empty() || file_id.len() > 128 {
        return Err(StoreError::Validation("invalid file id".into()));
    }
    if file_id.contains("..")
        || file_id
            .bytes()
            .any(|b| b == b'/' || b == b'\\' || b == b'\0' || b.is_ascii_control())
    {
        return Err(StoreError::Validation("invalid file id".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_path_like_file_ids() {
        assert!(ensure_file_id_safe("../../etc/passwd").is_err());
        assert!(ensure_file_id_safe("a/b").is_err());
        assert!(ensure_file_id_safe("a\\b").is_err());
        assert!(ensure_file_id_safe("").is_err());
        assert!(ensure_file_id_safe("7e6f00a2-3c1d-4a8e-9f21-0c5d8b2f9ab1").is_ok());
    }
}
