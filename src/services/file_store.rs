//! FileStore — the authoritative mapping from file id to file metadata,
//! backed by local disk for artifacts and one JSON snapshot for the index.
//!
//! The index is an in-memory map guarded by a single coarse lock; every
//! mutation rewrites the full snapshot and rolls the in-memory change back
//! if the snapshot write fails, so memory and disk stay convergent. The
//! store can also rebuild itself from a raw directory walk when the
//! snapshot is lost or corrupt.

use crate::content;
use crate::models::file_record::{FileRecord, STATUS_UPLOADED};
use crate::services::{
    CHUNKS_DIR, FILE_INDEX_FILE, StoreError, StoreResult, USER_FILES_DIR, is_internal_file,
    read_snapshot, write_snapshot,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, pin_mut};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// FileStore provides the metadata operations of the service:
/// - Store an upload (writes bytes to disk and publishes a record)
/// - Get / list / search records
/// - Owner-checked metadata edits, visibility changes, and deletes
/// - Expiry cleanup and recovery from a raw directory scan
///
/// Artifacts live at `storage_root/user_files/{file_id}/{name}`; the id
/// directory keeps same-named uploads from different users apart.
pub struct FileStore {
    storage_root: PathBuf,
    files_dir: PathBuf,

    /// Snapshot location; `None` disables persistence (in-memory store
    /// used as a no-disk-index test double).
    snapshot_path: Option<PathBuf>,

    records: Mutex<HashMap<String, FileRecord>>,
}

impl FileStore {
    /// Open a store rooted at `storage_root`, creating directories as
    /// needed and loading the snapshot.
    ///
    /// A missing or zero-length snapshot is treated as an empty store and
    /// re-initialized. Records whose backing file no longer exists are
    /// dropped during load and the pruned set is re-persisted immediately.
    pub async fn open(storage_root: impl Into<PathBuf>) -> StoreResult<Self> {
        let storage_root = storage_root.into();
        let store = Self {
            files_dir: storage_root.join(USER_FILES_DIR),
            snapshot_path: Some(storage_root.join(FILE_INDEX_FILE)),
            storage_root,
            records: Mutex::new(HashMap::new()),
        };
        fs::create_dir_all(&store.files_dir).await?;
        let loaded = store.reload().await?;
        info!(
            "file store opened at {} with {loaded} records",
            store.storage_root.display()
        );
        Ok(store)
    }

    /// Open a store that never touches an index snapshot. Artifact I/O
    /// still happens under `storage_root`.
    pub async fn in_memory(storage_root: impl Into<PathBuf>) -> StoreResult<Self> {
        let storage_root = storage_root.into();
        let store = Self {
            files_dir: storage_root.join(USER_FILES_DIR),
            snapshot_path: None,
            storage_root,
            records: Mutex::new(HashMap::new()),
        };
        fs::create_dir_all(&store.files_dir).await?;
        Ok(store)
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn files_dir(&self) -> &Path {
        &self.files_dir
    }

    /// Re-read the snapshot from disk, replacing the in-memory index.
    /// Returns the number of records loaded.
    pub async fn reload(&self) -> StoreResult<usize> {
        let Some(snapshot_path) = &self.snapshot_path else {
            return Ok(self.records.lock().await.len());
        };

        let list: Vec<FileRecord> = read_snapshot(snapshot_path).await?;
        let total = list.len();
        let mut loaded = HashMap::with_capacity(total);
        for record in list {
            if file_exists(&record.path).await {
                loaded.insert(record.id.clone(), record);
            } else {
                warn!(
                    "dropping record `{}`: backing file is gone",
                    record.id
                );
            }
        }
        if loaded.len() != total {
            warn!("pruned {} records during load", total - loaded.len());
        }

        let mut records = self.records.lock().await;
        *records = loaded;
        self.persist(&records).await?;
        Ok(records.len())
    }

    /// Insert or overwrite a record by id, then persist the full snapshot.
    /// The in-memory change is rolled back if the persist fails.
    pub async fn put(&self, record: FileRecord) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let prev = records.insert(record.id.clone(), record.clone());
        if let Err(err) = self.persist(&records).await {
            match prev {
                Some(prev) => {
                    records.insert(prev.id.clone(), prev);
                }
                None => {
                    records.remove(&record.id);
                }
            }
            return Err(err);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<FileRecord> {
        self.records.lock().await.get(id).cloned()
    }

    /// List a user's records, excluding any whose backing file has
    /// vanished. Vanished records are dropped from the index as a side
    /// effect (self-healing read).
    pub async fn list_by_owner(&self, user_id: &str) -> StoreResult<Vec<FileRecord>> {
        self.visible_records(|record| record.is_owned_by(user_id))
            .await
    }

    /// List every public record with an existing backing file.
    pub async fn public_files(&self) -> StoreResult<Vec<FileRecord>> {
        self.visible_records(|record| record.is_public).await
    }

    /// Case-insensitive substring search over display name and description,
    /// scoped to the caller's own files.
    pub async fn search(&self, query: &str, user_id: &str) -> StoreResult<Vec<FileRecord>> {
        if query.is_empty() {
            return self.list_by_owner(user_id).await;
        }
        let needle = query.to_lowercase();
        self.visible_records(|record| {
            record.is_owned_by(user_id)
                && (record.original_file_name.to_lowercase().contains(&needle)
                    || record.file_name.to_lowercase().contains(&needle)
                    || record
                        .description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle)))
        })
        .await
    }

    /// Store a single-shot upload: stream the payload to disk, then publish
    /// the record. A failed write leaves no partial artifact behind.
    pub async fn store_upload<S>(
        &self,
        original_name: &str,
        content_type: Option<String>,
        stream: S,
        user_id: &str,
    ) -> StoreResult<FileRecord>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if original_name.trim().is_empty() {
            return Err(StoreError::Validation("file name must not be empty".into()));
        }

        let id = Uuid::new_v4().to_string();
        let safe_name = content::sanitize_file_name(original_name, &id);
        let dest_dir = self.files_dir.join(&id);
        fs::create_dir_all(&dest_dir).await?;

        let tmp_path = dest_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: u64 = 0;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StoreError::Io(err));
                }
            };
            size += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }
        drop(file);

        let final_path = dest_dir.join(&safe_name);
        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        let content_type =
            content_type.or_else(|| Some(content::content_type_for(original_name).to_string()));
        let record = FileRecord {
            id: id.clone(),
            file_name: safe_name,
            original_file_name: original_name.to_string(),
            content_type,
            size,
            path: final_path.clone(),
            uploaded_at: Utc::now(),
            expires_at: None,
            uploaded_by: Some(user_id.to_string()),
            status: STATUS_UPLOADED.to_string(),
            checksum: None,
            is_public: false,
            download_count: 0,
            description: None,
        };

        if let Err(err) = self.put(record.clone()).await {
            // The record never became visible; remove the orphan artifact.
            let _ = fs::remove_file(&final_path).await;
            self.prune_empty_dirs(&dest_dir, &self.files_dir).await;
            return Err(err);
        }

        debug!("stored upload `{}` ({} bytes)", record.id, record.size);
        Ok(record)
    }

    /// Fetch a record and an open handle on its artifact, ready for
    /// streaming out. A record whose file has vanished reads as not-found.
    pub async fn open_reader(&self, id: &str) -> StoreResult<(FileRecord, File)> {
        let record = self
            .get(id)
            .await
            .ok_or_else(|| StoreError::FileNotFound(id.to_string()))?;
        let file = File::open(&record.path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::FileNotFound(id.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok((record, file))
    }

    /// Bump a record's download counter. The increment happens under the
    /// store lock, so concurrent downloads never lose counts.
    pub async fn increment_download(&self, id: &str) -> StoreResult<FileRecord> {
        self.mutate(id, None, |record| {
            record.download_count += 1;
            Ok(())
        })
        .await
    }

    /// Owner-only visibility flip.
    pub async fn update_visibility(
        &self,
        id: &str,
        is_public: bool,
        requester: &str,
    ) -> StoreResult<FileRecord> {
        self.mutate(id, Some(requester), |record| {
            record.is_public = is_public;
            Ok(())
        })
        .await
    }

    /// Owner-only edit of the display name and description.
    pub async fn update_metadata(
        &self,
        id: &str,
        display_name: Option<String>,
        description: Option<String>,
        requester: &str,
    ) -> StoreResult<FileRecord> {
        self.mutate(id, Some(requester), |record| {
            if let Some(name) = display_name {
                if name.trim().is_empty() {
                    return Err(StoreError::Validation(
                        "display name must not be empty".into(),
                    ));
                }
                record.original_file_name = name;
            }
            if let Some(description) = description {
                record.description = Some(description);
            }
            Ok(())
        })
        .await
    }

    /// Compute and store the artifact's SHA-256 checksum on demand.
    pub async fn compute_checksum(&self, id: &str) -> StoreResult<FileRecord> {
        let record = self
            .get(id)
            .await
            .ok_or_else(|| StoreError::FileNotFound(id.to_string()))?;
        let digest = content::checksum_file(&record.path).await?;
        self.mutate(id, None, move |record| {
            record.checksum = Some(digest);
            Ok(())
        })
        .await
    }

    /// Delete a record and its backing file. The file goes first; the
    /// record is only removed once the file deletion has succeeded, so a
    /// failed delete leaves no partial state change visible.
    pub async fn delete(&self, id: &str, requester: &str) -> StoreResult<FileRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get(id)
            .ok_or_else(|| StoreError::FileNotFound(id.to_string()))?
            .clone();
        if !record.is_owned_by(requester) {
            return Err(StoreError::Forbidden(id.to_string()));
        }

        match fs::remove_file(&record.path).await {
            Ok(_) => debug!("removed artifact {}", record.path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("artifact {} already missing", record.path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }
        if let Some(parent) = record.path.parent() {
            self.prune_empty_dirs(parent, &self.files_dir).await;
        }

        records.remove(id);
        if let Err(err) = self.persist(&records).await {
            // The artifact is already gone; restoring the record keeps
            // memory aligned with the snapshot, and the next listing will
            // self-heal it away.
            records.insert(record.id.clone(), record);
            return Err(err);
        }
        Ok(record)
    }

    /// Delete every record whose expiry has passed, artifact included.
    /// Returns the number of files removed. Persists only when something
    /// was removed.
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let expired: Vec<FileRecord> = records
            .values()
            .filter(|record| record.is_expired(now))
            .cloned()
            .collect();

        let mut removed = Vec::new();
        for record in expired {
            match fs::remove_file(&record.path).await {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        "could not delete expired artifact for `{}`: {err}",
                        record.id
                    );
                    continue;
                }
            }
            if let Some(parent) = record.path.parent() {
                self.prune_empty_dirs(parent, &self.files_dir).await;
            }
            records.remove(&record.id);
            info!("expired file `{}` deleted", record.id);
            removed.push(record);
        }

        if removed.is_empty() {
            return Ok(0);
        }
        let count = removed.len();
        if let Err(err) = self.persist(&records).await {
            for record in removed {
                records.insert(record.id.clone(), record);
            }
            return Err(err);
        }
        Ok(count)
    }

    /// Rebuild the index from a raw walk of the storage root.
    ///
    /// Every regular file other than the stores' own snapshot files and the
    /// chunk staging area becomes a fresh record with a generated id, a
    /// content type inferred from its extension, and size/mtime taken from
    /// the filesystem. Ownership, descriptions, and visibility are not
    /// recoverable and are left at their defaults (`owner` is applied to
    /// all synthesized records when supplied).
    pub async fn reconcile(&self, owner: Option<&str>) -> StoreResult<usize> {
        let mut found: HashMap<String, FileRecord> = HashMap::new();
        let mut stack = vec![self.storage_root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;

                if file_type.is_dir() {
                    // Half-assembled chunk uploads are not files yet.
                    if dir == self.storage_root && name == CHUNKS_DIR {
                        continue;
                    }
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() || is_internal_file(&name) {
                    continue;
                }

                let meta = entry.metadata().await?;
                let uploaded_at = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let id = Uuid::new_v4().to_string();
                found.insert(
                    id.clone(),
                    FileRecord {
                        id,
                        file_name: name.clone(),
                        original_file_name: name.clone(),
                        content_type: Some(content::content_type_for(&name).to_string()),
                        size: meta.len(),
                        path,
                        uploaded_at,
                        expires_at: None,
                        uploaded_by: owner.map(str::to_string),
                        status: STATUS_UPLOADED.to_string(),
                        checksum: None,
                        is_public: false,
                        download_count: 0,
                        description: None,
                    },
                );
            }
        }

        let count = found.len();
        let mut records = self.records.lock().await;
        let previous = std::mem::replace(&mut *records, found);
        if let Err(err) = self.persist(&records).await {
            *records = previous;
            return Err(err);
        }
        info!("reconciled index from disk: {count} files");
        Ok(count)
    }

    /// Shared filter for listings: applies `filter`, drops records whose
    /// backing file has vanished, and re-persists when anything was
    /// dropped.
    async fn visible_records<F>(&self, filter: F) -> StoreResult<Vec<FileRecord>>
    where
        F: Fn(&FileRecord) -> bool,
    {
        let mut records = self.records.lock().await;
        let mut visible = Vec::new();
        let mut missing = Vec::new();
        for record in records.values() {
            if !filter(record) {
                continue;
            }
            if file_exists(&record.path).await {
                visible.push(record.clone());
            } else {
                missing.push(record.id.clone());
            }
        }

        if !missing.is_empty() {
            warn!(
                "dropping {} records whose backing files are gone",
                missing.len()
            );
            let dropped: Vec<FileRecord> = missing
                .iter()
                .filter_map(|id| records.remove(id))
                .collect();
            if let Err(err) = self.persist(&records).await {
                warn!("could not persist after pruning: {err}");
                for record in dropped {
                    records.insert(record.id.clone(), record);
                }
            }
        }

        visible.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at));
        Ok(visible)
    }

    /// Apply `change` to a record under the store lock, persist, and roll
    /// the change back if the persist fails. When `requester` is given the
    /// record must be owned by them.
    async fn mutate<F>(
        &self,
        id: &str,
        requester: Option<&str>,
        change: F,
    ) -> StoreResult<FileRecord>
    where
        F: FnOnce(&mut FileRecord) -> StoreResult<()>,
    {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::FileNotFound(id.to_string()))?;
        if let Some(requester) = requester {
            if !record.is_owned_by(requester) {
                return Err(StoreError::Forbidden(id.to_string()));
            }
        }
        // The change runs against a copy so a validation error leaves the
        // live record untouched.
        let prev = record.clone();
        let mut updated = prev.clone();
        change(&mut updated)?;
        *record = updated.clone();
        if let Err(err) = self.persist(&records).await {
            records.insert(prev.id.clone(), prev);
            return Err(err);
        }
        Ok(updated)
    }

    async fn persist(&self, records: &HashMap<String, FileRecord>) -> StoreResult<()> {
        let Some(snapshot_path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut list: Vec<&FileRecord> = records.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        write_snapshot(snapshot_path, &list).await
    }

    /// Recursively remove empty directories up to `stop`.
    ///
    /// Stops when a directory is not empty, not found, or `stop` itself.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn file_exists(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
