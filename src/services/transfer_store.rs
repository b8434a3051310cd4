//! TransferStore — the state machine governing third-party access grants,
//! layered on top of the [`FileStore`] and persisted to its own snapshot.

use crate::models::transfer::{TransferRequest, TransferStatus};
use crate::services::file_store::FileStore;
use crate::services::{
    StoreError, StoreResult, TRANSFERS_FILE, read_snapshot, write_snapshot,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Caller-supplied fields for a new transfer request. Everything else —
/// id, code, status, timestamps — is assigned by the store.
#[derive(Debug, Default)]
pub struct NewTransfer {
    pub file_id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_limit: Option<i64>,
    pub notify_on_download: Option<bool>,
    pub message: Option<String>,
}

/// Sender-editable fields of an existing request. Status is deliberately
/// absent: it only moves through `cancel` and the expiry sweep.
#[derive(Debug, Default)]
pub struct TransferUpdate {
    pub expires_at: Option<DateTime<Utc>>,
    pub download_limit: Option<i64>,
    pub notify_on_download: Option<bool>,
    pub message: Option<String>,
}

/// Result of redeeming an access code.
#[derive(Debug)]
pub enum AccessOutcome {
    /// Code accepted; the counter has been incremented and persisted.
    Granted(TransferRequest),
    /// Id and code matched but the request is expired, cancelled, or out
    /// of downloads — returned unmodified so the caller can say which.
    Inactive(TransferRequest),
    /// Unknown id or wrong code. Indistinguishable on purpose.
    Denied,
}

/// Owns every [`TransferRequest`], guarded by one coarse lock and written
/// through to `transfers.json` on each mutation.
pub struct TransferStore {
    snapshot_path: Option<PathBuf>,
    retention_days: i64,
    files: Arc<FileStore>,
    requests: Mutex<HashMap<String, TransferRequest>>,
}

impl TransferStore {
    /// Open the store, loading any existing snapshot from the file store's
    /// storage root.
    pub async fn open(files: Arc<FileStore>, retention_days: i64) -> StoreResult<Self> {
        let snapshot_path = files.storage_root().join(TRANSFERS_FILE);
        let store = Self {
            snapshot_path: Some(snapshot_path),
            retention_days,
            files,
            requests: Mutex::new(HashMap::new()),
        };
        let loaded = store.reload().await?;
        info!("transfer store opened with {loaded} requests");
        Ok(store)
    }

    /// Open a store with persistence disabled.
    pub fn in_memory(files: Arc<FileStore>, retention_days: i64) -> Self {
        Self {
            snapshot_path: None,
            retention_days,
            files,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Re-read the snapshot from disk, replacing the in-memory set.
    pub async fn reload(&self) -> StoreResult<usize> {
        let Some(snapshot_path) = &self.snapshot_path else {
            return Ok(self.requests.lock().await.len());
        };
        let list: Vec<TransferRequest> = read_snapshot(snapshot_path).await?;
        let mut requests = self.requests.lock().await;
        *requests = list
            .into_iter()
            .map(|request| (request.id.clone(), request))
            .collect();
        self.persist(&requests).await?;
        Ok(requests.len())
    }

    /// Create a transfer request for an existing file.
    ///
    /// Whatever status the caller had in mind, the stored request is
    /// `ACTIVE`: a 6-digit access code and the default retention expiry are
    /// assigned here, and the request is persisted before it is returned.
    pub async fn create(&self, new: NewTransfer) -> StoreResult<TransferRequest> {
        if new.file_id.is_empty() {
            return Err(StoreError::Validation("file id must not be empty".into()));
        }
        if new.sender_id.is_empty() {
            return Err(StoreError::Validation("sender id must not be empty".into()));
        }
        let download_limit = new.download_limit.unwrap_or(-1);
        if download_limit < -1 {
            return Err(StoreError::Validation(
                "download limit must be -1 (unlimited) or non-negative".into(),
            ));
        }
        if self.files.get(&new.file_id).await.is_none() {
            return Err(StoreError::FileNotFound(new.file_id));
        }

        let now = Utc::now();
        let request = TransferRequest {
            id: Uuid::new_v4().to_string(),
            file_id: new.file_id,
            sender_id: new.sender_id,
            recipient_id: new.recipient_id,
            recipient_email: new.recipient_email,
            created_at: now,
            expires_at: new
                .expires_at
                .or_else(|| Some(now + Duration::days(self.retention_days))),
            status: TransferStatus::Active,
            access_code: generate_access_code(),
            download_limit,
            download_count: 0,
            notify_on_download: new.notify_on_download.unwrap_or(true),
            message: new.message,
        };

        let mut requests = self.requests.lock().await;
        requests.insert(request.id.clone(), request.clone());
        if let Err(err) = self.persist(&requests).await {
            requests.remove(&request.id);
            return Err(err);
        }
        info!("transfer request `{}` created for `{}`", request.id, request.file_id);
        Ok(request)
    }

    pub async fn get(&self, id: &str) -> Option<TransferRequest> {
        self.requests.lock().await.get(id).cloned()
    }

    /// Requests created by `user_id`.
    pub async fn sent_by(&self, user_id: &str) -> Vec<TransferRequest> {
        self.filtered(|request| request.sender_id == user_id).await
    }

    /// Requests addressed to `user_id`.
    pub async fn received_by(&self, user_id: &str) -> Vec<TransferRequest> {
        self.filtered(|request| request.recipient_id.as_deref() == Some(user_id))
            .await
    }

    /// Redeem an access code.
    ///
    /// Unknown id or wrong code is a flat denial. A known-but-inactive
    /// request is handed back untouched so the caller can report why it is
    /// inactive. An active request has its counter incremented and
    /// persisted before it is returned.
    pub async fn access_by_code(&self, id: &str, code: &str) -> StoreResult<AccessOutcome> {
        let mut requests = self.requests.lock().await;
        let Some(request) = requests.get_mut(id) else {
            return Ok(AccessOutcome::Denied);
        };
        if !code_matches(&request.access_code, code) {
            return Ok(AccessOutcome::Denied);
        }
        if !request.is_active(Utc::now()) {
            return Ok(AccessOutcome::Inactive(request.clone()));
        }

        let prev = request.clone();
        request.download_count += 1;
        let granted = request.clone();
        if let Err(err) = self.persist(&requests).await {
            requests.insert(prev.id.clone(), prev);
            return Err(err);
        }
        Ok(AccessOutcome::Granted(granted))
    }

    /// Cancel a request. Only the sender may do this; a request already in
    /// a terminal state is returned unchanged, never reactivated.
    pub async fn cancel(&self, id: &str, requester: &str) -> StoreResult<TransferRequest> {
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| StoreError::TransferNotFound(id.to_string()))?;
        if request.sender_id != requester {
            return Err(StoreError::Forbidden(id.to_string()));
        }
        if request.status.is_terminal() {
            return Ok(request.clone());
        }

        let prev = request.clone();
        request.status = TransferStatus::Cancelled;
        let cancelled = request.clone();
        if let Err(err) = self.persist(&requests).await {
            requests.insert(prev.id.clone(), prev);
            return Err(err);
        }
        info!("transfer request `{id}` cancelled");
        Ok(cancelled)
    }

    /// Sender-only edit of expiry, limit, notify flag, and message.
    pub async fn update(
        &self,
        id: &str,
        changes: TransferUpdate,
        requester: &str,
    ) -> StoreResult<TransferRequest> {
        if let Some(limit) = changes.download_limit {
            if limit < -1 {
                return Err(StoreError::Validation(
                    "download limit must be -1 (unlimited) or non-negative".into(),
                ));
            }
        }
        let mut requests = self.requests.lock().await;
        let request = requests
            .get_mut(id)
            .ok_or_else(|| StoreError::TransferNotFound(id.to_string()))?;
        if request.sender_id != requester {
            return Err(StoreError::Forbidden(id.to_string()));
        }

        let prev = request.clone();
        if let Some(expires_at) = changes.expires_at {
            request.expires_at = Some(expires_at);
        }
        if let Some(limit) = changes.download_limit {
            request.download_limit = limit;
        }
        if let Some(notify) = changes.notify_on_download {
            request.notify_on_download = notify;
        }
        if let Some(message) = changes.message {
            request.message = Some(message);
        }
        let updated = request.clone();
        if let Err(err) = self.persist(&requests).await {
            requests.insert(prev.id.clone(), prev);
            return Err(err);
        }
        Ok(updated)
    }

    /// Mark every non-terminal request whose expiry has passed as
    /// `EXPIRED`. Persists once for the whole batch, and not at all when
    /// nothing expired.
    pub async fn cleanup_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut requests = self.requests.lock().await;

        let mut previous = Vec::new();
        for request in requests.values_mut() {
            if request.status.is_terminal() || !request.is_expired(now) {
                continue;
            }
            previous.push(request.clone());
            request.status = TransferStatus::Expired;
            info!("transfer request `{}` expired", request.id);
        }

        if previous.is_empty() {
            return Ok(0);
        }
        let count = previous.len();
        if let Err(err) = self.persist(&requests).await {
            for request in previous {
                requests.insert(request.id.clone(), request);
            }
            return Err(err);
        }
        Ok(count)
    }

    async fn filtered<F>(&self, filter: F) -> Vec<TransferRequest>
    where
        F: Fn(&TransferRequest) -> bool,
    {
        let requests = self.requests.lock().await;
        let mut matches: Vec<TransferRequest> =
            requests.values().filter(|r| filter(r)).cloned().collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matches
    }

    async fn persist(&self, requests: &HashMap<String, TransferRequest>) -> StoreResult<()> {
        let Some(snapshot_path) = &self.snapshot_path else {
            return Ok(());
        };
        let mut list: Vec<&TransferRequest> = requests.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        write_snapshot(snapshot_path, &list).await
    }
}

/// Zero-padded 6-digit numeric access code.
///
/// Collisions across requests are not checked: a code is only ever looked
/// up together with its transfer id.
fn generate_access_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Constant-time code comparison.
fn code_matches(expected: &str, received: &str) -> bool {
    if expected.len() != received.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected.bytes().zip(received.bytes()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_access_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn code_comparison() {
        assert!(code_matches("042137", "042137"));
        assert!(!code_matches("042137", "042138"));
        assert!(!code_matches("042137", "42137"));
    }
}
