//! Represents one uploaded file's metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Lifecycle status a record carries once its artifact is fully on disk.
pub const STATUS_UPLOADED: &str = "UPLOADED";

/// Metadata for a single stored file.
///
/// The record describes the artifact; the bytes themselves live at `path`.
/// A record is only visible to callers while its backing file exists.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FileRecord {
    /// Opaque unique id, generated at creation and immutable.
    pub id: String,

    /// Sanitized name the artifact is stored under.
    pub file_name: String,

    /// Name the uploader supplied, kept for display.
    pub original_file_name: String,

    /// MIME type, inferred from the extension when not supplied.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size: u64,

    /// Location of the backing artifact.
    pub path: PathBuf,

    /// When the upload completed.
    pub uploaded_at: DateTime<Utc>,

    /// When the file becomes eligible for the expiry sweep, if ever.
    pub expires_at: Option<DateTime<Utc>>,

    /// Owning user id. Unset for records synthesized by a recovery scan.
    pub uploaded_by: Option<String>,

    /// Lifecycle status (currently always `UPLOADED`).
    pub status: String,

    /// Lowercase hex SHA-256 of the content, computed on chunk assembly or
    /// on demand.
    pub checksum: Option<String>,

    /// Whether non-owners may read the file.
    pub is_public: bool,

    /// Number of completed downloads.
    pub download_count: u64,

    /// Free-text description, editable by the owner.
    pub description: Option<String>,
}

impl FileRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now > expiry,
            None => false,
        }
    }

    /// True when `user_id` owns this record.
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.uploaded_by.as_deref() == Some(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record() -> FileRecord {
        FileRecord {
            id: "f1".into(),
            file_name: "notes.txt".into(),
            original_file_name: "notes.txt".into(),
            content_type: Some("text/plain".into()),
            size: 12,
            path: PathBuf::from("/tmp/notes.txt"),
            uploaded_at: Utc::now(),
            expires_at: None,
            uploaded_by: Some("alice".into()),
            status: STATUS_UPLOADED.into(),
            checksum: None,
            is_public: false,
            download_count: 0,
            description: None,
        }
    }

    #[test]
    fn no_expiry_never_expires() {
        assert!(!record().is_expired(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn past_expiry_is_expired() {
        let mut rec = record();
        rec.expires_at = Some(Utc::now() - Duration::hours(1));
        assert!(rec.is_expired(Utc::now()));
    }

    #[test]
    fn ownership_requires_matching_user() {
        let rec = record();
        assert!(rec.is_owned_by("alice"));
        assert!(!rec.is_owned_by("bob"));

        let mut scanned = record();
        scanned.uploaded_by = None;
        assert!(!scanned.is_owned_by("alice"));
    }
}
