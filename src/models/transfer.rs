//! Represents a transfer request — a code-protected grant that lets a
//! third party download one file without an account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a transfer request.
///
/// Creation always normalizes to `Active`; `Pending` exists only as a
/// default for requests built by callers and is never observably persisted.
/// `Cancelled` is reached only through the sender, `Expired` only through
/// the cleanup sweep.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl TransferStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::Expired)
    }
}

/// A grant allowing download of `file_id` by whoever holds the access code.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransferRequest {
    /// Unique id, generated at creation.
    pub id: String,

    /// The file this grant covers.
    pub file_id: String,

    /// User who created the grant; the only user allowed to cancel it.
    pub sender_id: String,

    /// Intended recipient, when known.
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,

    pub created_at: DateTime<Utc>,

    /// When the grant stops working. Defaults to the retention window.
    pub expires_at: Option<DateTime<Utc>>,

    pub status: TransferStatus,

    /// Zero-padded 6-digit numeric code presented by the downloader.
    pub access_code: String,

    /// Downloads allowed before the grant goes inactive; -1 means unlimited.
    pub download_limit: i64,

    /// Successful accesses so far.
    pub download_count: u64,

    /// Whether the sender wants a notification per download.
    pub notify_on_download: bool,

    /// Free-text note shown to the recipient.
    pub message: Option<String>,
}

impl TransferRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now > expiry,
            None => false,
        }
    }

    pub fn has_reached_download_limit(&self) -> bool {
        if self.download_limit < 0 {
            return false;
        }
        self.download_count >= self.download_limit as u64
    }

    /// A grant is usable iff it is `Active`, unexpired, and under its limit.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == TransferStatus::Active
            && !self.is_expired(now)
            && !self.has_reached_download_limit()
    }

    /// Redemption URL handed to the recipient.
    pub fn download_url(&self) -> String {
        format!("/download/{}?code={}", self.id, self.access_code)
    }
}
