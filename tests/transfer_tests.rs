//! Integration tests for the transfer-access state machine: creation
//! normalization, code redemption, download limits, cancellation, and the
//! expiry sweep.

use bytes::Bytes;
use chrono::{Duration, Utc};
use filedrop::models::file_record::FileRecord;
use filedrop::models::transfer::TransferStatus;
use filedrop::services::StoreError;
use filedrop::services::file_store::FileStore;
use filedrop::services::transfer_store::{AccessOutcome, NewTransfer, TransferStore, TransferUpdate};
use futures::stream;
use std::io;
use std::sync::Arc;
use tempfile::TempDir;

const RETENTION_DAYS: i64 = 30;

async fn setup(dir: &TempDir) -> (Arc<FileStore>, TransferStore, FileRecord) {
    let files = Arc::new(FileStore::open(dir.path()).await.expect("open file store"));
    let record = files
        .store_upload(
            "shared.txt",
            None,
            stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"shared bytes"))]),
            "alice",
        )
        .await
        .expect("upload");
    let transfers = TransferStore::open(files.clone(), RETENTION_DAYS)
        .await
        .expect("open transfer store");
    (files, transfers, record)
}

fn new_transfer(file_id: &str) -> NewTransfer {
    NewTransfer {
        file_id: file_id.to_string(),
        sender_id: "alice".to_string(),
        ..NewTransfer::default()
    }
}

#[tokio::test]
async fn create_normalizes_to_active_and_persists() {
    let dir = TempDir::new().unwrap();
    let (files, transfers, record) = setup(&dir).await;

    let request = transfers.create(new_transfer(&record.id)).await.unwrap();
    assert_eq!(request.status, TransferStatus::Active);
    assert_eq!(request.access_code.len(), 6);
    assert!(request.access_code.chars().all(|c| c.is_ascii_digit()));
    assert_eq!(request.download_limit, -1);
    assert_eq!(request.download_count, 0);
    let expiry = request.expires_at.expect("default expiry applied");
    assert!(expiry > Utc::now() + Duration::days(RETENTION_DAYS - 1));
    assert_eq!(
        request.download_url(),
        format!("/download/{}?code={}", request.id, request.access_code)
    );

    // Persisted immediately: a fresh store sees it.
    drop(transfers);
    let reopened = TransferStore::open(files, RETENTION_DAYS).await.unwrap();
    let loaded = reopened.get(&request.id).await.expect("survives reopen");
    assert_eq!(loaded.status, TransferStatus::Active);
    assert_eq!(loaded.access_code, request.access_code);
}

#[tokio::test]
async fn create_validates_inputs() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;

    let err = transfers
        .create(new_transfer("no-such-file"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::FileNotFound(_)));

    let err = transfers
        .create(NewTransfer {
            download_limit: Some(-2),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = transfers
        .create(NewTransfer {
            sender_id: String::new(),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn wrong_code_or_id_is_denied() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers.create(new_transfer(&record.id)).await.unwrap();

    let wrong_code = if request.access_code == "000000" {
        "000001"
    } else {
        "000000"
    };
    assert!(matches!(
        transfers
            .access_by_code(&request.id, wrong_code)
            .await
            .unwrap(),
        AccessOutcome::Denied
    ));
    assert!(matches!(
        transfers
            .access_by_code("no-such-transfer", &request.access_code)
            .await
            .unwrap(),
        AccessOutcome::Denied
    ));

    // Denied attempts never touch the counter.
    assert_eq!(transfers.get(&request.id).await.unwrap().download_count, 0);
}

#[tokio::test]
async fn download_limit_permits_exactly_k_accesses() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let k = 3u64;
    let request = transfers
        .create(NewTransfer {
            download_limit: Some(k as i64),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap();

    for expected in 1..=k {
        match transfers
            .access_by_code(&request.id, &request.access_code)
            .await
            .unwrap()
        {
            AccessOutcome::Granted(granted) => assert_eq!(granted.download_count, expected),
            other => panic!("access {expected} should be granted, got {other:?}"),
        }
    }

    // The (k+1)th attempt is refused and the counter stays put.
    match transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap()
    {
        AccessOutcome::Inactive(rejected) => {
            assert_eq!(rejected.download_count, k);
            assert!(!rejected.is_active(Utc::now()));
        }
        other => panic!("exhausted transfer must be inactive, got {other:?}"),
    }
}

#[tokio::test]
async fn single_use_transfer() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers
        .create(NewTransfer {
            download_limit: Some(1),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap();

    let AccessOutcome::Granted(first) = transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap()
    else {
        panic!("first access must be granted");
    };
    assert_eq!(first.download_count, 1);

    let AccessOutcome::Inactive(second) = transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap()
    else {
        panic!("second access must be refused");
    };
    assert!(!second.is_active(Utc::now()));
    assert_eq!(second.download_count, 1);
}

#[tokio::test]
async fn access_counts_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let (files, transfers, record) = setup(&dir).await;
    let request = transfers.create(new_transfer(&record.id)).await.unwrap();

    transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap();
    drop(transfers);

    let reopened = TransferStore::open(files, RETENTION_DAYS).await.unwrap();
    assert_eq!(reopened.get(&request.id).await.unwrap().download_count, 1);
}

#[tokio::test]
async fn expired_transfer_reads_as_inactive_with_reason_available() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers
        .create(NewTransfer {
            expires_at: Some(Utc::now() - Duration::hours(1)),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap();

    // Found with the right code, but expired: handed back unmodified so
    // the caller can report why.
    let AccessOutcome::Inactive(inactive) = transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap()
    else {
        panic!("expired transfer must be inactive, not denied");
    };
    assert!(inactive.is_expired(Utc::now()));
    assert_eq!(inactive.download_count, 0);
}

#[tokio::test]
async fn cancel_is_sender_only_and_terminal() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers.create(new_transfer(&record.id)).await.unwrap();

    let err = transfers.cancel(&request.id, "mallory").await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));

    let cancelled = transfers.cancel(&request.id, "alice").await.unwrap();
    assert_eq!(cancelled.status, TransferStatus::Cancelled);

    // Cancelling again is a no-op, never a reactivation.
    let again = transfers.cancel(&request.id, "alice").await.unwrap();
    assert_eq!(again.status, TransferStatus::Cancelled);

    let AccessOutcome::Inactive(after) = transfers
        .access_by_code(&request.id, &request.access_code)
        .await
        .unwrap()
    else {
        panic!("cancelled transfer must be inactive");
    };
    assert_eq!(after.status, TransferStatus::Cancelled);
}

#[tokio::test]
async fn cancel_never_resurrects_an_expired_request() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers
        .create(NewTransfer {
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap();

    assert_eq!(transfers.cleanup_expired().await.unwrap(), 1);
    assert_eq!(
        transfers.get(&request.id).await.unwrap().status,
        TransferStatus::Expired
    );

    let still_expired = transfers.cancel(&request.id, "alice").await.unwrap();
    assert_eq!(still_expired.status, TransferStatus::Expired);
}

#[tokio::test]
async fn cleanup_expires_the_whole_batch_once() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;

    for _ in 0..2 {
        transfers
            .create(NewTransfer {
                expires_at: Some(Utc::now() - Duration::hours(2)),
                ..new_transfer(&record.id)
            })
            .await
            .unwrap();
    }
    let active = transfers.create(new_transfer(&record.id)).await.unwrap();

    assert_eq!(transfers.cleanup_expired().await.unwrap(), 2);
    assert_eq!(
        transfers.get(&active.id).await.unwrap().status,
        TransferStatus::Active
    );
    // Terminal requests are not re-expired on the next sweep.
    assert_eq!(transfers.cleanup_expired().await.unwrap(), 0);
}

#[tokio::test]
async fn noop_cleanup_does_not_rewrite_the_snapshot() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    transfers.create(new_transfer(&record.id)).await.unwrap();

    let snapshot = dir.path().join("transfers.json");
    let before = tokio::fs::read(&snapshot).await.unwrap();

    assert_eq!(transfers.cleanup_expired().await.unwrap(), 0);

    let after = tokio::fs::read(&snapshot).await.unwrap();
    assert_eq!(before, after, "no-op sweep must not touch the snapshot");
}

#[tokio::test]
async fn update_is_sender_only_and_cannot_change_status() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;
    let request = transfers.create(new_transfer(&record.id)).await.unwrap();

    let err = transfers
        .update(
            &request.id,
            TransferUpdate {
                download_limit: Some(5),
                ..TransferUpdate::default()
            },
            "mallory",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));

    let updated = transfers
        .update(
            &request.id,
            TransferUpdate {
                download_limit: Some(5),
                message: Some("enjoy".into()),
                ..TransferUpdate::default()
            },
            "alice",
        )
        .await
        .unwrap();
    assert_eq!(updated.download_limit, 5);
    assert_eq!(updated.message.as_deref(), Some("enjoy"));
    assert_eq!(updated.status, TransferStatus::Active);

    let err = transfers
        .update(
            &request.id,
            TransferUpdate {
                download_limit: Some(-7),
                ..TransferUpdate::default()
            },
            "alice",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}

#[tokio::test]
async fn listings_are_split_by_role() {
    let dir = TempDir::new().unwrap();
    let (_, transfers, record) = setup(&dir).await;

    let to_bob = transfers
        .create(NewTransfer {
            recipient_id: Some("bob".into()),
            ..new_transfer(&record.id)
        })
        .await
        .unwrap();
    transfers.create(new_transfer(&record.id)).await.unwrap();

    let sent = transfers.sent_by("alice").await;
    assert_eq!(sent.len(), 2);

    let received = transfers.received_by("bob").await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].id, to_bob.id);

    assert!(transfers.sent_by("bob").await.is_empty());
    assert!(transfers.received_by("alice").await.is_empty());
}
