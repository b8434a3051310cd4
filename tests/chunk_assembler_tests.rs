//! Integration tests for chunked-upload reassembly: arrival-order
//! independence, duplicate defense, failure cleanup, and stale-session
//! eviction.

use bytes::Bytes;
use chrono::Duration;
use filedrop::services::StoreError;
use filedrop::services::chunk_assembler::{ChunkAssembler, ChunkOutcome};
use filedrop::services::file_store::FileStore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tempfile::TempDir;

const RETENTION_DAYS: i64 = 30;

async fn setup(dir: &TempDir) -> (Arc<FileStore>, ChunkAssembler) {
    let files = Arc::new(FileStore::open(dir.path()).await.expect("open store"));
    let assembler = ChunkAssembler::new(files.clone(), RETENTION_DAYS);
    (files, assembler)
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[tokio::test]
async fn chunks_assemble_in_index_order_regardless_of_arrival() {
    let dir = TempDir::new().unwrap();
    let (files, assembler) = setup(&dir).await;

    let chunks: Vec<Vec<u8>> = vec![
        b"first-".to_vec(),
        b"second-".to_vec(),
        b"third-".to_vec(),
        b"fourth".to_vec(),
    ];
    let expected: Vec<u8> = chunks.concat();

    let mut record = None;
    for (i, index) in [3u32, 1, 0, 2].into_iter().enumerate() {
        let outcome = assembler
            .receive_chunk(
                "upload-1",
                index,
                4,
                Bytes::from(chunks[index as usize].clone()),
                "alice",
            )
            .await
            .unwrap();
        match outcome {
            ChunkOutcome::Pending { received, total } => {
                assert!(i < 3, "completed too early at submission {i}");
                assert_eq!(received, i as u32 + 1);
                assert_eq!(total, 4);
            }
            ChunkOutcome::Complete(rec) => {
                assert_eq!(i, 3, "must complete exactly on the last chunk");
                record = Some(rec);
            }
        }
    }

    let record = record.expect("assembly completed");
    assert_eq!(record.size as usize, expected.len());
    assert_eq!(tokio::fs::read(&record.path).await.unwrap(), expected);
    assert_eq!(record.checksum.as_deref(), Some(hex_sha256(&expected).as_str()));
    assert!(record.expires_at.is_some());
    assert_eq!(record.uploaded_by.as_deref(), Some("alice"));

    // Published to the metadata store and the session forgotten.
    assert!(files.get("upload-1").await.is_some());
    assert_eq!(assembler.active_sessions().await, 0);
    assert!(!dir.path().join("chunks").join("upload-1").exists());
}

#[tokio::test]
async fn duplicate_chunks_never_trigger_early_completion() {
    let dir = TempDir::new().unwrap();
    let (_, assembler) = setup(&dir).await;

    // Three submissions of chunk 0 plus one of chunk 2: four arrivals, but
    // index 1 is still missing.
    for _ in 0..3 {
        let outcome = assembler
            .receive_chunk("upload-dup", 0, 3, Bytes::from_static(b"zero"), "alice")
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Pending { .. }));
    }
    let outcome = assembler
        .receive_chunk("upload-dup", 2, 3, Bytes::from_static(b"two"), "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChunkOutcome::Pending {
            received: 2,
            total: 3
        }
    ));

    let outcome = assembler
        .receive_chunk("upload-dup", 1, 3, Bytes::from_static(b"one"), "alice")
        .await
        .unwrap();
    let ChunkOutcome::Complete(record) = outcome else {
        panic!("upload must complete once every index is covered");
    };
    assert_eq!(
        tokio::fs::read(&record.path).await.unwrap(),
        b"zeroonetwo"
    );
}

#[tokio::test]
async fn report_pdf_in_three_chunks_submitted_out_of_order() {
    let dir = TempDir::new().unwrap();
    let (files, assembler) = setup(&dir).await;

    // 2,500,000 bytes in chunks of 1,000,000 / 1,000,000 / 500,000,
    // submitted in order 2, 0, 1.
    let chunk0 = vec![0xAAu8; 1_000_000];
    let chunk1 = vec![0xBBu8; 1_000_000];
    let chunk2 = vec![0xCCu8; 500_000];

    let outcome = assembler
        .receive_chunk("report-pdf", 2, 3, Bytes::from(chunk2.clone()), "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChunkOutcome::Pending {
            received: 1,
            total: 3
        }
    ));

    let outcome = assembler
        .receive_chunk("report-pdf", 0, 3, Bytes::from(chunk0.clone()), "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChunkOutcome::Pending {
            received: 2,
            total: 3
        }
    ));

    let outcome = assembler
        .receive_chunk("report-pdf", 1, 3, Bytes::from(chunk1.clone()), "alice")
        .await
        .unwrap();
    let ChunkOutcome::Complete(record) = outcome else {
        panic!("third distinct chunk must complete the upload");
    };

    assert_eq!(record.size, 2_500_000);
    let artifact = tokio::fs::read(&record.path).await.unwrap();
    assert_eq!(artifact.len(), 2_500_000);
    assert_eq!(&artifact[..1_000_000], chunk0.as_slice());
    assert_eq!(&artifact[1_000_000..2_000_000], chunk1.as_slice());
    assert_eq!(&artifact[2_000_000..], chunk2.as_slice());

    assert_eq!(files.get("report-pdf").await.unwrap().size, 2_500_000);
}

#[tokio::test]
async fn out_of_range_and_degenerate_requests_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (_, assembler) = setup(&dir).await;

    let err = assembler
        .receive_chunk("upload-x", 3, 3, Bytes::from_static(b"x"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = assembler
        .receive_chunk("upload-x", 0, 0, Bytes::from_static(b"x"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = assembler
        .receive_chunk("../escape", 0, 1, Bytes::from_static(b"x"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // The rejected submissions must not have seeded sessions that could
    // complete later.
    let outcome = assembler
        .receive_chunk("upload-x", 0, 2, Bytes::from_static(b"a"), "alice")
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        ChunkOutcome::Pending {
            received: 1,
            total: 2
        }
    ));
}

#[tokio::test]
async fn missing_chunk_at_combine_time_fails_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let (files, assembler) = setup(&dir).await;

    assembler
        .receive_chunk("broken", 0, 3, Bytes::from_static(b"zero"), "alice")
        .await
        .unwrap();
    assembler
        .receive_chunk("broken", 1, 3, Bytes::from_static(b"one"), "alice")
        .await
        .unwrap();

    // Sabotage: remove a durably-written chunk behind the assembler's back.
    tokio::fs::remove_file(dir.path().join("chunks").join("broken").join("0"))
        .await
        .unwrap();

    let err = assembler
        .receive_chunk("broken", 2, 3, Bytes::from_static(b"two"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::ChunkMissing { index: 0, .. }
    ));

    // No truncated artifact was published and the staging area is gone.
    assert!(files.get("broken").await.is_none());
    assert!(!dir.path().join("user_files").join("broken").join("broken").exists());
    assert!(!dir.path().join("chunks").join("broken").exists());
}

#[tokio::test]
async fn stale_sessions_are_evicted_with_their_chunks() {
    let dir = TempDir::new().unwrap();
    let (_, assembler) = setup(&dir).await;

    assembler
        .receive_chunk("abandoned", 0, 2, Bytes::from_static(b"only half"), "alice")
        .await
        .unwrap();
    assert_eq!(assembler.active_sessions().await, 1);
    assert!(dir.path().join("chunks").join("abandoned").exists());

    // Nothing is older than a day yet.
    assert_eq!(assembler.evict_stale(Duration::days(1)).await.unwrap(), 0);
    assert_eq!(assembler.active_sessions().await, 1);

    // With a zero max-age every idle session is stale.
    assert_eq!(assembler.evict_stale(Duration::zero()).await.unwrap(), 1);
    assert_eq!(assembler.active_sessions().await, 0);
    assert!(!dir.path().join("chunks").join("abandoned").exists());
}

#[tokio::test]
async fn concurrent_chunks_for_different_files_assemble_independently() {
    let dir = TempDir::new().unwrap();
    let (files, assembler) = setup(&dir).await;
    let assembler = Arc::new(assembler);

    let mut tasks = Vec::new();
    for upload in 0..4u32 {
        let assembler = assembler.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("parallel-{upload}");
            for index in [1u32, 0] {
                let body = format!("upload {upload} chunk {index};");
                assembler
                    .receive_chunk(&id, index, 2, Bytes::from(body), "alice")
                    .await
                    .unwrap();
            }
            id
        }));
    }

    for task in tasks {
        let id = task.await.unwrap();
        let record = files.get(&id).await.expect("each upload published");
        let n = &id["parallel-".len()..];
        let expected = format!("upload {n} chunk 0;upload {n} chunk 1;");
        assert_eq!(
            tokio::fs::read(&record.path).await.unwrap(),
            expected.as_bytes()
        );
    }
    assert_eq!(assembler.active_sessions().await, 0);
}
