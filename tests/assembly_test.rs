//! Chunked Upload Assembly Tests
//!
//! Exercises the upload service end to end against a temp directory:
//! out-of-order arrival, resends, concurrent final chunks and missing slots.

use chunkyard::catalog::{CatalogError, FileCatalog};
use chunkyard::config::StorageConfig;
use chunkyard::upload::{ChunkUpload, ChunkedUploadService, Recovery, UploadError, UploadOutcome};
use rand::seq::SliceRandom;
use std::path::Path;
use std::sync::Arc;

fn service(root: &Path) -> Arc<ChunkedUploadService> {
    Arc::new(ChunkedUploadService::new(&StorageConfig {
        root_dir: root.to_path_buf(),
        merge_buffer_size: 4096,
    }))
}

fn payload(index: usize, size: usize) -> Vec<u8> {
    (0..size).map(|i| ((i + index * 31) % 251) as u8).collect()
}

async fn send(
    uploads: &ChunkedUploadService,
    file_name: &str,
    index: u32,
    total: u32,
    data: &[u8],
) -> Result<UploadOutcome, UploadError> {
    let chunk = ChunkUpload::new(file_name, index, total).unwrap();
    let mut reader = data;
    uploads.receive_chunk(&chunk, &mut reader).await
}

fn temp_files(root: &Path) -> Vec<String> {
    std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect()
}

#[tokio::test]
async fn test_report_pdf_arrives_out_of_order() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());
    let chunks: Vec<Vec<u8>> = (0..3).map(|i| payload(i, 1024 * 1024)).collect();

    for index in [2u32, 0] {
        let outcome = send(&uploads, "report.pdf", index, 3, &chunks[index as usize])
            .await
            .unwrap();
        assert!(matches!(outcome, UploadOutcome::ChunkAccepted { .. }));
        assert!(!dir.path().join("report.pdf").exists());
    }

    let outcome = send(&uploads, "report.pdf", 1, 3, &chunks[1]).await.unwrap();
    match outcome {
        UploadOutcome::Completed { bytes, chunks: n, .. } => {
            assert_eq!(bytes, 3 * 1024 * 1024);
            assert_eq!(n, 3);
        }
        other => panic!("Expected completion, got {:?}", other),
    }

    let published = std::fs::read(dir.path().join("report.pdf")).unwrap();
    assert_eq!(published, chunks.concat());
    assert!(temp_files(dir.path()).is_empty());
    assert!(uploads.tracker().is_empty());
}

#[tokio::test]
async fn test_any_arrival_order_produces_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());
    let mut rng = rand::rng();

    for round in 0..8 {
        let total = 1 + round as u32 * 2;
        let chunks: Vec<Vec<u8>> = (0..total as usize)
            .map(|i| payload(i + round, 100 + i * 7))
            .collect();
        let mut order: Vec<u32> = (0..total).collect();
        order.shuffle(&mut rng);

        let name = format!("file-{}.bin", round);
        let mut completions = 0;
        for index in order {
            let outcome = send(&uploads, &name, index, total, &chunks[index as usize])
                .await
                .unwrap();
            if matches!(outcome, UploadOutcome::Completed { .. }) {
                completions += 1;
            }
        }

        assert_eq!(completions, 1, "round {} completed {} times", round, completions);
        assert_eq!(std::fs::read(dir.path().join(&name)).unwrap(), chunks.concat());
    }
    assert!(temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_resent_chunk_does_not_complete_early() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    send(&uploads, "a.txt", 0, 3, b"old").await.unwrap();
    let outcome = send(&uploads, "a.txt", 0, 3, b"new").await.unwrap();
    match outcome {
        UploadOutcome::ChunkAccepted { received, total, .. } => {
            assert_eq!(received, 1);
            assert_eq!(total, 3);
        }
        other => panic!("Expected chunk accepted, got {:?}", other),
    }
    send(&uploads, "a.txt", 2, 3, b"-c").await.unwrap();
    assert!(!dir.path().join("a.txt").exists());

    send(&uploads, "a.txt", 1, 3, b"-b").await.unwrap();
    assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"new-b-c");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_final_chunks_merge_once() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());
    let total = 16u32;

    let tasks: Vec<_> = (0..total)
        .map(|index| {
            let uploads = Arc::clone(&uploads);
            tokio::spawn(async move {
                let data = payload(index as usize, 2048);
                send(&uploads, "burst.bin", index, total, &data).await
            })
        })
        .collect();

    let mut completions = 0;
    for task in tasks {
        if let UploadOutcome::Completed { .. } = task.await.unwrap().unwrap() {
            completions += 1;
        }
    }
    assert_eq!(completions, 1);

    let expected: Vec<u8> = (0..total as usize).flat_map(|i| payload(i, 2048)).collect();
    assert_eq!(std::fs::read(dir.path().join("burst.bin")).unwrap(), expected);
    assert!(temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_slot_aborts_without_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    send(&uploads, "lost.bin", 0, 2, b"first").await.unwrap();
    std::fs::remove_file(uploads.store().slot_path("lost.bin", 0)).unwrap();

    let err = send(&uploads, "lost.bin", 1, 2, b"second").await.unwrap_err();
    match &err {
        UploadError::IncompleteAssembly { file_name, index } => {
            assert_eq!(file_name, "lost.bin");
            assert_eq!(*index, 0);
        }
        other => panic!("Expected incomplete assembly, got {:?}", other),
    }
    assert_eq!(err.recovery(), Recovery::RestartUpload);
    assert!(!dir.path().join("lost.bin").exists());
    assert!(uploads.tracker().is_empty());

    // A restarted upload starts from scratch.
    send(&uploads, "lost.bin", 0, 2, b"first").await.unwrap();
    send(&uploads, "lost.bin", 1, 2, b"second").await.unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("lost.bin")).unwrap(),
        b"firstsecond"
    );
}

#[tokio::test]
async fn test_empty_chunk_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    let err = send(&uploads, "e.bin", 0, 2, b"").await.unwrap_err();
    assert!(matches!(err, UploadError::ClientProtocol(_)));
    assert!(uploads.tracker().is_empty());
    assert!(temp_files(dir.path()).is_empty());
}

#[tokio::test]
async fn test_name_length_limit() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());
    let at_limit = "n".repeat(chunkyard::upload::layout::MAX_FILE_NAME_LEN);

    send(&uploads, &at_limit, 0, 2, b"a").await.unwrap();
    send(&uploads, &at_limit, 1, 2, b"b").await.unwrap();
    assert_eq!(std::fs::read(dir.path().join(&at_limit)).unwrap(), b"ab");

    let over = format!("{}n", at_limit);
    let err = ChunkUpload::new(&over, 0, 1).unwrap_err();
    assert!(matches!(err, UploadError::ClientProtocol(_)));
    assert_eq!(err.recovery(), Recovery::FixRequest);
}

#[tokio::test]
async fn test_reupload_replaces_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    send(&uploads, "notes.txt", 0, 1, b"version one").await.unwrap();
    send(&uploads, "notes.txt", 0, 2, b"version ").await.unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("notes.txt")).unwrap(),
        b"version one"
    );

    send(&uploads, "notes.txt", 1, 2, b"two").await.unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("notes.txt")).unwrap(),
        b"version two"
    );
}

#[tokio::test]
async fn test_conflicting_total_is_rejected_beyond_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    send(&uploads, "c.bin", 0, 2, b"a").await.unwrap();
    let err = send(&uploads, "c.bin", 3, 5, b"x").await.unwrap_err();
    assert!(matches!(err, UploadError::ClientProtocol(_)));
    assert_eq!(err.recovery(), Recovery::FixRequest);
    assert!(!uploads.store().has_slot("c.bin", 3).await);

    // Within range the first-seen total still governs completion.
    let outcome = send(&uploads, "c.bin", 1, 5, b"b").await.unwrap();
    assert!(matches!(outcome, UploadOutcome::Completed { chunks: 2, .. }));
    assert_eq!(std::fs::read(dir.path().join("c.bin")).unwrap(), b"ab");
}

#[tokio::test]
async fn test_catalog_hides_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());
    let catalog = FileCatalog::new(dir.path());

    send(&uploads, "done.txt", 0, 1, b"hello").await.unwrap();
    send(&uploads, "pending.txt", 0, 2, b"half").await.unwrap();

    let names: Vec<String> = catalog
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    assert_eq!(names, vec!["done.txt".to_string()]);

    catalog.delete("done.txt").await.unwrap();
    assert!(matches!(
        catalog.delete("done.txt").await,
        Err(CatalogError::NotFound(_))
    ));
    assert!(catalog.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_abandon_removes_slots() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = service(dir.path());

    send(&uploads, "gone.bin", 0, 3, b"0").await.unwrap();
    send(&uploads, "gone.bin", 2, 3, b"2").await.unwrap();

    assert!(uploads.abandon("gone.bin").await);
    assert!(!uploads.abandon("gone.bin").await);
    assert!(temp_files(dir.path()).is_empty());
}
