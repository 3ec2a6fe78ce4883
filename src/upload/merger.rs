//! Ordered chunk merging
//!
//! A complete chunk set is concatenated in ascending index order into a
//! staging file, which is renamed onto the artifact path only after every
//! slot has been copied and synced. A failed merge therefore never exposes a
//! partial artifact, and the slots stay behind for inspection or retry.

use super::chunk_store::ChunkStore;
use super::layout;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

/// Merge errors
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Chunk {index} of '{file_name}' has no slot")]
    MissingSlot { file_name: String, index: u32 },

    #[error("Cannot create artifact staging file {path}: {source}")]
    CannotCreateArtifact {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed writing artifact '{file_name}': {source}")]
    WriteFailed {
        file_name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to publish artifact {path}: {source}")]
    PublishFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A slot that could not be removed after a successful merge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub slot: PathBuf,
    pub error: String,
}

/// Result of a successful merge
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub artifact: PathBuf,
    pub bytes: u64,
    pub chunks: u32,
    pub cleanup_failures: Vec<CleanupWarning>,
}

/// Concatenates chunk slots into published artifacts
#[derive(Debug, Clone)]
pub struct Merger {
    store: Arc<ChunkStore>,
    buffer_size: usize,
}

impl Merger {
    /// Create a merger reading slots from `store`
    ///
    /// `buffer_size` bounds the memory used per merge regardless of chunk size.
    pub fn new(store: Arc<ChunkStore>, buffer_size: usize) -> Self {
        Self { store, buffer_size }
    }

    /// Canonical path of an artifact
    pub fn artifact_path(&self, file_name: &str) -> PathBuf {
        self.store.root().join(file_name)
    }

    /// Merge slots `0..total` of `file_name` into its artifact
    ///
    /// Must only be called once per completed upload.
    #[tracing::instrument(
        name = "upload.merge",
        skip(self),
        fields(file_name = %file_name, total = total, bytes = tracing::field::Empty),
        err
    )]
    pub async fn assemble(&self, file_name: &str, total: u32) -> Result<MergeReport, MergeError> {
        for index in 0..total {
            if !self.store.has_slot(file_name, index).await {
                return Err(MergeError::MissingSlot {
                    file_name: file_name.to_string(),
                    index,
                });
            }
        }

        let staging = self
            .store
            .root()
            .join(layout::merge_staging_name(file_name));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await
            .map_err(|source| MergeError::CannotCreateArtifact {
                path: staging.clone(),
                source,
            })?;

        let bytes = match self.copy_slots(file_name, total, file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                discard(&staging).await;
                return Err(e);
            }
        };

        let artifact = self.artifact_path(file_name);
        if let Err(source) = tokio::fs::rename(&staging, &artifact).await {
            discard(&staging).await;
            return Err(MergeError::PublishFailed {
                path: artifact,
                source,
            });
        }

        tracing::Span::current().record("bytes", bytes);
        tracing::info!(
            file_name = file_name,
            chunks = total,
            bytes = bytes,
            "Published artifact"
        );

        let cleanup_failures = self.cleanup(file_name, total).await;

        Ok(MergeReport {
            artifact,
            bytes,
            chunks: total,
            cleanup_failures,
        })
    }

    /// Stream every slot into `file` in index order
    async fn copy_slots(&self, file_name: &str, total: u32, file: File) -> Result<u64, MergeError> {
        let write_failed = |source| MergeError::WriteFailed {
            file_name: file_name.to_string(),
            source,
        };

        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut bytes = 0u64;

        for index in 0..total {
            let slot = match self.store.open_slot(file_name, index).await {
                Ok(Some(slot)) => slot,
                Ok(None) => {
                    return Err(MergeError::MissingSlot {
                        file_name: file_name.to_string(),
                        index,
                    })
                }
                Err(source) => return Err(write_failed(source)),
            };

            let mut reader = BufReader::with_capacity(self.buffer_size, slot);
            bytes += tokio::io::copy_buf(&mut reader, &mut writer)
                .await
                .map_err(write_failed)?;
        }

        writer.flush().await.map_err(write_failed)?;
        writer.get_ref().sync_data().await.map_err(write_failed)?;
        Ok(bytes)
    }

    /// Remove merged slots, collecting failures instead of failing the merge
    async fn cleanup(&self, file_name: &str, total: u32) -> Vec<CleanupWarning> {
        let mut failures = Vec::new();
        for index in 0..total {
            if let Err(e) = self.store.remove_slot(file_name, index).await {
                let slot = self.store.slot_path(file_name, index);
                tracing::warn!(
                    file_name = file_name,
                    chunk_index = index,
                    slot = %slot.display(),
                    error = %e,
                    "Failed to remove merged chunk slot"
                );
                crate::metrics::record_cleanup_failure();
                failures.push(CleanupWarning {
                    slot,
                    error: e.to_string(),
                });
            }
        }
        failures
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove merge staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_chunks(dir: &Path, file_name: &str, chunks: &[Vec<u8>]) -> Arc<ChunkStore> {
        let store = Arc::new(ChunkStore::new(dir));
        let total = chunks.len() as u32;
        for (index, payload) in chunks.iter().enumerate() {
            let mut reader: &[u8] = payload.as_slice();
            store
                .put(file_name, index as u32, total, &mut reader)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_assemble_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_chunks(dir.path(), "r.txt", &[b"aa".to_vec(), b"bbb".to_vec(), b"c".to_vec()]).await;
        let merger = Merger::new(Arc::clone(&store), 512);

        let report = merger.assemble("r.txt", 3).await.unwrap();

        assert_eq!(report.bytes, 6);
        assert_eq!(report.chunks, 3);
        assert!(report.cleanup_failures.is_empty());
        assert_eq!(tokio::fs::read(&report.artifact).await.unwrap(), b"aabbbc");
        for index in 0..3 {
            assert!(!store.has_slot("r.txt", index).await);
        }
    }

    #[tokio::test]
    async fn test_small_buffer_streams_large_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![7u8; 100_000];
        let store = store_with_chunks(dir.path(), "big.bin", &[big, b"tail".to_vec()]).await;
        let merger = Merger::new(store, 512);

        let report = merger.assemble("big.bin", 2).await.unwrap();

        let content = tokio::fs::read(&report.artifact).await.unwrap();
        assert_eq!(content.len(), 100_004);
        assert_eq!(&content[100_000..], b"tail");
    }

    #[tokio::test]
    async fn test_missing_slot_leaves_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_chunks(dir.path(), "gap.bin", &[b"0".to_vec(), b"1".to_vec(), b"2".to_vec()]).await;
        store.remove_slot("gap.bin", 1).await.unwrap();
        let merger = Merger::new(Arc::clone(&store), 512);

        let result = merger.assemble("gap.bin", 3).await;

        assert!(matches!(result, Err(MergeError::MissingSlot { index: 1, .. })));
        assert!(!merger.artifact_path("gap.bin").exists());
        assert!(store.has_slot("gap.bin", 0).await);
        assert!(store.has_slot("gap.bin", 2).await);
    }

    #[tokio::test]
    async fn test_missing_slot_keeps_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("keep.bin"), b"previous")
            .await
            .unwrap();
        let store = store_with_chunks(dir.path(), "keep.bin", &[b"new".to_vec()]).await;
        store.remove_slot("keep.bin", 0).await.unwrap();
        let merger = Merger::new(store, 512);

        assert!(merger.assemble("keep.bin", 1).await.is_err());
        assert_eq!(
            tokio::fs::read(dir.path().join("keep.bin")).await.unwrap(),
            b"previous"
        );
    }

    #[tokio::test]
    async fn test_reupload_replaces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("doc.txt"), b"old contents")
            .await
            .unwrap();
        let store = store_with_chunks(dir.path(), "doc.txt", &[b"new".to_vec()]).await;
        let merger = Merger::new(store, 512);

        merger.assemble("doc.txt", 1).await.unwrap();
        assert_eq!(
            tokio::fs::read(dir.path().join("doc.txt")).await.unwrap(),
            b"new"
        );
    }
}
