//! Upload module
//!
//! Receives independently transmitted chunks, persists them, and reassembles
//! the original file once every chunk has arrived.
//!
//! # Flow
//!
//! 1. [`ChunkStore::put`] streams the payload into a durable slot
//! 2. [`AssemblyTracker::record_arrival`] decides whether the set is complete
//! 3. On the single `NowComplete` transition, [`Merger::assemble`] publishes
//!    the artifact and removes the slots
//!
//! # Example
//!
//! ```no_run
//! use chunkyard::config::StorageConfig;
//! use chunkyard::upload::{ChunkUpload, ChunkedUploadService, UploadOutcome};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = ChunkedUploadService::new(&StorageConfig::default());
//! let chunk = ChunkUpload::new("hello.txt", 0, 1)?;
//!
//! match service.receive_chunk(&chunk, &mut &b"Hello, World!"[..]).await? {
//!     UploadOutcome::Completed { artifact, .. } => println!("Stored {:?}", artifact),
//!     UploadOutcome::ChunkAccepted { received, total, .. } => {
//!         println!("{}/{} chunks", received, total)
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::StorageConfig;
use crate::metrics;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

pub mod chunk_store;
pub mod layout;
pub mod merger;
pub mod tracker;

pub use chunk_store::{ChunkAck, ChunkStore, StoreError, SweepReport};
pub use merger::{CleanupWarning, MergeError, MergeReport, Merger};
pub use tracker::{AssemblyProgress, AssemblyTracker, Completion, TrackerError};

/// What the client should do after a failed chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// The request itself is malformed
    FixRequest,
    /// Resend this chunk
    RetryChunk,
    /// Resend every chunk of the upload
    RestartUpload,
    /// Server-side failure; the file is not usable yet
    Internal,
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid chunk request: {0}")]
    ClientProtocol(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    #[error("Chunk write failed: {0}")]
    ChunkWriteFailed(#[source] StoreError),

    #[error("Upload '{file_name}' is incomplete: chunk {index} is missing")]
    IncompleteAssembly { file_name: String, index: u32 },

    #[error("Assembly failed: {0}")]
    AssemblyFailed(#[source] MergeError),
}

impl UploadError {
    /// Recovery hint for the client
    pub fn recovery(&self) -> Recovery {
        match self {
            UploadError::ClientProtocol(_) => Recovery::FixRequest,
            UploadError::StorageUnavailable(_) | UploadError::ChunkWriteFailed(_) => {
                Recovery::RetryChunk
            }
            UploadError::IncompleteAssembly { .. } => Recovery::RestartUpload,
            UploadError::AssemblyFailed(_) => Recovery::Internal,
        }
    }

    /// Stable error kind used in responses and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::ClientProtocol(_) => "client_protocol",
            UploadError::StorageUnavailable(_) => "storage_unavailable",
            UploadError::ChunkWriteFailed(_) => "chunk_write_failed",
            UploadError::IncompleteAssembly { .. } => "incomplete_assembly",
            UploadError::AssemblyFailed(_) => "assembly_failed",
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteFailed { .. } => UploadError::ChunkWriteFailed(err),
            _ => UploadError::StorageUnavailable(err),
        }
    }
}

impl From<MergeError> for UploadError {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::MissingSlot { file_name, index } => {
                UploadError::IncompleteAssembly { file_name, index }
            }
            other => UploadError::AssemblyFailed(other),
        }
    }
}

/// A validated chunk header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkUpload {
    pub file_name: String,
    pub index: u32,
    pub total: u32,
}

impl ChunkUpload {
    /// Validate a chunk header
    pub fn new(file_name: &str, index: u32, total: u32) -> Result<Self, UploadError> {
        layout::validate_file_name(file_name)
            .map_err(|e| UploadError::ClientProtocol(e.to_string()))?;
        if total == 0 {
            return Err(UploadError::ClientProtocol(
                "totalChunks must be positive".into(),
            ));
        }
        if index >= total {
            return Err(UploadError::ClientProtocol(format!(
                "chunkIndex {} is outside totalChunks {}",
                index, total
            )));
        }
        Ok(Self {
            file_name: file_name.to_string(),
            index,
            total,
        })
    }

    /// Build a chunk header from raw request parameters
    pub fn from_params(
        file_name: Option<&str>,
        index: Option<&str>,
        total: Option<&str>,
    ) -> Result<Self, UploadError> {
        let file_name = file_name
            .ok_or_else(|| UploadError::ClientProtocol("missing filename".into()))?;
        let index = parse_number("chunkIndex", index)?;
        let total = parse_number("totalChunks", total)?;
        Self::new(file_name, index, total)
    }
}

fn parse_number(name: &str, value: Option<&str>) -> Result<u32, UploadError> {
    let value = value.ok_or_else(|| UploadError::ClientProtocol(format!("missing {}", name)))?;
    value
        .trim()
        .parse()
        .map_err(|_| UploadError::ClientProtocol(format!("invalid {}: '{}'", name, value)))
}

/// Outcome of a successfully handled chunk
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Chunk stored; the upload is not complete yet
    #[serde(rename = "accepted")]
    ChunkAccepted {
        file_name: String,
        index: u32,
        received: u32,
        total: u32,
    },
    /// Chunk stored and the artifact has been published
    #[serde(rename = "complete")]
    Completed {
        file_name: String,
        #[serde(skip)]
        artifact: PathBuf,
        bytes: u64,
        chunks: u32,
        cleanup_warnings: Vec<CleanupWarning>,
    },
}

/// Chunk store, tracker and merger wired together
///
/// One instance is owned by the server and shared by every request handler.
#[derive(Debug)]
pub struct ChunkedUploadService {
    store: Arc<ChunkStore>,
    tracker: Arc<AssemblyTracker>,
    merger: Merger,
}

impl ChunkedUploadService {
    /// Create a service over the configured storage root
    pub fn new(config: &StorageConfig) -> Self {
        let store = Arc::new(ChunkStore::new(config.root_dir.clone()));
        Self::with_parts(store, Arc::new(AssemblyTracker::new()), config.merge_buffer_size)
    }

    /// Create a service from existing components
    pub fn with_parts(
        store: Arc<ChunkStore>,
        tracker: Arc<AssemblyTracker>,
        merge_buffer_size: usize,
    ) -> Self {
        let merger = Merger::new(Arc::clone(&store), merge_buffer_size);
        Self {
            store,
            tracker,
            merger,
        }
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<AssemblyTracker> {
        &self.tracker
    }

    /// Persist one chunk and assemble the file if it was the last one missing
    #[tracing::instrument(
        name = "upload.chunk",
        skip(self, chunk, reader),
        fields(file_name = %chunk.file_name, chunk_index = chunk.index, total = chunk.total),
        err
    )]
    pub async fn receive_chunk<R>(
        &self,
        chunk: &ChunkUpload,
        reader: &mut R,
    ) -> Result<UploadOutcome, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let result = self.handle_chunk(chunk, reader).await;
        if let Err(ref e) = result {
            metrics::record_chunk_failure(e.kind());
        }
        result
    }

    async fn handle_chunk<R>(
        &self,
        chunk: &ChunkUpload,
        reader: &mut R,
    ) -> Result<UploadOutcome, UploadError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let file_name = chunk.file_name.as_str();

        if let Some(adopted) = self.tracker.expected_total(file_name) {
            if chunk.index >= adopted {
                return Err(UploadError::ClientProtocol(format!(
                    "chunkIndex {} is outside the upload's totalChunks {}",
                    chunk.index, adopted
                )));
            }
        }

        let mut reader = BufReader::new(reader);
        let pending = reader.fill_buf().await.map_err(|source| {
            UploadError::ChunkWriteFailed(StoreError::WriteFailed {
                file_name: file_name.to_string(),
                index: chunk.index,
                source,
            })
        })?;
        if pending.is_empty() {
            return Err(UploadError::ClientProtocol(format!(
                "chunk {} of '{}' has no payload",
                chunk.index, file_name
            )));
        }

        let ack = self
            .store
            .put(file_name, chunk.index, chunk.total, &mut reader)
            .await?;
        metrics::record_chunk_stored(ack.bytes_written);

        let completion = match self
            .tracker
            .record_arrival(file_name, chunk.index, chunk.total)
        {
            Ok(completion) => completion,
            Err(e) => {
                // Raced with an upload that adopted a smaller total.
                if let Err(remove) = self.store.remove_slot(file_name, chunk.index).await {
                    tracing::warn!(file_name = file_name, error = %remove, "Failed to remove rejected slot");
                }
                return Err(UploadError::ClientProtocol(e.to_string()));
            }
        };

        match completion {
            Completion::Incomplete { received, total } => {
                tracing::debug!(
                    file_name = file_name,
                    chunk_index = chunk.index,
                    received = received,
                    total = total,
                    "Chunk accepted"
                );
                Ok(UploadOutcome::ChunkAccepted {
                    file_name: file_name.to_string(),
                    index: chunk.index,
                    received,
                    total,
                })
            }
            Completion::AlreadyComplete => {
                tracing::warn!(
                    file_name = file_name,
                    chunk_index = chunk.index,
                    "Chunk arrived after the upload was complete"
                );
                let total = self.tracker.expected_total(file_name).unwrap_or(chunk.total);
                Ok(UploadOutcome::ChunkAccepted {
                    file_name: file_name.to_string(),
                    index: chunk.index,
                    received: total,
                    total,
                })
            }
            Completion::NowComplete { total } => self.assemble(file_name, total).await,
        }
    }

    async fn assemble(&self, file_name: &str, total: u32) -> Result<UploadOutcome, UploadError> {
        let started = Instant::now();

        match self.merger.assemble(file_name, total).await {
            Ok(report) => {
                self.tracker.finish(file_name);
                metrics::record_assembly_success(report.chunks, started.elapsed().as_secs_f64());
                tracing::info!(
                    file_name = file_name,
                    chunks = report.chunks,
                    bytes = report.bytes,
                    cleanup_warnings = report.cleanup_failures.len(),
                    "Upload complete"
                );
                Ok(UploadOutcome::Completed {
                    file_name: file_name.to_string(),
                    artifact: report.artifact,
                    bytes: report.bytes,
                    chunks: report.chunks,
                    cleanup_warnings: report.cleanup_failures,
                })
            }
            Err(e) => {
                self.tracker.abandon(file_name);
                metrics::record_assembly_failure();
                tracing::error!(
                    file_name = file_name,
                    total = total,
                    error = %e,
                    "Assembly failed, upload must be restarted"
                );
                Err(e.into())
            }
        }
    }

    /// Drop an upload in progress and remove its slots
    ///
    /// Returns whether the upload was being tracked.
    pub async fn abandon(&self, file_name: &str) -> bool {
        match self.tracker.abandon(file_name) {
            Some(progress) => {
                let removed = self.store.remove_slots(file_name, progress.total).await;
                tracing::info!(
                    file_name = file_name,
                    received = progress.received,
                    total = progress.total,
                    slots_removed = removed,
                    "Abandoned upload"
                );
                true
            }
            None => false,
        }
    }
}
