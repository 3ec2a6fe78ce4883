//! Durable per-chunk slot storage
//!
//! Each chunk is streamed into a uniquely named staging file, flushed to disk
//! and then renamed onto its slot path. Readers of a slot therefore see either
//! no file or a fully written one, and a resend replaces the slot wholesale.

use super::layout;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt, BufWriter};

/// Chunk store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cannot create chunk slot at {path}: {source}")]
    CannotCreateSlot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed writing chunk {index} of '{file_name}': {source}")]
    WriteFailed {
        file_name: String,
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Acknowledgement of a fully persisted chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkAck {
    pub file_name: String,
    pub index: u32,
    pub bytes_written: u64,
}

/// Result of a temp namespace sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed_slots: usize,
    pub removed_staging: usize,
    pub bytes_freed: u64,
    pub failures: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.removed_slots + self.removed_staging
    }
}

/// Slot storage rooted at a single flat directory
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Create a store rooted at `root`; the directory is created lazily
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root shared with the catalog
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if it is missing
    pub async fn ensure_root(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StoreError::CannotCreateSlot {
                path: self.root.clone(),
                source,
            })
    }

    /// Path of the slot for `(file_name, index)`
    pub fn slot_path(&self, file_name: &str, index: u32) -> PathBuf {
        self.root.join(layout::slot_name(file_name, index))
    }

    /// Persist one chunk payload, replacing any earlier content of its slot
    ///
    /// `total` is only recorded on the span; the tracker owns totals.
    #[tracing::instrument(
        name = "upload.chunk.put",
        skip(self, reader),
        fields(file_name = %file_name, chunk_index = index, total = total, bytes = tracing::field::Empty),
        err
    )]
    pub async fn put<R>(
        &self,
        file_name: &str,
        index: u32,
        total: u32,
        reader: &mut R,
    ) -> Result<ChunkAck, StoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.ensure_root().await?;

        let staging = self
            .root
            .join(layout::chunk_staging_name(file_name, index));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await
            .map_err(|source| StoreError::CannotCreateSlot {
                path: staging.clone(),
                source,
            })?;

        let written = match write_fully(reader, file).await {
            Ok(bytes) => bytes,
            Err(source) => {
                discard(&staging).await;
                return Err(StoreError::WriteFailed {
                    file_name: file_name.to_string(),
                    index,
                    source,
                });
            }
        };

        let slot = self.slot_path(file_name, index);
        if let Err(source) = tokio::fs::rename(&staging, &slot).await {
            discard(&staging).await;
            return Err(StoreError::WriteFailed {
                file_name: file_name.to_string(),
                index,
                source,
            });
        }

        tracing::Span::current().record("bytes", written);
        tracing::debug!(
            file_name = file_name,
            chunk_index = index,
            bytes = written,
            "Chunk slot written"
        );

        Ok(ChunkAck {
            file_name: file_name.to_string(),
            index,
            bytes_written: written,
        })
    }

    /// Whether the slot for `(file_name, index)` exists
    pub async fn has_slot(&self, file_name: &str, index: u32) -> bool {
        tokio::fs::try_exists(self.slot_path(file_name, index))
            .await
            .unwrap_or(false)
    }

    /// Open a slot for reading; a missing slot yields `None`
    pub async fn open_slot(&self, file_name: &str, index: u32) -> io::Result<Option<File>> {
        match File::open(self.slot_path(file_name, index)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove one slot; returns whether a file was removed
    pub async fn remove_slot(&self, file_name: &str, index: u32) -> io::Result<bool> {
        match tokio::fs::remove_file(self.slot_path(file_name, index)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Best-effort removal of every slot in `0..total`
    ///
    /// Returns the number of slots removed.
    pub async fn remove_slots(&self, file_name: &str, total: u32) -> usize {
        let mut removed = 0;
        for index in 0..total {
            match self.remove_slot(file_name, index).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        file_name = file_name,
                        chunk_index = index,
                        error = %e,
                        "Failed to remove chunk slot"
                    );
                }
            }
        }
        removed
    }

    /// Remove temp files older than `max_age`
    ///
    /// Only names in the temp namespace are considered; artifacts are never
    /// touched. Slots whose file name `in_use` reports as live are kept
    /// regardless of age. A missing root is an empty sweep.
    pub async fn sweep<F>(&self, max_age: Duration, in_use: F) -> Result<SweepReport, StoreError>
    where
        F: Fn(&str) -> bool,
    {
        let mut report = SweepReport::default();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !layout::is_temp_name(name) {
                continue;
            }
            let slot_owner = layout::parse_slot_name(name).map(|(file_name, _)| file_name);
            if slot_owner.is_some_and(|file_name| in_use(file_name)) {
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    report.bytes_freed += metadata.len();
                    if slot_owner.is_some() {
                        report.removed_slots += 1;
                    } else {
                        report.removed_staging += 1;
                    }
                    tracing::debug!(file = name, age_secs = age.as_secs(), "Swept temp file");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(file = name, error = %e, "Failed to sweep temp file");
                }
            }
        }

        Ok(report)
    }
}

/// Copy the whole payload into `file` and make it durable
async fn write_fully<R>(reader: &mut R, file: File) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut writer = BufWriter::new(file);
    let bytes = tokio::io::copy(reader, &mut writer).await?;
    writer.flush().await?;
    writer.get_ref().sync_data().await?;
    Ok(bytes)
}

/// Remove a staging file left by a failed write
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
