//! File catalog
//!
//! Lists, resolves and deletes published artifacts. Entries in the temp
//! namespace (chunk slots and staging files) are never visible here.

use crate::upload::layout;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;

pub mod media;

pub use media::{content_type, is_previewable};

/// Catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// An artifact opened for reading
#[derive(Debug)]
pub struct OpenArtifact {
    pub file: File,
    pub size: u64,
    pub content_type: &'static str,
}

/// Read-side view over the storage root
#[derive(Debug, Clone)]
pub struct FileCatalog {
    root: PathBuf,
}

impl FileCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All published artifacts, sorted by name
    pub async fn list(&self) -> Result<Vec<ArtifactEntry>, CatalogError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if layout::is_temp_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                _ => continue,
            };
            artifacts.push(ArtifactEntry {
                name,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(artifacts)
    }

    /// Path of a published artifact
    pub async fn resolve(&self, file_name: &str) -> Result<PathBuf, CatalogError> {
        let path = self.artifact_path(file_name)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(CatalogError::NotFound(file_name.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Open a published artifact for streaming
    pub async fn open(&self, file_name: &str) -> Result<OpenArtifact, CatalogError> {
        let path = self.resolve(file_name).await?;
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CatalogError::NotFound(file_name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        Ok(OpenArtifact {
            file,
            size,
            content_type: content_type(file_name),
        })
    }

    /// Delete a published artifact
    pub async fn delete(&self, file_name: &str) -> Result<(), CatalogError> {
        let path = self.resolve(file_name).await?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file_name = file_name, "Deleted artifact");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CatalogError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn artifact_path(&self, file_name: &str) -> Result<PathBuf, CatalogError> {
        layout::validate_file_name(file_name)
            .map_err(|e| CatalogError::InvalidName(e.to_string()))?;
        Ok(self.root.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_excludes_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("b.txt"), b"bb").await.unwrap();
        tokio::fs::write(dir.path().join("a.pdf"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("a.pdf_0.tmp"), b"slot").await.unwrap();
        tokio::fs::write(dir.path().join("c.bin.1234.merge.tmp"), b"m")
            .await
            .unwrap();
        tokio::fs::create_dir(dir.path().join("subdir")).await.unwrap();

        let catalog = FileCatalog::new(dir.path());
        let names: Vec<_> = catalog
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| (entry.name, entry.size))
            .collect();

        assert_eq!(names, vec![("a.pdf".to_string(), 1), ("b.txt".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path().join("absent"));
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_reports_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = FileCatalog::new(dir.path());

        let result = catalog.delete("ghost.txt").await;
        assert!(matches!(result, Err(CatalogError::NotFound(name)) if name == "ghost.txt"));
    }

    #[tokio::test]
    async fn test_delete_removes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("x.txt"), b"x").await.unwrap();
        let catalog = FileCatalog::new(dir.path());

        catalog.delete("x.txt").await.unwrap();
        assert!(catalog.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_rejects_temp_and_traversal_names() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a_0.tmp"), b"slot").await.unwrap();
        let catalog = FileCatalog::new(dir.path());

        assert!(matches!(
            catalog.resolve("a_0.tmp").await,
            Err(CatalogError::InvalidName(_))
        ));
        assert!(matches!(
            catalog.resolve("../etc/passwd").await,
            Err(CatalogError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_open_reports_size_and_type() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("pic.png"), b"12345").await.unwrap();
        let catalog = FileCatalog::new(dir.path());

        let artifact = catalog.open("pic.png").await.unwrap();
        assert_eq!(artifact.size, 5);
        assert_eq!(artifact.content_type, "image/png");
    }
}
