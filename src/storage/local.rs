//! Local directory store backed by `tokio::fs`

use super::types::FileEntry;
use super::LocalStore;
use crate::error::{Result, SessyncError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;

/// [`LocalStore`] over the host filesystem
#[derive(Debug, Clone, Default)]
pub struct FsLocalStore;

impl FsLocalStore {
    /// Create a new filesystem store
    pub fn new() -> Self {
        Self
    }
}

/// Ensures parent directories exist for a given path
async fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SessyncError::Storage(format!(
                    "Failed to create parent directories for {:?}: {}",
                    path, e
                ))
            })?;
        }
    }
    Ok(())
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn list_files(&self, dir: &str) -> Result<Vec<FileEntry>> {
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read directory {}", dir))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    tracing::debug!("Skipping {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }

            let lastmod: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));

            entries.push(FileEntry {
                path: entry.path().to_string_lossy().to_string(),
                basename: entry.file_name().to_string_lossy().to_string(),
                lastmod,
                size: metadata.len(),
            });
        }

        Ok(entries)
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        let target = Path::new(path);
        ensure_parent_dirs(target).await?;

        // Write to a sibling temp file first so readers never see a torn document.
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        tokio::fs::rename(&tmp, target)
            .await
            .with_context(|| format!("Failed to move {:?} into place", tmp))?;
        Ok(())
    }
}
