use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::error::{AppError, Result};
use crate::storage::{BlobReader, StorageProvider};

/// Local file system storage provider
#[derive(Debug, Clone, Default)]
pub struct LocalStorage;

impl LocalStorage {
    pub fn new() -> Self {
        Self
    }

    fn part_path(path: &Path) -> PathBuf {
        let mut name = path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(OsString::new);
        name.push(".part");
        path.with_file_name(name)
    }

    async fn write_part(
        part: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected: u64,
    ) -> Result<u64> {
        let mut file = fs::File::create(part).await?;

        // One byte past `expected` is enough to detect an oversized body
        let mut bounded = reader.take(expected + 1);
        let written = tokio::io::copy(&mut bounded, &mut file).await?;

        if written > expected {
            return Err(AppError::TooLarge {
                max: expected,
                size: None,
            });
        }
        if written < expected {
            return Err(AppError::BadRequest(format!(
                "Upload ended after {} of {} bytes",
                written, expected
            )));
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn put_stream(
        &self,
        path: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected: u64,
    ) -> Result<u64> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part = Self::part_path(path);
        let written = match Self::write_part(&part, reader, expected).await {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&part).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::error!("Failed to remove partial blob {:?}: {}", part, cleanup);
                    }
                }
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part, path).await {
            let _ = fs::remove_file(&part).await;
            return Err(e.into());
        }

        tracing::debug!("Saved {} bytes to {:?}", written, path);
        Ok(written)
    }

    async fn open(&self, path: &Path) -> Result<BlobReader> {
        let file = fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                tracing::warn!("Blob missing at {:?}", path);
                AppError::not_found()
            } else {
                AppError::Storage(format!("Failed to open file: {}", e))
            }
        })?;

        Ok(Box::new(file))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => {
                tracing::debug!("Deleted file {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Blob {:?} already gone", path);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_dir(&self, path: &Path) -> Result<()> {
        match fs::remove_dir_all(path).await {
            Ok(()) => {
                tracing::debug!("Removed directory {:?}", path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
