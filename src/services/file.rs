use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{DenyCause, FileRecord, NewFileRecord, UploadRequest};
use crate::repository::FileRepository;
use crate::services::{token, AccessPolicy, DeleteLogWriter};
use crate::storage::{extension, BlobReader, StorageProvider, Tier, TierRouter};

/// An authorised download: the record after its counter bump, plus the open blob
pub struct Download {
    pub record: FileRecord,
    pub reader: BlobReader,
}

/// Upload/download/delete orchestration.
///
/// A record is visible iff its blob is on disk. Upload inserts the record
/// first and deletes it again if the blob write fails; delete removes the
/// blob first and leaves the record alone if that fails.
pub struct FileService {
    repo: FileRepository,
    storage: Arc<dyn StorageProvider>,
    router: TierRouter,
    delete_log: DeleteLogWriter,
    config: Arc<Config>,
}

impl FileService {
    pub fn new(repo: FileRepository, storage: Arc<dyn StorageProvider>, config: Arc<Config>) -> Self {
        let router = TierRouter::from_config(&config.storage);
        Self {
            repo,
            storage,
            delete_log: DeleteLogWriter::new(router.clone()),
            router,
            config,
        }
    }

    /// Store a new blob and its record
    pub async fn upload(
        &self,
        req: UploadRequest,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<FileRecord> {
        let max = self.config.storage.max_upload();
        if req.declared_size > max {
            return Err(AppError::TooLarge {
                max,
                size: Some(req.declared_size),
            });
        }
        validate_file_name(&req.file_name)?;
        if let Some(max_downloads) = req.max_downloads {
            if max_downloads <= 0 {
                return Err(AppError::BadRequest(
                    "max-downloads must be a positive integer".to_string(),
                ));
            }
        }

        self.ensure_tiers().await?;

        let password_hash = match req.password.as_deref() {
            Some(password) if !password.is_empty() => Some(AccessPolicy::hash_password(password)?),
            _ => None,
        };

        let new = NewFileRecord {
            id: token::new_id(),
            token: token::new_token(self.config.share.token_length),
            file_name: req.file_name,
            mime: req.mime,
            file_size: req.declared_size as i64,
            password_hash,
            max_downloads: req.max_downloads,
            expires_at: Utc::now() + Duration::days(self.config.share.expiry_days),
        };
        let path = self.router.blob_path(req.declared_size, &new.id, &new.file_name)?;

        let record = self.repo.insert(&new).await?;

        if let Err(e) = self.storage.put_stream(&path, reader, req.declared_size).await {
            tracing::warn!("Blob write for {} failed: {}", record.id, e);
            self.rollback_insert(&record).await;
            return Err(e);
        }

        tracing::info!(
            "Uploaded {} ({} bytes, {:?} tier) as token {}",
            record.file_name,
            record.file_size,
            self.router.tier(req.declared_size),
            record.token
        );
        Ok(record)
    }

    async fn rollback_insert(&self, record: &FileRecord) {
        match self.repo.delete(&record.id).await {
            Ok(_) => tracing::info!("Rolled back record {} after failed upload", record.id),
            Err(e) => tracing::error!("Rollback of record {} failed: {}", record.id, e),
        }
    }

    /// Live record for `token`; expired and missing look the same
    pub async fn get_by_token(&self, token: &str) -> Result<FileRecord> {
        self.repo
            .find_by_token(token, Utc::now())
            .await?
            .ok_or_else(AppError::not_found)
    }

    pub async fn list_page(&self, offset: i64) -> Result<Vec<FileRecord>> {
        self.repo
            .page(offset, self.config.share.pagination_limit)
            .await
    }

    /// Authorise, count, and open a download.
    ///
    /// The counter is bumped before any byte is streamed, so an aborted
    /// transfer still counts.
    pub async fn download(&self, token: &str, password: Option<&str>) -> Result<Download> {
        let mut record = self.get_by_token(token).await?;
        AccessPolicy::can_download(&record, password)?;

        let path = self.blob_path(&record)?;
        let reader = self.storage.open(&path).await?;

        if !self.repo.increment_download_count(&record.id).await? {
            // Lost a race: another download hit the cap or a delete got here first
            return Err(match self.repo.find_by_id(&record.id).await? {
                Some(_) => AppError::AccessDenied(DenyCause::MaxDownloads),
                None => AppError::not_found(),
            });
        }
        record.download_count += 1;

        tracing::info!(
            "Download {} of {} (token {})",
            record.download_count,
            record.file_name,
            record.token
        );
        Ok(Download { record, reader })
    }

    /// Delete a single shared file, returning its former record
    pub async fn delete(&self, token: &str, password: Option<&str>) -> Result<FileRecord> {
        let record = self.get_by_token(token).await?;
        AccessPolicy::can_delete(&record, password)?;

        let path = self.blob_path(&record)?;
        let log_dir = Path::new(&self.config.storage.request_delete_log_path);
        self.delete_log
            .snapshot_records(std::slice::from_ref(&record), log_dir)
            .await?;

        // Blob first: if this fails the record stays and the delete can be retried
        self.storage.delete(&path).await?;

        if !self.repo.delete(&record.id).await? {
            tracing::warn!("Record {} was already removed", record.id);
        }

        tracing::info!("Deleted {} (token {})", record.file_name, record.token);
        Ok(record)
    }

    /// Wipe both tiers, and every record when `clear_db` is set.
    /// Returns the path of the deletion log.
    pub async fn bulk_clear(&self, clear_db: bool) -> Result<PathBuf> {
        self.ensure_tiers().await?;
        let log_path = self
            .delete_log
            .snapshot_all(Path::new(&self.config.storage.clear_log_path))
            .await?;

        for tier in Tier::ALL {
            self.storage.delete_dir(&self.router.dir(tier)).await?;
        }
        tracing::info!("Cleared all blobs under {:?}", self.router.root());

        if clear_db {
            let removed = self.repo.delete_all().await?;
            tracing::info!("Cleared {} file records", removed);
        }

        Ok(log_path)
    }

    async fn ensure_tiers(&self) -> Result<()> {
        for tier in Tier::ALL {
            self.storage.ensure_dir(&self.router.dir(tier)).await?;
        }
        Ok(())
    }

    fn blob_path(&self, record: &FileRecord) -> Result<PathBuf> {
        self.router
            .blob_path(record.size(), &record.id, &record.file_name)
    }
}

fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(AppError::BadRequest("Invalid file name".to_string()));
    }
    if extension(name).is_none() {
        return Err(AppError::BadRequest(format!(
            "File name '{}' has no extension",
            name
        )));
    }
    Ok(())
}
