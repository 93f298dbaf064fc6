//! File record store: the typed query surface over the `files` table.

use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{FileRecord, NewFileRecord};

#[derive(Clone)]
pub struct FileRepository {
    db: Database,
}

impl FileRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new record and return it as stored
    pub async fn insert(&self, new: &NewFileRecord) -> Result<FileRecord> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO files (id, token, file_name, mime, file_size, password_hash, max_downloads, download_count, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
            "#,
        )
        .bind(&new.id)
        .bind(&new.token)
        .bind(&new.file_name)
        .bind(&new.mime)
        .bind(new.file_size)
        .bind(&new.password_hash)
        .bind(new.max_downloads)
        .bind(new.expires_at.to_rfc3339())
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        self.find_by_id(&new.id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Inserted record {} vanished", new.id)))
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<FileRecord>> {
        let file = sqlx::query_as("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(file)
    }

    /// Oldest live record carrying `token`. Expired rows are skipped, so an
    /// expired record never shadows a colliding live one.
    pub async fn find_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Option<FileRecord>> {
        let candidates: Vec<FileRecord> =
            sqlx::query_as("SELECT * FROM files WHERE token = ? ORDER BY created_at ASC, rowid ASC")
                .bind(token)
                .fetch_all(self.db.pool())
                .await?;

        Ok(candidates.into_iter().find(|f| !f.is_expired_at(now)))
    }

    /// Atomically bump the download counter unless the cap is already reached.
    /// Returns false when no row was updated.
    pub async fn increment_download_count(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE files
            SET download_count = download_count + 1, updated_at = ?
            WHERE id = ? AND (max_downloads IS NULL OR download_count < max_downloads)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One page in creation order
    pub async fn page(&self, offset: i64, limit: i64) -> Result<Vec<FileRecord>> {
        let files = sqlx::query_as(
            "SELECT * FROM files ORDER BY created_at ASC, rowid ASC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset.max(0))
        .fetch_all(self.db.pool())
        .await?;
        Ok(files)
    }

    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM files")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
