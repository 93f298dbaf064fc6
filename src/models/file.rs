use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Shared file metadata, one row per blob on disk
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub token: String,
    pub file_name: String,
    pub mime: String,
    pub file_size: i64,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    /// Size as stored on disk. Negative sizes never get past upload validation.
    pub fn size(&self) -> u64 {
        self.file_size.max(0) as u64
    }

    /// An unparseable expiry is treated as already expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(&self.expires_at) {
            Ok(expiry) => now >= expiry,
            Err(_) => true,
        }
    }
}

/// Row to insert for a fresh upload
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub id: String,
    pub token: String,
    pub file_name: String,
    pub mime: String,
    pub file_size: i64,
    pub password_hash: Option<String>,
    pub max_downloads: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

/// Record projection returned to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    pub id: String,
    pub token: String,
    pub file_name: String,
    pub mime: String,
    pub file_size: i64,
    pub has_password: bool,
    pub max_downloads: Option<i64>,
    pub download_count: i64,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<FileRecord> for FileResponse {
    fn from(file: FileRecord) -> Self {
        Self {
            has_password: file.password_hash.is_some(),
            id: file.id,
            token: file.token,
            file_name: file.file_name,
            mime: file.mime,
            file_size: file.file_size,
            max_downloads: file.max_downloads,
            download_count: file.download_count,
            expires_at: file.expires_at,
            created_at: file.created_at,
            updated_at: file.updated_at,
        }
    }
}

/// Why a download or delete was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenyCause {
    MaxDownloads,
    Password,
}

impl std::fmt::Display for DenyCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyCause::MaxDownloads => write!(f, "MAX_DOWNLOADS"),
            DenyCause::Password => write!(f, "PASSWORD"),
        }
    }
}

/// Upload parameters collected from the form
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime: String,
    /// Byte count the body must match exactly
    pub declared_size: u64,
    pub password: Option<String>,
    pub max_downloads: Option<i64>,
}

/// File list query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub offset: i64,
}

/// Password carried on download/delete
#[derive(Debug, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}
