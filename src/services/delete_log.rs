use chrono::{DateTime, Local};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::config::MB;
use crate::error::Result;
use crate::models::{DeleteLog, DeleteLogEntry, EntryType, FileRecord};
use crate::storage::{extension, Tier, TierRouter};

pub const DATE_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Writes the audit snapshot taken before blobs are removed.
///
/// Directory listings are read fresh from disk on every call. Only a failure
/// to create or write the log file itself is reported; unreadable tier
/// directories or entries degrade to fewer or emptier log entries.
#[derive(Debug, Clone)]
pub struct DeleteLogWriter {
    router: TierRouter,
}

impl DeleteLogWriter {
    pub fn new(router: TierRouter) -> Self {
        Self { router }
    }

    /// Snapshot only the blobs belonging to `records`
    pub async fn snapshot_records(&self, records: &[FileRecord], dest: &Path) -> Result<PathBuf> {
        let names: HashSet<String> = records
            .iter()
            .filter_map(|r| TierRouter::blob_name(&r.id, &r.file_name).ok())
            .collect();
        self.snapshot(Some(&names), dest).await
    }

    /// Snapshot everything under both tiers
    pub async fn snapshot_all(&self, dest: &Path) -> Result<PathBuf> {
        self.snapshot(None, dest).await
    }

    async fn snapshot(&self, filter: Option<&HashSet<String>>, dest: &Path) -> Result<PathBuf> {
        let log = DeleteLog {
            large: self.read_tier(Tier::Large, filter).await,
            small: self.read_tier(Tier::Small, filter).await,
        };
        let path = write_log(&log, dest).await?;
        tracing::info!(
            "Delete log {:?} written ({} large, {} small)",
            path,
            log.large.len(),
            log.small.len()
        );
        Ok(path)
    }

    async fn read_tier(&self, tier: Tier, filter: Option<&HashSet<String>>) -> Vec<DeleteLogEntry> {
        let dir = self.router.dir(tier);
        if let Err(e) = fs::create_dir_all(&dir).await {
            tracing::warn!("Cannot create tier directory {:?}: {}", dir, e);
        }

        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!("Cannot read tier directory {:?}: {}", dir, e);
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        loop {
            let entry = match read_dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Stopped listing {:?}: {}", dir, e);
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if filter.is_some_and(|names| !names.contains(&name)) {
                continue;
            }
            entries.push(describe(&entry, name).await);
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

async fn describe(entry: &fs::DirEntry, name: String) -> DeleteLogEntry {
    let is_dir = entry
        .file_type()
        .await
        .map(|t| t.is_dir())
        .unwrap_or(false);

    let mut last_modified = None;
    let mut size = None;
    if let Ok(meta) = entry.metadata().await {
        if let Ok(modified) = meta.modified() {
            last_modified = Some(DateTime::<Local>::from(modified).format(DATE_FORMAT).to_string());
        }
        if !is_dir {
            size = Some(human_size(meta.len()));
        }
    }

    DeleteLogEntry {
        extension: extension(&name).map(|ext| format!(".{}", ext)),
        name,
        entry_type: if is_dir {
            EntryType::Directory
        } else {
            EntryType::File
        },
        last_modified,
        size,
    }
}

pub fn human_size(bytes: u64) -> String {
    format!("{:.2}MB", bytes as f64 / MB as f64)
}

/// Write `log` to a new `<timestamp>.json` under `dest`, never replacing an
/// existing log.
async fn write_log(log: &DeleteLog, dest: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dest).await?;

    let stamp = Local::now().format(DATE_FORMAT).to_string();
    let body = serde_json::to_vec_pretty(log)?;

    let mut attempt = 0u32;
    loop {
        let file_name = if attempt == 0 {
            format!("{}.json", stamp)
        } else {
            format!("{}_{}.json", stamp, attempt)
        };
        let path = dest.join(file_name);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(&body).await?;
                file.flush().await?;
                file.sync_all().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
