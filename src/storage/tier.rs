//! Size-tier placement of blobs on disk.
//!
//! Every blob lives at `<root>/<tier>/<id>.<ext>`; the tier is decided by
//! the declared size alone, so the path computed at upload time is the same
//! one recomputed at download and delete time.

use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Small,
    Large,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Large, Tier::Small];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Tier::Small => "small",
            Tier::Large => "large",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TierRouter {
    root: PathBuf,
    threshold: u64,
}

impl TierRouter {
    pub fn new(root: impl Into<PathBuf>, threshold: u64) -> Self {
        Self {
            root: root.into(),
            threshold,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.upload_path, config.split_threshold())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Large iff strictly above the threshold
    pub fn tier(&self, size: u64) -> Tier {
        if size > self.threshold {
            Tier::Large
        } else {
            Tier::Small
        }
    }

    pub fn dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.dir_name())
    }

    pub fn tier_path(&self, size: u64) -> PathBuf {
        self.dir(self.tier(size))
    }

    /// On-disk name of a blob: the record id plus the original extension
    pub fn blob_name(id: &str, file_name: &str) -> Result<String> {
        let ext = extension(file_name).ok_or_else(|| {
            AppError::BadRequest(format!("File name '{}' has no extension", file_name))
        })?;
        Ok(format!("{}.{}", id, ext))
    }

    pub fn blob_path(&self, size: u64, id: &str, file_name: &str) -> Result<PathBuf> {
        Ok(self.tier_path(size).join(Self::blob_name(id, file_name)?))
    }
}

/// Text after the last `.`, if any and non-empty
pub fn extension(file_name: &str) -> Option<&str> {
    file_name
        .rfind('.')
        .map(|i| &file_name[i + 1..])
        .filter(|ext| !ext.is_empty())
}
