use serde::{Deserialize, Serialize};

/// Snapshot of one directory entry taken right before deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteLogEntry {
    #[serde(rename = "fileName")]
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(rename = "lastModified", default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Directory,
}

/// Deletion log file body, grouped by tier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteLog {
    #[serde(rename = "largeSize")]
    pub large: Vec<DeleteLogEntry>,
    #[serde(rename = "smallSize")]
    pub small: Vec<DeleteLogEntry>,
}
