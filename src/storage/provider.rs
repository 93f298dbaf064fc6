use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncRead;

use crate::error::Result;

/// Readable blob handed back to the HTTP layer
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

/// Blob storage backend
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Create a directory and any missing parents
    async fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// Stream exactly `expected` bytes from `reader` into `path`.
    ///
    /// The blob only becomes visible at `path` once fully written; a body
    /// that is longer or shorter than `expected` leaves nothing behind.
    async fn put_stream(
        &self,
        path: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        expected: u64,
    ) -> Result<u64>;

    /// Open a blob for reading; a missing blob is `NotFound`
    async fn open(&self, path: &Path) -> Result<BlobReader>;

    /// Remove a single blob
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree
    async fn delete_dir(&self, path: &Path) -> Result<()>;
}
