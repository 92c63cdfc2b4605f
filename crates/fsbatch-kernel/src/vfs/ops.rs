//! VFS operations trait.

use async_trait::async_trait;
use std::path::Path;

use super::types::{DirEntry, FileAttr};
use super::VfsResult;

/// Core VFS operations trait.
///
/// Paths are always relative to the backend's root. The storage handles
/// normalize them before calling in, so backends never see `..`.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    /// Get file attributes.
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, sorted by name.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u64) -> VfsResult<Vec<u8>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Write `data` at `offset`, zero-filling any gap past EOF.
    ///
    /// Returns the number of bytes written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u64>;

    /// Create a new, empty file. Fails if anything exists at `path`.
    async fn create(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Create a directory.
    ///
    /// Succeeds without change if a directory already exists at `path`.
    async fn mkdir(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Set a file's length, shrinking or zero-extending it.
    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        self.read(path, 0, attr.size).await
    }
}
