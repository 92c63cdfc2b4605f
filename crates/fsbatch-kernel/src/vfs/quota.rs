//! Byte quota enforced over another backend.
//!
//! Usage is the sum of file sizes. Directories are free. The initial usage
//! is measured by walking the wrapped backend once at construction; after
//! that every size-changing call reserves its growth before it reaches the
//! inner backend and gives the reservation back if the call fails.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::ops::VfsOps;
use super::types::{DirEntry, FileAttr};

/// A [`VfsOps`] wrapper that rejects growth past `quota` bytes.
pub struct QuotaBackend {
    inner: Arc<dyn VfsOps>,
    quota: u64,
    used: Mutex<u64>,
}

impl std::fmt::Debug for QuotaBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaBackend")
            .field("quota", &self.quota)
            .field("used", &*self.used.lock())
            .finish()
    }
}

impl QuotaBackend {
    /// Wrap `inner`, measuring what it already stores.
    pub async fn new(inner: Arc<dyn VfsOps>, quota: u64) -> VfsResult<Self> {
        let used = measure(inner.as_ref()).await?;
        tracing::debug!(quota, used, "quota backend ready");
        Ok(Self {
            inner,
            quota,
            used: Mutex::new(used),
        })
    }

    /// Quota in bytes.
    pub fn quota(&self) -> u64 {
        self.quota
    }

    /// Bytes currently in use.
    pub fn used(&self) -> u64 {
        *self.used.lock()
    }

    /// Bytes still available.
    pub fn available(&self) -> u64 {
        self.quota.saturating_sub(self.used())
    }

    /// Adjust usage from `old_size` to `new_size`.
    ///
    /// Growth is rejected when it does not fit; shrinking always succeeds.
    fn reserve(&self, old_size: u64, new_size: u64) -> VfsResult<()> {
        let mut used = self.used.lock();
        if new_size > old_size {
            let growth = new_size - old_size;
            let available = self.quota.saturating_sub(*used);
            if growth > available {
                return Err(VfsError::QuotaExceeded {
                    requested: growth,
                    available,
                });
            }
            *used += growth;
        } else {
            *used = used.saturating_sub(old_size - new_size);
        }
        Ok(())
    }

    /// Replace a `reserved` size with the size the file actually has.
    ///
    /// Used after a failed inner call, which may have changed the file
    /// partway. Never fails; usage just follows the file.
    async fn settle(&self, path: &Path, reserved: u64, fallback: u64) {
        let actual = match self.inner.getattr(path).await {
            Ok(attr) => attr.size,
            Err(_) => fallback,
        };
        let mut used = self.used.lock();
        *used = used.saturating_sub(reserved).saturating_add(actual);
    }
}

/// Sum the sizes of every file under the backend root.
async fn measure(fs: &dyn VfsOps) -> VfsResult<u64> {
    let mut total = 0u64;
    let mut pending = vec![PathBuf::new()];

    while let Some(dir) = pending.pop() {
        for entry in fs.readdir(&dir).await? {
            let path = dir.join(&entry.name);
            if entry.kind.is_dir() {
                pending.push(path);
            } else {
                total += fs.getattr(&path).await?.size;
            }
        }
    }
    Ok(total)
}

#[async_trait]
impl VfsOps for QuotaBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        self.inner.getattr(path).await
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        self.inner.readdir(path).await
    }

    async fn read(&self, path: &Path, offset: u64, size: u64) -> VfsResult<Vec<u8>> {
        self.inner.read(path, offset, size).await
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u64> {
        let old_size = self.inner.getattr(path).await?.size;
        let new_size = old_size.max(offset + data.len() as u64);
        self.reserve(old_size, new_size)?;

        match self.inner.write(path, offset, data).await {
            Ok(written) => Ok(written),
            Err(e) => {
                self.settle(path, new_size, old_size).await;
                Err(e)
            }
        }
    }

    async fn create(&self, path: &Path) -> VfsResult<FileAttr> {
        self.inner.create(path).await
    }

    async fn mkdir(&self, path: &Path) -> VfsResult<FileAttr> {
        self.inner.mkdir(path).await
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let old_size = self.inner.getattr(path).await?.size;
        self.reserve(old_size, size)?;

        match self.inner.truncate(path, size).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.settle(path, size, old_size).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryBackend;

    async fn quota_fs(quota: u64) -> QuotaBackend {
        QuotaBackend::new(Arc::new(MemoryBackend::new()), quota)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_write_within_quota() {
        let fs = quota_fs(16).await;
        fs.create(Path::new("a.bin")).await.unwrap();
        fs.write(Path::new("a.bin"), 0, &[1u8; 10]).await.unwrap();

        assert_eq!(fs.used(), 10);
        assert_eq!(fs.available(), 6);
    }

    #[tokio::test]
    async fn test_write_over_quota_rejected() {
        let fs = quota_fs(8).await;
        fs.create(Path::new("a.bin")).await.unwrap();
        fs.write(Path::new("a.bin"), 0, b"1234").await.unwrap();

        let err = fs.write(Path::new("a.bin"), 4, b"567890").await.unwrap_err();
        assert!(matches!(
            err,
            VfsError::QuotaExceeded {
                requested: 6,
                available: 4
            }
        ));

        // Rejected write leaves the file untouched
        let data = fs.read_all(Path::new("a.bin")).await.unwrap();
        assert_eq!(data, b"1234");
        assert_eq!(fs.used(), 4);
    }

    #[tokio::test]
    async fn test_overwrite_in_place_costs_nothing() {
        let fs = quota_fs(4).await;
        fs.create(Path::new("a.bin")).await.unwrap();
        fs.write(Path::new("a.bin"), 0, b"abcd").await.unwrap();
        fs.write(Path::new("a.bin"), 0, b"wxyz").await.unwrap();

        assert_eq!(fs.used(), 4);
    }

    #[tokio::test]
    async fn test_truncate_releases_and_charges() {
        let fs = quota_fs(10).await;
        fs.create(Path::new("a.bin")).await.unwrap();
        fs.write(Path::new("a.bin"), 0, &[7u8; 8]).await.unwrap();

        fs.truncate(Path::new("a.bin"), 2).await.unwrap();
        assert_eq!(fs.used(), 2);

        assert!(fs.truncate(Path::new("a.bin"), 11).await.is_err());
        fs.truncate(Path::new("a.bin"), 10).await.unwrap();
        assert_eq!(fs.used(), 10);
    }

    #[tokio::test]
    async fn test_failed_inner_write_returns_reservation() {
        let fs = quota_fs(10).await;
        fs.mkdir(Path::new("dir")).await.unwrap();

        assert!(fs.write(Path::new("dir"), 0, b"abc").await.is_err());
        assert_eq!(fs.used(), 0);
    }

    /// Writes half the data, then fails like an interrupted disk write.
    struct TornWrites(MemoryBackend);

    #[async_trait]
    impl VfsOps for TornWrites {
        async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
            self.0.getattr(path).await
        }

        async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
            self.0.readdir(path).await
        }

        async fn read(&self, path: &Path, offset: u64, size: u64) -> VfsResult<Vec<u8>> {
            self.0.read(path, offset, size).await
        }

        async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u64> {
            self.0.write(path, offset, &data[..data.len() / 2]).await?;
            Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "disk full").into())
        }

        async fn create(&self, path: &Path) -> VfsResult<FileAttr> {
            self.0.create(path).await
        }

        async fn mkdir(&self, path: &Path) -> VfsResult<FileAttr> {
            self.0.mkdir(path).await
        }

        async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
            self.0.truncate(path, size).await
        }
    }

    #[tokio::test]
    async fn test_failed_write_charges_what_landed() {
        let fs = QuotaBackend::new(Arc::new(TornWrites(MemoryBackend::new())), 100)
            .await
            .unwrap();
        fs.create(Path::new("t.bin")).await.unwrap();

        assert!(fs.write(Path::new("t.bin"), 0, &[1u8; 10]).await.is_err());
        assert_eq!(fs.getattr(Path::new("t.bin")).await.unwrap().size, 5);
        assert_eq!(fs.used(), 5);
    }

    #[tokio::test]
    async fn test_initial_usage_measured() {
        let inner = Arc::new(MemoryBackend::new());
        inner.mkdir(Path::new("d")).await.unwrap();
        inner.create(Path::new("d/x")).await.unwrap();
        inner.write(Path::new("d/x"), 0, b"12345").await.unwrap();
        inner.create(Path::new("y")).await.unwrap();
        inner.write(Path::new("y"), 0, b"12").await.unwrap();

        let fs = QuotaBackend::new(inner, 100).await.unwrap();
        assert_eq!(fs.used(), 7);
    }
}
