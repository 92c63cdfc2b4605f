//! Local filesystem backend.
//!
//! Backs persistent storage with a directory on disk, with path security
//! to prevent escaping the root directory.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/var/lib/fsbatch`, then `read("data/a.bin")` reads
/// `/var/lib/fsbatch/data/a.bin`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open a local filesystem rooted at the given path, creating the root
    /// directory if needed.
    ///
    /// The root is canonicalized so symlinked roots (e.g. macOS `/tmp` →
    /// `/private/tmp`) compare correctly during escape checks.
    pub async fn open(root: impl Into<PathBuf>) -> VfsResult<Self> {
        let root: PathBuf = root.into();
        fs::create_dir_all(&root).await?;
        let root = dunce::canonicalize(&root)?;
        Ok(Self { root })
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Returns an error if the path escapes the root, either lexically via
    /// `..` or through a symlink inside the tree.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let mut full = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(s) => full.push(s),
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(VfsError::path_escapes_root(path.display().to_string()));
                }
            }
        }

        // Only existing paths can hide a symlink; new leaves are checked
        // through their parent.
        let anchor = if full.exists() {
            Some(full.clone())
        } else {
            full.parent().filter(|p| p.exists()).map(Path::to_path_buf)
        };
        if let Some(anchor) = anchor {
            let canonical = dunce::canonicalize(&anchor)?;
            if !canonical.starts_with(&self.root) {
                return Err(VfsError::path_escapes_root(format!(
                    "{} is not under {}",
                    canonical.display(),
                    self.root.display()
                )));
            }
        }

        Ok(full)
    }

    /// Convert std::fs::Metadata to FileAttr.
    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        FileAttr {
            size: if meta.is_dir() { 0 } else { meta.len() },
            kind,
            modified: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        }
    }

    async fn require_file(full_path: &Path, path: &Path) -> VfsResult<()> {
        let meta = fs::metadata(full_path).await?;
        if meta.is_dir() {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full_path = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;

        while let Some(entry) = dir.next_entry().await? {
            let kind = if entry.file_type().await?.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            };
            entries.push(DirEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u64) -> VfsResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        Self::require_file(&full_path, path).await?;

        let mut file = fs::File::open(&full_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::new();
        file.take(size).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u64> {
        let full_path = self.resolve(path)?;
        Self::require_file(&full_path, path).await?;

        let mut file = fs::OpenOptions::new().write(true).open(&full_path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(data.len() as u64)
    }

    async fn create(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;
        if full_path == self.root {
            return Err(VfsError::invalid_path("empty file name"));
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await?;

        let meta = file.metadata().await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn mkdir(&self, path: &Path) -> VfsResult<FileAttr> {
        let full_path = self.resolve(path)?;

        match fs::create_dir(&full_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let meta = fs::metadata(&full_path).await?;
                if !meta.is_dir() {
                    return Err(VfsError::already_exists(path.display().to_string()));
                }
            }
            Err(e) => return Err(e.into()),
        }

        let meta = fs::metadata(&full_path).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let full_path = self.resolve(path)?;
        Self::require_file(&full_path, path).await?;

        let file = fs::OpenOptions::new().write(true).open(&full_path).await?;
        file.set_len(size).await?;
        Ok(())
    }
}
