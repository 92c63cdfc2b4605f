//! Handle-level storage provider over a [`VfsOps`] backend.
//!
//! A session never touches paths directly. It holds handles:
//!
//! - [`DirHandle`] - a directory; resolves names to files and directories
//! - [`FileHandle`] - a file entry; yields a [`Blob`] or a [`FileWriter`]
//! - [`Blob`] - an immutable snapshot of a file's bytes
//! - [`FileWriter`] - a positioned writer bound to one file
//!
//! Names are resolved lexically against the handle's directory and clamped
//! at the storage root, so `..` from the root stays at the root.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::{StorageConfig, StorageKind};
use crate::vfs::{LocalBackend, MemoryBackend, QuotaBackend, VfsError, VfsOps, VfsResult};

/// Flags for [`DirHandle::get_file`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetFileFlags {
    /// Create the file if it doesn't exist.
    pub create: bool,
    /// With `create`, fail if the file already exists.
    pub exclusive: bool,
}

impl GetFileFlags {
    /// Open an existing file only.
    pub fn existing() -> Self {
        Self::default()
    }

    /// Open, creating if absent.
    pub fn create() -> Self {
        Self {
            create: true,
            exclusive: false,
        }
    }

    /// Create a new file, failing if one exists.
    pub fn create_exclusive() -> Self {
        Self {
            create: true,
            exclusive: true,
        }
    }
}

/// An opened, quota-limited storage area.
#[derive(Clone)]
pub struct Storage {
    kind: StorageKind,
    fs: Arc<QuotaBackend>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("kind", &self.kind)
            .field("quota", &self.fs.quota())
            .field("used", &self.fs.used())
            .finish()
    }
}

impl Storage {
    /// Open the storage area described by `config`.
    ///
    /// Temporary storage lives in memory. Persistent storage lives under
    /// `config.root`, or the per-user data directory when unset.
    #[tracing::instrument(skip(config), fields(kind = ?config.kind, quota = config.quota_bytes))]
    pub async fn open(config: &StorageConfig) -> VfsResult<Self> {
        let inner: Arc<dyn VfsOps> = match config.kind {
            StorageKind::Temporary => Arc::new(MemoryBackend::new()),
            StorageKind::Persistent => {
                let root = config
                    .persistent_root()
                    .ok_or_else(|| VfsError::other("no data directory for persistent storage"))?;
                tracing::info!(root = %root.display(), "opening persistent storage");
                Arc::new(LocalBackend::open(root).await?)
            }
        };
        Self::with_backend(config.kind, inner, config.quota_bytes).await
    }

    /// Wrap an already constructed backend with a quota.
    pub async fn with_backend(
        kind: StorageKind,
        inner: Arc<dyn VfsOps>,
        quota_bytes: u64,
    ) -> VfsResult<Self> {
        let fs = Arc::new(QuotaBackend::new(inner, quota_bytes).await?);
        Ok(Self { kind, fs })
    }

    /// Temporary in-memory storage with the given quota.
    pub async fn temporary(quota_bytes: u64) -> VfsResult<Self> {
        Self::with_backend(
            StorageKind::Temporary,
            Arc::new(MemoryBackend::new()),
            quota_bytes,
        )
        .await
    }

    /// Storage kind.
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// The root directory handle.
    pub fn root(&self) -> DirHandle {
        DirHandle {
            fs: self.fs.clone(),
            path: PathBuf::new(),
        }
    }

    /// Quota in bytes.
    pub fn quota(&self) -> u64 {
        self.fs.quota()
    }

    /// Bytes in use.
    pub fn used(&self) -> u64 {
        self.fs.used()
    }

    /// Bytes still free under the quota.
    pub fn available(&self) -> u64 {
        self.fs.available()
    }
}

/// Resolve `name` against `base`, clamping `..` at the root.
///
/// A leading `/` resolves from the root instead of `base`.
fn resolve_name(base: &Path, name: &str) -> VfsResult<PathBuf> {
    if name.is_empty() {
        return Err(VfsError::invalid_path("empty name"));
    }

    let mut result = if name.starts_with('/') {
        PathBuf::new()
    } else {
        base.to_path_buf()
    };
    for component in Path::new(name).components() {
        match component {
            Component::Normal(s) => result.push(s),
            Component::ParentDir => {
                result.pop();
            }
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(_) => return Err(VfsError::invalid_path(name)),
        }
    }
    Ok(result)
}

fn display_path(path: &Path) -> String {
    format!("/{}", path.display())
}

/// Handle to a directory in a storage area.
#[derive(Clone)]
pub struct DirHandle {
    fs: Arc<dyn VfsOps>,
    path: PathBuf,
}

impl fmt::Debug for DirHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DirHandle").field(&self.full_path()).finish()
    }
}

impl DirHandle {
    /// Absolute path within the storage area, e.g. `/docs/img`.
    pub fn full_path(&self) -> String {
        display_path(&self.path)
    }

    /// Path relative to the storage root (empty for the root).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True for the storage root.
    pub fn is_root(&self) -> bool {
        self.path.as_os_str().is_empty()
    }

    /// Resolve `name` to a file under this directory.
    ///
    /// - `create = false`: the file must exist.
    /// - `create = true, exclusive = false`: created if absent.
    /// - `create = true, exclusive = true`: created; fails if present.
    ///
    /// A directory at `name` is always an error.
    pub async fn get_file(&self, name: &str, flags: GetFileFlags) -> VfsResult<FileHandle> {
        let path = resolve_name(&self.path, name)?;
        if path.as_os_str().is_empty() {
            return Err(VfsError::is_a_directory(display_path(&path)));
        }

        match self.fs.getattr(&path).await {
            Ok(attr) if attr.is_dir() => return Err(VfsError::is_a_directory(display_path(&path))),
            Ok(_) if flags.create && flags.exclusive => {
                return Err(VfsError::already_exists(display_path(&path)));
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() && flags.create => match self.fs.create(&path).await {
                Ok(_) => {}
                // Lost a creation race; only exclusive callers care.
                Err(e) if e.is_already_exists() && !flags.exclusive => {}
                Err(e) => return Err(e),
            },
            Err(e) => return Err(e),
        }

        Ok(FileHandle {
            fs: self.fs.clone(),
            path,
        })
    }

    /// Resolve `name` to a directory under this directory.
    ///
    /// With `create`, the directory is made if absent (never an error when
    /// it already exists). Without it, the directory must exist.
    pub async fn get_directory(&self, name: &str, create: bool) -> VfsResult<DirHandle> {
        let path = resolve_name(&self.path, name)?;

        if create {
            self.fs.mkdir(&path).await?;
        } else {
            let attr = self.fs.getattr(&path).await?;
            if !attr.is_dir() {
                return Err(VfsError::not_a_directory(display_path(&path)));
            }
        }

        Ok(DirHandle {
            fs: self.fs.clone(),
            path,
        })
    }
}

impl PartialEq for DirHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fs, &other.fs) && self.path == other.path
    }
}

/// Handle to a file entry.
#[derive(Clone)]
pub struct FileHandle {
    fs: Arc<dyn VfsOps>,
    path: PathBuf,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHandle").field(&self.full_path()).finish()
    }
}

impl FileHandle {
    /// Absolute path within the storage area.
    pub fn full_path(&self) -> String {
        display_path(&self.path)
    }

    /// File name (last path component).
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Current length in bytes.
    pub async fn size(&self) -> VfsResult<u64> {
        Ok(self.fs.getattr(&self.path).await?.size)
    }

    /// Snapshot the file's current contents.
    pub async fn file(&self) -> VfsResult<Blob> {
        let data = self.fs.read_all(&self.path).await?;
        Ok(Blob::new(self.name(), data))
    }

    /// Create a writer positioned at the start of the file.
    pub async fn create_writer(&self) -> VfsResult<FileWriter> {
        let attr = self.fs.getattr(&self.path).await?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(self.full_path()));
        }
        Ok(FileWriter {
            fs: self.fs.clone(),
            path: self.path.clone(),
            position: 0,
        })
    }
}

/// Immutable snapshot of a file's bytes.
///
/// Cloning is cheap; clones share the same buffer.
#[derive(Clone, PartialEq, Eq)]
pub struct Blob {
    name: String,
    data: Arc<[u8]>,
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Blob {
    /// Create a blob.
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Name of the file this blob was taken from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the blob holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Decode as UTF-8 text.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }
}

/// Positioned writer bound to one file.
///
/// Writes land at the current position and advance it. Truncation clamps
/// the position to the new length.
pub struct FileWriter {
    fs: Arc<dyn VfsOps>,
    path: PathBuf,
    position: u64,
}

impl fmt::Debug for FileWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWriter")
            .field("path", &display_path(&self.path))
            .field("position", &self.position)
            .finish()
    }
}

impl FileWriter {
    /// Current write position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Write `data` at the current position.
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<u64> {
        let written = self.fs.write(&self.path, self.position, data).await?;
        self.position += written;
        Ok(written)
    }

    /// Set the file length to `size`.
    pub async fn truncate(&mut self, size: u64) -> VfsResult<()> {
        self.fs.truncate(&self.path, size).await?;
        self.position = self.position.min(size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn root() -> DirHandle {
        Storage::temporary(1024).await.unwrap().root()
    }

    #[test]
    fn test_resolve_name() {
        let base = Path::new("a/b");
        assert_eq!(resolve_name(base, "c").unwrap(), PathBuf::from("a/b/c"));
        assert_eq!(resolve_name(base, "..").unwrap(), PathBuf::from("a"));
        assert_eq!(resolve_name(base, "/x").unwrap(), PathBuf::from("x"));
        assert_eq!(resolve_name(Path::new(""), "..").unwrap(), PathBuf::new());
        assert!(resolve_name(base, "").is_err());
    }

    #[tokio::test]
    async fn test_get_file_existing_only() {
        let root = root().await;
        let err = root
            .get_file("missing.txt", GetFileFlags::existing())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_file_create_then_exclusive_conflict() {
        let root = root().await;
        root.get_file("a.txt", GetFileFlags::create()).await.unwrap();
        root.get_file("a.txt", GetFileFlags::create()).await.unwrap();

        let err = root
            .get_file("a.txt", GetFileFlags::create_exclusive())
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_get_file_on_directory_fails() {
        let root = root().await;
        root.get_directory("docs", true).await.unwrap();

        let err = root
            .get_file("docs", GetFileFlags::create())
            .await
            .unwrap_err();
        assert!(matches!(err, VfsError::IsADirectory(_)));
    }

    #[tokio::test]
    async fn test_get_directory_without_create() {
        let root = root().await;
        assert!(root.get_directory("nope", false).await.is_err());

        let docs = root.get_directory("docs", true).await.unwrap();
        assert_eq!(docs.full_path(), "/docs");
        let again = root.get_directory("docs", false).await.unwrap();
        assert_eq!(docs, again);
    }

    #[tokio::test]
    async fn test_parent_of_root_is_root() {
        let root = root().await;
        let up = root.get_directory("..", false).await.unwrap();
        assert!(up.is_root());
    }

    #[tokio::test]
    async fn test_writer_position_and_truncate() {
        let root = root().await;
        let file = root.get_file("w.txt", GetFileFlags::create()).await.unwrap();
        let mut writer = file.create_writer().await.unwrap();

        writer.write(b"hello").await.unwrap();
        writer.write(b" world").await.unwrap();
        assert_eq!(writer.position(), 11);

        writer.truncate(5).await.unwrap();
        assert_eq!(writer.position(), 5);
        assert_eq!(file.size().await.unwrap(), 5);

        let blob = file.file().await.unwrap();
        assert_eq!(blob.name(), "w.txt");
        assert_eq!(blob.text().unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_storage_usage_tracks_writes() {
        let storage = Storage::temporary(8).await.unwrap();
        let file = storage
            .root()
            .get_file("q.bin", GetFileFlags::create())
            .await
            .unwrap();
        let mut writer = file.create_writer().await.unwrap();
        writer.write(&[0u8; 6]).await.unwrap();

        assert_eq!(storage.used(), 6);
        assert_eq!(storage.available(), 2);
        assert!(writer.write(&[0u8; 3]).await.is_err());
        assert_eq!(writer.position(), 6);
    }
}
