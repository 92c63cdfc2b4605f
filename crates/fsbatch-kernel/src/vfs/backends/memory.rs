//! In-memory filesystem backend.
//!
//! Backs temporary storage and tests. All data is lost when dropped.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType};

#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, attr: FileAttr },
    Directory { attr: FileAttr },
}

impl Entry {
    fn attr(&self) -> &FileAttr {
        match self {
            Entry::File { attr, .. } | Entry::Directory { attr } => attr,
        }
    }

    fn kind(&self) -> FileType {
        self.attr().kind
    }
}

type EntryMap = HashMap<PathBuf, Entry>;

/// In-memory filesystem backend.
///
/// A flat map from normalized path to entry; the root is the empty path and
/// always exists.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<EntryMap>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            PathBuf::new(),
            Entry::Directory {
                attr: FileAttr::directory(),
            },
        );
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Strip the root and `.`, fold `..` lexically.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn display(path: &Path) -> String {
        path.display().to_string()
    }

    /// The parent of `path` must be an existing directory.
    fn check_parent(entries: &EntryMap, path: &Path) -> VfsResult<()> {
        let parent = path.parent().unwrap_or(Path::new(""));
        match entries.get(parent) {
            Some(Entry::Directory { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(VfsError::not_a_directory(Self::display(parent))),
            None => Err(VfsError::not_found(Self::display(parent))),
        }
    }

    /// File contents and attributes at `path`, or the matching error.
    fn file_mut<'a>(
        entries: &'a mut EntryMap,
        path: &Path,
    ) -> VfsResult<(&'a mut Vec<u8>, &'a mut FileAttr)> {
        match entries.get_mut(path) {
            Some(Entry::File { data, attr }) => Ok((data, attr)),
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(path))),
            None => Err(VfsError::not_found(Self::display(path))),
        }
    }
}

#[async_trait]
impl VfsOps for MemoryBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let path = Self::normalize(path);
        self.entries
            .read()
            .get(&path)
            .map(|e| e.attr().clone())
            .ok_or_else(|| VfsError::not_found(Self::display(&path)))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let dir = Self::normalize(path);
        let entries = self.entries.read();

        match entries.get(&dir) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => return Err(VfsError::not_a_directory(Self::display(&dir))),
            None => return Err(VfsError::not_found(Self::display(&dir))),
        }

        let mut children: Vec<DirEntry> = entries
            .iter()
            .filter(|(child, _)| *child != &dir && child.parent() == Some(dir.as_path()))
            .filter_map(|(child, entry)| {
                let name = child.file_name()?.to_string_lossy().into_owned();
                Some(DirEntry::new(name, entry.kind()))
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(children)
    }

    async fn read(&self, path: &Path, offset: u64, size: u64) -> VfsResult<Vec<u8>> {
        let path = Self::normalize(path);
        match self.entries.read().get(&path) {
            Some(Entry::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let len = usize::try_from(size).unwrap_or(usize::MAX);
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => Err(VfsError::is_a_directory(Self::display(&path))),
            None => Err(VfsError::not_found(Self::display(&path))),
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u64> {
        let path = Self::normalize(path);
        let mut entries = self.entries.write();
        let (contents, attr) = Self::file_mut(&mut entries, &path)?;

        let start = usize::try_from(offset)
            .map_err(|_| VfsError::other(format!("offset {offset} too large")))?;
        let end = start + data.len();
        if end > contents.len() {
            contents.resize(end, 0);
        }
        contents[start..end].copy_from_slice(data);
        attr.set_len(contents.len() as u64);
        Ok(data.len() as u64)
    }

    async fn create(&self, path: &Path) -> VfsResult<FileAttr> {
        let path = Self::normalize(path);
        if path.as_os_str().is_empty() {
            return Err(VfsError::invalid_path("empty file name"));
        }

        let mut entries = self.entries.write();
        if entries.contains_key(&path) {
            return Err(VfsError::already_exists(Self::display(&path)));
        }
        Self::check_parent(&entries, &path)?;

        let attr = FileAttr::file(0);
        entries.insert(
            path,
            Entry::File {
                data: Vec::new(),
                attr: attr.clone(),
            },
        );
        Ok(attr)
    }

    async fn mkdir(&self, path: &Path) -> VfsResult<FileAttr> {
        let path = Self::normalize(path);
        let mut entries = self.entries.write();

        match entries.get(&path) {
            Some(Entry::Directory { attr }) => return Ok(attr.clone()),
            Some(Entry::File { .. }) => return Err(VfsError::already_exists(Self::display(&path))),
            None => Self::check_parent(&entries, &path)?,
        }

        let attr = FileAttr::directory();
        entries.insert(path, Entry::Directory { attr: attr.clone() });
        Ok(attr)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let path = Self::normalize(path);
        let len = usize::try_from(size)
            .map_err(|_| VfsError::other(format!("size {size} too large")))?;

        let mut entries = self.entries.write();
        let (contents, attr) = Self::file_mut(&mut entries, &path)?;
        contents.resize(len, 0);
        attr.set_len(size);
        Ok(())
    }
}
