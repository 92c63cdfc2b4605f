//! Entry metadata shared by every backend.

use std::time::SystemTime;

/// Kind of entry. The store holds only files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        *self == FileType::File
    }

    pub fn is_dir(&self) -> bool {
        *self == FileType::Directory
    }
}

/// Size, kind and modification time of an entry.
///
/// Directories always report size 0; only file bytes count against a quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub size: u64,
    pub kind: FileType,
    pub modified: SystemTime,
}

impl FileAttr {
    /// Attributes for a file of `size` bytes, modified now.
    pub fn file(size: u64) -> Self {
        Self {
            size,
            kind: FileType::File,
            modified: SystemTime::now(),
        }
    }

    /// Attributes for a directory, modified now.
    pub fn directory() -> Self {
        Self {
            size: 0,
            kind: FileType::Directory,
            modified: SystemTime::now(),
        }
    }

    /// Record a new length and bump the modification time.
    pub fn set_len(&mut self, size: u64) {
        self.size = size;
        self.modified = SystemTime::now();
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// One child of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Leaf name, not a path.
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_has_no_size() {
        let dir = FileAttr::directory();
        assert!(dir.is_dir());
        assert!(!dir.is_file());
        assert_eq!(dir.size, 0);
    }

    #[test]
    fn test_set_len_bumps_mtime() {
        let mut attr = FileAttr::file(3);
        let before = attr.modified;
        attr.set_len(10);
        assert_eq!(attr.size, 10);
        assert!(attr.modified >= before);
    }
}
