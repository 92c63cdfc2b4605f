//! Virtual filesystem layer beneath a session.
//!
//! Key components:
//!
//! - [`VfsOps`] - Core trait for storage operations
//! - [`MemoryBackend`] - In-memory store (temporary storage, testing)
//! - [`LocalBackend`] - Directory on the local disk (persistent storage)
//! - [`QuotaBackend`] - Byte quota enforced over any other backend
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: every call names the path it acts on.
//!   Handles above this layer are just paths plus a backend.
//! - **Explicit offset/size**: reads and writes carry their own offset, so
//!   backends hold no per-file cursor state.
//! - **Normalized relative paths**: callers pass paths relative to the
//!   backend root with no `.` or `..` components.

pub mod backends;
mod error;
mod ops;
mod quota;
mod types;

pub use backends::{LocalBackend, MemoryBackend};
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use quota::QuotaBackend;
pub use types::{DirEntry, FileAttr, FileType};
