//! fsbatch kernel
//!
//! A sandboxed, quota-limited hierarchical file store driven through a
//! [`Session`], plus a [`BatchExecutor`] that runs ordered lists of session
//! primitives with per-step force flags and callbacks.
//!
//! ```no_run
//! use fsbatch_kernel::{Batch, Descriptor, ReadType, ResultSink, Session};
//! use fsbatch_kernel::config::Config;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::connect(&Config::default()).await?;
//! let greeting = ResultSink::new();
//! let ok = session
//!     .batch(
//!         Batch::new()
//!             .then(Descriptor::mkdir("Foo"))
//!             .then(Descriptor::chdir("Foo"))
//!             .then(Descriptor::open("foo.txt", true, false))
//!             .then(Descriptor::write("hello"))
//!             .then(Descriptor::read(ReadType::Text, &greeting)),
//!     )
//!     .await;
//! assert!(ok);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod session;
pub mod storage;
pub mod transport;
pub mod vfs;

pub use batch::{Batch, BatchExecutor, BatchReport, Command, Descriptor};
pub use config::Config;
pub use session::{
    CursorState, FetchOutcome, ReadData, ReadResult, ReadType, ResultSink, Session, SessionError,
    WriteData,
};
pub use storage::{Blob, DirHandle, FileHandle, FileWriter, GetFileFlags, Storage};
pub use transport::{HttpTransport, StaticTransport, Transport, TransportError};
