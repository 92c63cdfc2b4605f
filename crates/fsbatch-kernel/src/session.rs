//! Stateful session over a storage area.
//!
//! A [`Session`] owns the current directory and the current-file cursor.
//! Each primitive (open, read, write, truncate, mkdir, chdir, fetch) is one
//! async call that either mutates that state or leaves it untouched.
//!
//! The file cursor is an explicit state machine:
//!
//! ```text
//!              open                    read
//!   Closed ───────────▶ Open{-,-} ───────────────▶ Open{file,-}
//!                        │    ▲                       │
//!          write/truncate│    │open (from any Open)   │write/truncate
//!                        ▼    │                       ▼
//!                   Open{-,writer} ──── read ───▶ Open{file,writer}
//! ```
//!
//! `open` always lands in `Open{-,-}`. Writes and truncates make a cached
//! file snapshot stale, so they drop it; the writer stays cached until the
//! next `open`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::batch::{Batch, BatchExecutor};
use crate::config::Config;
use crate::storage::{Blob, DirHandle, FileHandle, FileWriter, GetFileFlags, Storage};
use crate::transport::{HttpTransport, Transport, TransportError};
use crate::vfs::VfsError;

/// Session errors.
///
/// The batch executor collapses all of these to a failed step; the variants
/// exist for logging and for direct callers of the primitives.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Requested file or directory is absent and creation wasn't requested.
    #[error("not found: {0}")]
    NotFound(String),

    /// Exclusive creation requested but the target exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// read/write/truncate with no successful open before it.
    #[error("no file is open")]
    NoActiveFile,

    /// Storage rejected the call (quota, type mismatch, I/O).
    #[error("storage error: {0}")]
    Provider(VfsError),

    /// Network retrieval failed or returned a non-200 status.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Content is not valid in the requested representation.
    #[error("decode error: {0}")]
    Decode(#[from] std::str::Utf8Error),

    /// Descriptor named an operation the executor doesn't know.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

impl From<VfsError> for SessionError {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(path) => SessionError::NotFound(path),
            VfsError::AlreadyExists(path) => SessionError::Conflict(path),
            e if e.is_not_found() => SessionError::NotFound(e.to_string()),
            e if e.is_already_exists() => SessionError::Conflict(e.to_string()),
            e => SessionError::Provider(e),
        }
    }
}

/// Session result type.
pub type SessionResult<T> = Result<T, SessionError>;

// ============================================================================
// Read results
// ============================================================================

/// Representation requested by `read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadType {
    /// UTF-8 decoded text.
    #[serde(rename = "string")]
    Text,
    /// Raw bytes.
    #[serde(rename = "arraybuffer")]
    Binary,
    /// The storage snapshot itself, undecoded.
    #[serde(rename = "blob")]
    Blob,
}

impl ReadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadType::Text => "string",
            ReadType::Binary => "arraybuffer",
            ReadType::Blob => "blob",
        }
    }
}

/// Data produced by `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadData {
    Text(String),
    Binary(Vec<u8>),
    Blob(Blob),
}

impl ReadData {
    /// Byte length of the payload.
    pub fn len(&self) -> usize {
        match self {
            ReadData::Text(s) => s.len(),
            ReadData::Binary(b) => b.len(),
            ReadData::Blob(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Contents of a [`ResultSink`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResult {
    /// Requested representation; set as soon as the read starts.
    pub kind: Option<ReadType>,
    pub success: bool,
    pub data: Option<ReadData>,
}

/// Caller-held slot that one `read` fills.
///
/// Clones share the slot: keep one, hand the other to the descriptor.
#[derive(Clone, Default)]
pub struct ResultSink {
    slot: Arc<Mutex<ReadResult>>,
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResultSink").field(&*self.slot.lock()).finish()
    }
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn get(&self) -> ReadResult {
        self.slot.lock().clone()
    }

    /// True once a read completed successfully into this sink.
    pub fn is_filled(&self) -> bool {
        self.slot.lock().success
    }

    fn begin(&self, kind: ReadType) {
        let mut slot = self.slot.lock();
        slot.kind = Some(kind);
        slot.success = false;
        slot.data = None;
    }

    fn complete(&self, data: ReadData) {
        let mut slot = self.slot.lock();
        slot.data = Some(data);
        slot.success = true;
    }
}

// ============================================================================
// Write payloads
// ============================================================================

/// Payload accepted by `write`; every variant is written as bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteData {
    /// Encoded as UTF-8.
    Text(String),
    Binary(Vec<u8>),
    Blob(Blob),
}

impl WriteData {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WriteData::Text(s) => s.as_bytes(),
            WriteData::Binary(b) => b,
            WriteData::Blob(b) => b.bytes(),
        }
    }
}

impl From<&str> for WriteData {
    fn from(s: &str) -> Self {
        WriteData::Text(s.to_string())
    }
}

impl From<String> for WriteData {
    fn from(s: String) -> Self {
        WriteData::Text(s)
    }
}

impl From<Vec<u8>> for WriteData {
    fn from(b: Vec<u8>) -> Self {
        WriteData::Binary(b)
    }
}

impl From<Blob> for WriteData {
    fn from(b: Blob) -> Self {
        WriteData::Blob(b)
    }
}

// ============================================================================
// Cursor state machine
// ============================================================================

/// Observable cursor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Closed,
    OpenNoHandles,
    OpenFileCached,
    OpenWriterCached,
    OpenBothCached,
}

/// An opened file plus its lazily acquired handles.
struct OpenFile {
    entry: FileHandle,
    file: Option<Blob>,
    writer: Option<FileWriter>,
}

impl OpenFile {
    fn new(entry: FileHandle) -> Self {
        Self {
            entry,
            file: None,
            writer: None,
        }
    }

    /// Cached snapshot, taking one on first use.
    async fn file(&mut self) -> SessionResult<Blob> {
        if let Some(blob) = &self.file {
            return Ok(blob.clone());
        }
        let blob = self.entry.file().await?;
        self.file = Some(blob.clone());
        Ok(blob)
    }

    /// Cached writer, creating one on first use.
    async fn writer(&mut self) -> SessionResult<&mut FileWriter> {
        let writer = match self.writer.take() {
            Some(writer) => writer,
            None => self.entry.create_writer().await?,
        };
        Ok(self.writer.insert(writer))
    }
}

enum Cursor {
    Closed,
    Open(OpenFile),
}

// ============================================================================
// Session
// ============================================================================

/// What `fetch` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Target existed and overwrite was off; nothing was requested.
    Skipped,
    /// Retrieved and stored this many bytes.
    Stored(usize),
}

/// A working area: storage, current directory, current file.
pub struct Session {
    storage: Storage,
    cwd: DirHandle,
    cursor: Cursor,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("storage", &self.storage)
            .field("cwd", &self.cwd.full_path())
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    /// Start a session at the storage root.
    pub fn new(storage: Storage, transport: Arc<dyn Transport>) -> Self {
        let cwd = storage.root();
        Self {
            storage,
            cwd,
            cursor: Cursor::Closed,
            transport,
        }
    }

    /// Open storage and an HTTP transport as described by `config`.
    pub async fn connect(config: &Config) -> SessionResult<Self> {
        let storage = Storage::open(&config.storage)
            .await
            .map_err(SessionError::Provider)?;
        let transport = HttpTransport::from_config(&config.transport)?;
        tracing::info!(
            kind = ?storage.kind(),
            quota = storage.quota(),
            used = storage.used(),
            "session opened"
        );
        Ok(Self::new(storage, Arc::new(transport)))
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Current directory.
    pub fn cwd(&self) -> &DirHandle {
        &self.cwd
    }

    /// Currently open file, if any.
    pub fn current_file(&self) -> Option<&FileHandle> {
        match &self.cursor {
            Cursor::Closed => None,
            Cursor::Open(open) => Some(&open.entry),
        }
    }

    pub fn state(&self) -> CursorState {
        match &self.cursor {
            Cursor::Closed => CursorState::Closed,
            Cursor::Open(open) => match (open.file.is_some(), open.writer.is_some()) {
                (false, false) => CursorState::OpenNoHandles,
                (true, false) => CursorState::OpenFileCached,
                (false, true) => CursorState::OpenWriterCached,
                (true, true) => CursorState::OpenBothCached,
            },
        }
    }

    fn open_file(&mut self) -> SessionResult<&mut OpenFile> {
        match &mut self.cursor {
            Cursor::Open(open) => Ok(open),
            Cursor::Closed => Err(SessionError::NoActiveFile),
        }
    }

    /// Run `batch` against this session. See [`BatchExecutor::run`].
    pub async fn batch(&mut self, batch: Batch) -> bool {
        BatchExecutor::new(self).run(batch).await
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Make `name` under the current directory the current file.
    #[tracing::instrument(skip(self), fields(cwd = %self.cwd.full_path()))]
    pub async fn open(&mut self, name: &str, create: bool, exclusive: bool) -> SessionResult<()> {
        let entry = self
            .cwd
            .get_file(name, GetFileFlags { create, exclusive })
            .await?;
        tracing::debug!(path = %entry.full_path(), "file opened");
        self.cursor = Cursor::Open(OpenFile::new(entry));
        Ok(())
    }

    /// Read the current file into `sink` as `kind`.
    #[tracing::instrument(skip(self, sink))]
    pub async fn read(&mut self, kind: ReadType, sink: &ResultSink) -> SessionResult<()> {
        sink.begin(kind);
        let blob = self.open_file()?.file().await?;
        let data = match kind {
            ReadType::Text => ReadData::Text(blob.text()?.to_owned()),
            ReadType::Binary => ReadData::Binary(blob.bytes().to_vec()),
            ReadType::Blob => ReadData::Blob(blob),
        };
        sink.complete(data);
        Ok(())
    }

    /// Write `data` at the writer's position in the current file.
    #[tracing::instrument(skip(self, data), fields(len = data.as_bytes().len()))]
    pub async fn write(&mut self, data: &WriteData) -> SessionResult<()> {
        self.write_bytes(data.as_bytes()).await
    }

    async fn write_bytes(&mut self, bytes: &[u8]) -> SessionResult<()> {
        let open = self.open_file()?;
        open.writer().await?.write(bytes).await?;
        open.file = None;
        Ok(())
    }

    /// Set the current file's length to `size`.
    #[tracing::instrument(skip(self))]
    pub async fn truncate(&mut self, size: u64) -> SessionResult<()> {
        let open = self.open_file()?;
        open.writer().await?.truncate(size).await?;
        open.file = None;
        Ok(())
    }

    /// Create directory `name` under the current directory if absent.
    #[tracing::instrument(skip(self), fields(cwd = %self.cwd.full_path()))]
    pub async fn mkdir(&mut self, name: &str) -> SessionResult<()> {
        self.cwd.get_directory(name, true).await?;
        Ok(())
    }

    /// Make existing directory `name` the current directory.
    #[tracing::instrument(skip(self), fields(cwd = %self.cwd.full_path()))]
    pub async fn chdir(&mut self, name: &str) -> SessionResult<()> {
        self.cwd = self.cwd.get_directory(name, false).await?;
        tracing::debug!(cwd = %self.cwd.full_path(), "directory changed");
        Ok(())
    }

    /// Retrieve `url` into file `name`.
    ///
    /// Without `overwrite`, an existing file is left alone and no request is
    /// made. Otherwise the whole body is received first; only a 200 response
    /// whose body fits in the quota touches storage. The body is written
    /// over the old contents from offset 0 and the file is then cut to the
    /// body's length, so a failed write leaves the old bytes in place. The
    /// fetched file becomes the current file.
    #[tracing::instrument(skip(self), fields(cwd = %self.cwd.full_path()))]
    pub async fn fetch(&mut self, name: &str, url: &str, overwrite: bool) -> SessionResult<FetchOutcome> {
        let existing = self.existing_size(name).await?;
        if !overwrite && existing.is_some() {
            tracing::info!("skip fetching {} to {}", url, name);
            return Ok(FetchOutcome::Skipped);
        }

        let response = self.transport.get(url).await?;
        if response.status != 200 {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: response.status,
            }
            .into());
        }

        let len = response.body.len() as u64;
        let growth = len.saturating_sub(existing.unwrap_or(0));
        let available = self.storage.available();
        if growth > available {
            return Err(SessionError::Provider(VfsError::QuotaExceeded {
                requested: growth,
                available,
            }));
        }

        self.open(name, true, false).await?;
        self.write_bytes(&response.body).await?;
        self.truncate(len).await?;
        Ok(FetchOutcome::Stored(response.body.len()))
    }

    /// Size of file `name`, or `None` when nothing is there.
    ///
    /// Neither creates nor moves the cursor. Only "not found" counts as
    /// absent; any other failure propagates.
    async fn existing_size(&self, name: &str) -> SessionResult<Option<u64>> {
        match self.cwd.get_file(name, GetFileFlags::existing()).await {
            Ok(file) => Ok(Some(file.size().await?)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StaticTransport;

    async fn session() -> Session {
        session_with(StaticTransport::new()).await
    }

    async fn session_with(transport: StaticTransport) -> Session {
        let storage = Storage::temporary(1024).await.unwrap();
        Session::new(storage, Arc::new(transport))
    }

    async fn read_text(session: &mut Session) -> String {
        let sink = ResultSink::new();
        session.read(ReadType::Text, &sink).await.unwrap();
        match sink.get().data {
            Some(ReadData::Text(text)) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_missing_without_create() {
        let mut s = session().await;
        let err = s.open("missing.txt", false, false).await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert_eq!(s.state(), CursorState::Closed);
    }

    #[tokio::test]
    async fn test_open_exclusive_conflict() {
        let mut s = session().await;
        s.open("a.txt", true, true).await.unwrap();
        let err = s.open("a.txt", true, true).await.unwrap_err();
        assert!(matches!(err, SessionError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_io_without_open() {
        let mut s = session().await;
        let sink = ResultSink::new();

        assert!(matches!(
            s.read(ReadType::Text, &sink).await,
            Err(SessionError::NoActiveFile)
        ));
        assert!(matches!(
            s.write(&"x".into()).await,
            Err(SessionError::NoActiveFile)
        ));
        assert!(matches!(
            s.truncate(0).await,
            Err(SessionError::NoActiveFile)
        ));

        let result = sink.get();
        assert_eq!(result.kind, Some(ReadType::Text));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_cursor_transitions() {
        let mut s = session().await;
        s.open("c.txt", true, false).await.unwrap();
        assert_eq!(s.state(), CursorState::OpenNoHandles);

        s.write(&"abc".into()).await.unwrap();
        assert_eq!(s.state(), CursorState::OpenWriterCached);

        assert_eq!(read_text(&mut s).await, "abc");
        assert_eq!(s.state(), CursorState::OpenBothCached);

        s.open("c.txt", false, false).await.unwrap();
        assert_eq!(s.state(), CursorState::OpenNoHandles);

        read_text(&mut s).await;
        assert_eq!(s.state(), CursorState::OpenFileCached);
    }

    #[tokio::test]
    async fn test_writes_continue_at_position() {
        let mut s = session().await;
        s.open("log.txt", true, false).await.unwrap();
        s.write(&"hello ".into()).await.unwrap();
        s.write(&WriteData::Binary(b"world".to_vec())).await.unwrap();

        assert_eq!(read_text(&mut s).await, "hello world");
    }

    #[tokio::test]
    async fn test_reopen_writes_from_start() {
        let mut s = session().await;
        s.open("f.txt", true, false).await.unwrap();
        s.write(&"abcdef".into()).await.unwrap();

        s.open("f.txt", false, false).await.unwrap();
        s.write(&"XY".into()).await.unwrap();
        assert_eq!(read_text(&mut s).await, "XYcdef");
    }

    #[tokio::test]
    async fn test_write_blob_payload() {
        let mut s = session().await;
        s.open("copy.bin", true, false).await.unwrap();
        s.write(&WriteData::Blob(Blob::new("src", vec![1u8, 2, 3])))
            .await
            .unwrap();

        let sink = ResultSink::new();
        s.read(ReadType::Binary, &sink).await.unwrap();
        assert_eq!(sink.get().data, Some(ReadData::Binary(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn test_read_three_representations() {
        let mut s = session().await;
        s.open("t.txt", true, false).await.unwrap();
        s.write(&"hello text".into()).await.unwrap();
        s.open("t.txt", true, false).await.unwrap();

        let blob = ResultSink::new();
        let text = ResultSink::new();
        let bytes = ResultSink::new();
        s.read(ReadType::Blob, &blob).await.unwrap();
        s.read(ReadType::Text, &text).await.unwrap();
        s.read(ReadType::Binary, &bytes).await.unwrap();

        match blob.get().data {
            Some(ReadData::Blob(b)) => {
                assert_eq!(b.name(), "t.txt");
                assert_eq!(b.bytes(), b"hello text");
            }
            other => panic!("expected blob, got {other:?}"),
        }
        assert_eq!(text.get().data, Some(ReadData::Text("hello text".into())));
        assert_eq!(
            bytes.get().data,
            Some(ReadData::Binary(b"hello text".to_vec()))
        );
        assert!(text.get().success);
    }

    #[tokio::test]
    async fn test_read_invalid_utf8_is_decode_error() {
        let mut s = session().await;
        s.open("bad.txt", true, false).await.unwrap();
        s.write(&WriteData::Binary(vec![0xff, 0xfe])).await.unwrap();

        let sink = ResultSink::new();
        let err = s.read(ReadType::Text, &sink).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
        assert!(!sink.is_filled());
    }

    #[tokio::test]
    async fn test_truncate_extends_with_zeros() {
        let mut s = session().await;
        s.open("z.bin", true, false).await.unwrap();
        s.write(&WriteData::Binary(vec![9])).await.unwrap();
        s.truncate(3).await.unwrap();

        let sink = ResultSink::new();
        s.read(ReadType::Binary, &sink).await.unwrap();
        assert_eq!(sink.get().data, Some(ReadData::Binary(vec![9, 0, 0])));
    }

    #[tokio::test]
    async fn test_mkdir_does_not_change_cwd() {
        let mut s = session().await;
        s.mkdir("docs").await.unwrap();
        assert!(s.cwd().is_root());
    }

    #[tokio::test]
    async fn test_mkdir_over_file_fails() {
        let mut s = session().await;
        s.open("taken", true, false).await.unwrap();
        assert!(s.mkdir("taken").await.is_err());
    }

    #[tokio::test]
    async fn test_chdir_missing_fails() {
        let mut s = session().await;
        let err = s.chdir("nowhere").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
        assert!(s.cwd().is_root());
    }

    #[tokio::test]
    async fn test_open_is_relative_to_cwd() {
        let mut s = session().await;
        s.mkdir("Foo").await.unwrap();
        s.chdir("Foo").await.unwrap();
        s.open("foo.txt", true, false).await.unwrap();

        assert_eq!(s.current_file().unwrap().full_path(), "/Foo/foo.txt");
    }

    #[tokio::test]
    async fn test_fetch_stores_body() {
        let transport = StaticTransport::new().with_body("https://h/x.img", b"payload".to_vec());
        let mut s = session_with(transport).await;

        let outcome = s.fetch("x.img", "https://h/x.img", false).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Stored(7));
        assert_eq!(s.current_file().unwrap().name(), "x.img");
        assert_eq!(read_text(&mut s).await, "payload");
    }

    #[tokio::test]
    async fn test_fetch_non_200_leaves_storage_untouched() {
        let transport = StaticTransport::new().with_status("u", 500, b"oops".to_vec());
        let mut s = session_with(transport).await;

        let err = s.fetch("x.img", "u", true).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Transport(TransportError::Status { status: 500, .. })
        ));
        assert!(s.open("x.img", false, false).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_checks_quota_before_storing() {
        let storage = Storage::temporary(4).await.unwrap();
        let transport = StaticTransport::new().with_body("u", b"too long".to_vec());
        let mut s = Session::new(storage, Arc::new(transport));

        let err = s.fetch("big.bin", "u", false).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(VfsError::QuotaExceeded {
                requested: 8,
                available: 4
            })
        ));
        assert_eq!(s.state(), CursorState::Closed);
        assert!(s.open("big.bin", false, false).await.is_err());
    }

    #[tokio::test]
    async fn test_fetch_onto_directory_fails() {
        let mut s = session().await;
        s.mkdir("dir").await.unwrap();

        let err = s.fetch("dir", "u", false).await.unwrap_err();
        assert!(matches!(err, SessionError::Provider(VfsError::IsADirectory(_))));
    }

    #[tokio::test]
    async fn test_write_over_quota_is_provider_error() {
        let storage = Storage::temporary(4).await.unwrap();
        let mut s = Session::new(storage, Arc::new(StaticTransport::new()));
        s.open("big", true, false).await.unwrap();

        let err = s.write(&"12345".into()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Provider(VfsError::QuotaExceeded { .. })
        ));
    }
}
