//! Values: a lazily-opened data stream paired with a metadata map.
//!
//! A [`Value`] is what a store hands back for a key and what a caller hands
//! to `set`. Data and metadata travel together but materialize independently:
//! reading the metadata never opens the stream, and opening the stream never
//! touches the metadata.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::StoreResult;
use crate::metadata::{select_metadata, Metadata};
use crate::stream::{copy_chunked, read_chunked, CopyConfig};

/// A lazily-opened source of bytes.
///
/// `open` yields a fresh reader each call, so a value can be read more than
/// once. Implementations that can do better than read-and-discard should
/// override [`open_range`](DataSource::open_range).
pub trait DataSource: Send + Sync {
    /// Open a fresh reader over the whole byte stream.
    fn open(&self) -> StoreResult<Box<dyn Read + Send>>;

    /// Total size in bytes, when cheaply known.
    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Open a reader over the half-open span `[start, end)`.
    ///
    /// The default reads and discards the first `start` bytes of a full
    /// stream, then caps the remainder.
    fn open_range(&self, start: u64, end: u64) -> StoreResult<Box<dyn Read + Send>> {
        let mut reader = self.open()?;
        std::io::copy(&mut (&mut reader).take(start), &mut std::io::sink())?;
        Ok(Box::new(reader.take(end.saturating_sub(start))))
    }
}

/// In-memory data source.
///
/// Cloning is cheap ([`Bytes`] is reference-counted), so the in-memory
/// backend hands these out without copying payloads.
#[derive(Clone, Debug)]
pub struct BytesDataSource(Bytes);

impl BytesDataSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self(data.into())
    }
}

impl DataSource for BytesDataSource {
    fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.0.len() as u64)
    }

    fn open_range(&self, start: u64, end: u64) -> StoreResult<Box<dyn Read + Send>> {
        let len = self.0.len() as u64;
        let start = start.min(len) as usize;
        let end = end.min(len).max(start as u64) as usize;
        Ok(Box::new(Cursor::new(self.0.slice(start..end))))
    }
}

/// Data source backed by a file on disk.
///
/// The file is opened on each read, not at construction, so a `Value` built
/// from a path stays cheap until its data is actually wanted.
#[derive(Clone, Debug)]
pub struct FileDataSource {
    path: PathBuf,
}

impl FileDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileDataSource {
    fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
        Ok(Box::new(File::open(&self.path)?))
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|meta| meta.len())
    }

    fn open_range(&self, start: u64, end: u64) -> StoreResult<Box<dyn Read + Send>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        Ok(Box::new(file.take(end.saturating_sub(start))))
    }
}

/// The (data stream, metadata) pair stored under a key.
///
/// Constructed by a store in response to a read, or by a caller in response
/// to a write; owned exclusively by whoever constructed it. The explicit
/// [`into_parts`](Value::into_parts) / [`from_parts`](Value::from_parts) pair
/// is the adapter for callers that think of a value as a 2-tuple.
pub struct Value {
    source: Box<dyn DataSource>,
    metadata: Metadata,
    created: SystemTime,
    modified: SystemTime,
}

impl Value {
    /// Build a value over an arbitrary data source, stamped with the current
    /// time.
    pub fn new(source: Box<dyn DataSource>, metadata: Metadata) -> Self {
        let now = SystemTime::now();
        Self {
            source,
            metadata,
            created: now,
            modified: now,
        }
    }

    /// Build a value over an in-memory payload.
    pub fn from_bytes(data: impl Into<Bytes>, metadata: Metadata) -> Self {
        Self::new(Box::new(BytesDataSource::new(data)), metadata)
    }

    /// Build a value whose data is read lazily from a file.
    pub fn from_file(path: impl Into<PathBuf>, metadata: Metadata) -> Self {
        Self::new(Box::new(FileDataSource::new(path)), metadata)
    }

    /// Override the creation/modification timestamps, e.g. when a store
    /// reconstructs a value from its records.
    pub fn with_times(mut self, created: SystemTime, modified: SystemTime) -> Self {
        self.created = created;
        self.modified = modified;
        self
    }

    /// Open a fresh reader over the data stream.
    pub fn data(&self) -> StoreResult<Box<dyn Read + Send>> {
        self.source.open()
    }

    /// Open a reader over just the byte span `[start, end)`.
    pub fn range(&self, start: u64, end: u64) -> StoreResult<Box<dyn Read + Send>> {
        self.source.open_range(start, end)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The subset of the metadata named by `select`.
    pub fn select_metadata(&self, select: &[&str]) -> Metadata {
        select_metadata(&self.metadata, select)
    }

    /// Data size in bytes, when the source knows it.
    pub fn size(&self) -> Option<u64> {
        self.source.size_hint()
    }

    pub fn created(&self) -> SystemTime {
        self.created
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Read the whole stream into one buffer, chunk by chunk.
    pub fn to_bytes(&self, config: &CopyConfig) -> StoreResult<Vec<u8>> {
        let mut reader = self.data()?;
        read_chunked(&mut *reader, config)
    }

    /// Stream the data into a file, chunk by chunk, never materializing the
    /// whole payload. Returns the number of bytes written.
    pub fn to_file(&self, path: &Path, config: &CopyConfig) -> StoreResult<u64> {
        let mut reader = self.data()?;
        let mut file = File::create(path)?;
        let written = copy_chunked(&mut *reader, &mut file, config, &mut |_| Ok(()))?;
        file.flush()?;
        Ok(written)
    }

    /// Split into the underlying (data source, metadata) pair.
    pub fn into_parts(self) -> (Box<dyn DataSource>, Metadata) {
        (self.source, self.metadata)
    }

    /// Rebuild a value from a (data source, metadata) pair.
    pub fn from_parts(parts: (Box<dyn DataSource>, Metadata)) -> Self {
        let (source, metadata) = parts;
        Self::new(source, metadata)
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Value")
            .field("size", &self.size())
            .field("metadata_keys", &self.metadata.len())
            .finish()
    }
}
