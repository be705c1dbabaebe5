//! Chunked stream transfer helpers.
//!
//! Store data moves as streams, never whole buffers: every copy path reads a
//! bounded chunk at a time so arbitrarily large values pass through constant
//! memory. The per-chunk callback feeds the progress event protocol.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Default transfer chunk size: 1 MiB.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Configuration for chunked copies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Bytes read per chunk.
    pub buffer_size: usize,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl CopyConfig {
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

/// Iterator of buffers over a reader.
///
/// Each item is a full `buffer_size` chunk except possibly the last. Short
/// reads from the underlying reader are accumulated until the chunk fills or
/// the stream ends.
pub struct Chunks<R> {
    reader: R,
    buffer_size: usize,
    finished: bool,
}

impl<R: Read> Chunks<R> {
    pub fn new(reader: R, buffer_size: usize) -> Self {
        Self {
            reader,
            buffer_size,
            finished: false,
        }
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut chunk = vec![0u8; self.buffer_size];
        let mut filled = 0;
        while filled < self.buffer_size {
            match self.reader.read(&mut chunk[filled..]) {
                Ok(0) => {
                    self.finished = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        if filled == 0 {
            return None;
        }
        chunk.truncate(filled);
        Some(Ok(chunk))
    }
}

/// Copy `reader` into `writer` chunk by chunk.
///
/// `on_chunk` is invoked after each chunk lands with the cumulative byte
/// count; an error from it (e.g. a failed progress listener) aborts the copy.
/// Returns the total number of bytes copied.
pub fn copy_chunked(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    config: &CopyConfig,
    on_chunk: &mut dyn FnMut(u64) -> StoreResult<()>,
) -> StoreResult<u64> {
    let mut total: u64 = 0;
    for chunk in Chunks::new(reader, config.buffer_size) {
        let chunk = chunk?;
        writer.write_all(&chunk)?;
        total += chunk.len() as u64;
        on_chunk(total)?;
    }
    writer.flush()?;
    Ok(total)
}

/// Read `reader` to the end, chunk by chunk, into one buffer.
pub fn read_chunked(reader: &mut dyn Read, config: &CopyConfig) -> StoreResult<Vec<u8>> {
    let mut out = Vec::new();
    copy_chunked(reader, &mut out, config, &mut |_| Ok(()))?;
    Ok(out)
}
