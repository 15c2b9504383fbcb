//! Buffered line reading with offset tracking.

use crate::error::{Error, Result};
use std::fs::Metadata;
use std::io::SeekFrom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};

/// Buffer size used when no maximum line size is configured.
const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Room for a `\r\n` terminator on top of the maximum line size.
const TERMINATOR_OVERHEAD: usize = 2;

/// Outcome of a single line read.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ReadLine {
    /// A complete line, terminator included.
    Line(Vec<u8>),
    /// Bytes at end of file with no terminator yet.
    Partial(Vec<u8>),
    Eof,
}

/// Reads delimiter-terminated lines from an open file and keeps the offset
/// of the next unread byte in a shared counter.
#[derive(Debug)]
pub(crate) struct LineReader {
    inner: BufReader<File>,
    path: String,
    offset: Arc<AtomicU64>,
}

impl LineReader {
    pub(crate) fn new(
        file: File,
        path: String,
        max_line_size: Option<usize>,
        offset: Arc<AtomicU64>,
    ) -> Self {
        let capacity = buffer_size(max_line_size);
        offset.store(0, Ordering::Relaxed);
        Self {
            inner: BufReader::with_capacity(capacity, file),
            path,
            offset,
        }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    pub(crate) async fn seek(&mut self, position: SeekFrom) -> Result<u64> {
        let offset = self
            .inner
            .seek(position)
            .await
            .map_err(|source| Error::Seek {
                path: self.path.clone(),
                source,
            })?;
        self.offset.store(offset, Ordering::Relaxed);
        Ok(offset)
    }

    /// Step back over `len` bytes that were read but not consumed.
    pub(crate) async fn unread(&mut self, len: usize) -> Result<u64> {
        self.seek(SeekFrom::Current(-(len as i64))).await
    }

    pub(crate) async fn read_line(&mut self) -> Result<ReadLine> {
        let mut buf = Vec::new();
        let read = self
            .inner
            .read_until(b'\n', &mut buf)
            .await
            .map_err(|source| Error::Read {
                path: self.path.clone(),
                source,
            })?;

        self.offset.fetch_add(read as u64, Ordering::Relaxed);
        Ok(classify_read(buf))
    }

    pub(crate) async fn metadata(&self) -> Result<Metadata> {
        self.inner
            .get_ref()
            .metadata()
            .await
            .map_err(|source| Error::Stat {
                path: self.path.clone(),
                source,
            })
    }
}

fn buffer_size(max_line_size: Option<usize>) -> usize {
    match max_line_size {
        Some(max) => max.saturating_add(TERMINATOR_OVERHEAD),
        None => DEFAULT_BUFFER_SIZE,
    }
}

fn classify_read(buf: Vec<u8>) -> ReadLine {
    if buf.is_empty() {
        ReadLine::Eof
    } else if buf.ends_with(b"\n") {
        ReadLine::Line(buf)
    } else {
        ReadLine::Partial(buf)
    }
}
