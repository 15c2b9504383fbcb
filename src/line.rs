//! Records emitted by a running tail.

use crate::error::Error;
use std::path::PathBuf;
use std::time::SystemTime;

/// Why a [`Line`] was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// A line (or a chunk of an over-long line) read from the file.
    NewLine,
    /// The file was reopened after rotation or truncation.
    NewFile,
    /// Periodic heartbeat while waiting for changes.
    Ticker,
}

/// A single record produced by the tail engine.
#[derive(Debug)]
pub struct Line {
    /// Line content without its terminator.
    pub text: String,
    /// When the record was produced.
    pub time: SystemTime,
    /// File the record came from.
    pub filename: PathBuf,
    /// Byte offset in the file just past this record.
    pub offset: u64,
    /// When the current file handle was opened.
    pub opened_at: SystemTime,
    /// Set on synthetic warning records.
    pub err: Option<Error>,
    pub kind: LineKind,
}

impl Line {
    pub(crate) fn new(
        text: String,
        filename: PathBuf,
        offset: u64,
        opened_at: SystemTime,
        kind: LineKind,
    ) -> Self {
        Self {
            text,
            time: SystemTime::now(),
            filename,
            offset,
            opened_at,
            err: None,
            kind,
        }
    }

    pub(crate) fn with_error(mut self, err: Error) -> Self {
        self.err = Some(err);
        self
    }
}

/// Split `text` into chunks of at most `max` bytes without breaking a UTF-8
/// character. A character wider than `max` forms its own chunk.
pub(crate) fn partition(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut start = 0;
    let mut end = 0;
    for (idx, ch) in text.char_indices() {
        let next = idx + ch.len_utf8();
        if next - start > max && end > start {
            parts.push(text[start..end].to_string());
            start = end;
        }
        end = next;
    }
    if start < text.len() {
        parts.push(text[start..].to_string());
    }
    parts
}

/// Strip a trailing `\n` (and a `\r` before it) from raw line bytes.
pub(crate) fn trim_terminator(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}
