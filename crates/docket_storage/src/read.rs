//! Short-read classification for log replay.

use crate::error::StorageResult;
use std::io::{ErrorKind, Read};

/// How a fixed-size read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The buffer was filled.
    Complete,
    /// Nothing was read: the reader was already at end of input.
    Eof,
    /// Input ended after `read` bytes, before the buffer was filled.
    Truncated {
        /// Number of bytes that were available.
        read: usize,
    },
}

/// Fills `buf` from `reader`, reporting whether the input ran out first.
///
/// Unlike [`Read::read_exact`], a short read is not an error: replay
/// needs to tell a clean end of log (`Eof`) apart from a frame that was
/// only partially written (`Truncated`).
///
/// # Errors
///
/// Returns any I/O error other than `Interrupted`.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> StorageResult<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(match filled {
        n if n == buf.len() => ReadOutcome::Complete,
        0 => ReadOutcome::Eof,
        read => ReadOutcome::Truncated { read },
    })
}
