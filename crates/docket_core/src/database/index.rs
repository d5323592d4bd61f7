//! Index log format.
//!
//! `{name}_index.db` is a sequence of fixed-size entries with no header:
//!
//! ```text
//! insert:  [0: u8][id: i32 LE][offset: u32 LE][length: u16 LE]   11 bytes
//! delete:  [1: u8][id: i32 LE]                                     5 bytes
//! ```
//!
//! Offsets and lengths address payloads in `{name}.db`. Replaying the log
//! left to right rebuilds the id → slot map: an insert (re)binds an id, a
//! delete unbinds it.

use docket_storage::{read_full, ReadOutcome, StorageResult};
use std::io::Read;

/// Marker byte of an insert entry.
pub const INSERT_MARKER: u8 = 0;
/// Marker byte of a delete entry.
pub const DELETE_MARKER: u8 = 1;
/// Encoded size of an insert entry.
pub const INSERT_LEN: usize = 11;
/// Encoded size of a delete entry.
pub const DELETE_LEN: usize = 5;

/// Where a record's payload lives in the storage file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Byte offset in `{name}.db`.
    pub offset: u32,
    /// Payload length in bytes.
    pub len: u16,
}

impl Slot {
    /// Offset just past the payload.
    #[must_use]
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.len)
    }
}

/// A single index log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexEntry {
    /// Binds `id` to a payload.
    Insert {
        /// Record id.
        id: i32,
        /// Payload location.
        slot: Slot,
    },
    /// Unbinds `id`.
    Delete {
        /// Record id.
        id: i32,
    },
}

impl IndexEntry {
    /// Encoded size in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Insert { .. } => INSERT_LEN,
            Self::Delete { .. } => DELETE_LEN,
        }
    }

    /// Appends the encoded entry to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Insert { id, slot } => {
                buf.push(INSERT_MARKER);
                buf.extend_from_slice(&id.to_le_bytes());
                buf.extend_from_slice(&slot.offset.to_le_bytes());
                buf.extend_from_slice(&slot.len.to_le_bytes());
            }
            Self::Delete { id } => {
                buf.push(DELETE_MARKER);
                buf.extend_from_slice(&id.to_le_bytes());
            }
        }
    }
}

/// Result of reading one index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexRead {
    /// A complete entry starting at `offset`.
    Entry {
        /// Byte offset of the marker.
        offset: u64,
        /// The entry.
        entry: IndexEntry,
    },
    /// Clean end of log at an entry boundary.
    End,
    /// The log ends inside the entry starting at `offset`.
    Torn {
        /// Byte offset of the incomplete entry.
        offset: u64,
    },
    /// The byte at `offset` is not a known marker.
    UnknownMarker {
        /// Byte offset of the marker.
        offset: u64,
        /// The marker byte found.
        marker: u8,
    },
}

/// Sequential index log reader.
#[derive(Debug)]
pub struct IndexReader<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> IndexReader<R> {
    /// Wraps a reader positioned at the start of an index log.
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Offset just past the last complete entry.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next entry.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures.
    pub fn next_entry(&mut self) -> StorageResult<IndexRead> {
        let start = self.offset;

        let mut marker = [0u8; 1];
        if read_full(&mut self.reader, &mut marker)? == ReadOutcome::Eof {
            return Ok(IndexRead::End);
        }

        let entry = match marker[0] {
            INSERT_MARKER => {
                let mut body = [0u8; INSERT_LEN - 1];
                if read_full(&mut self.reader, &mut body)? != ReadOutcome::Complete {
                    return Ok(IndexRead::Torn { offset: start });
                }
                IndexEntry::Insert {
                    id: i32::from_le_bytes([body[0], body[1], body[2], body[3]]),
                    slot: Slot {
                        offset: u32::from_le_bytes([body[4], body[5], body[6], body[7]]),
                        len: u16::from_le_bytes([body[8], body[9]]),
                    },
                }
            }
            DELETE_MARKER => {
                let mut body = [0u8; DELETE_LEN - 1];
                if read_full(&mut self.reader, &mut body)? != ReadOutcome::Complete {
                    return Ok(IndexRead::Torn { offset: start });
                }
                IndexEntry::Delete {
                    id: i32::from_le_bytes(body),
                }
            }
            marker => {
                return Ok(IndexRead::UnknownMarker {
                    offset: start,
                    marker,
                })
            }
        };

        self.offset += entry.encoded_len() as u64;
        Ok(IndexRead::Entry {
            offset: start,
            entry,
        })
    }
}
