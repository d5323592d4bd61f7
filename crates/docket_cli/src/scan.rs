//! Framing-level readers shared by the commands.
//!
//! These walk a log the way the engines replay it, but never stop at the
//! first problem and never touch the files.

use docket_core::collection::frame::{Frame, FrameRead, FrameReader};
use docket_core::collection::LOG_SUFFIX;
use docket_core::database::index::{IndexEntry, IndexRead, IndexReader};
use docket_core::database::{INDEX_SUFFIX, STORAGE_SUFFIX};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// The files found for one collection name.
#[derive(Debug)]
pub enum Target {
    /// An append-log collection.
    Log {
        /// The `.collection` file.
        path: PathBuf,
    },
    /// An indexed database.
    Database {
        /// The `_index.db` file.
        index: PathBuf,
        /// The `.db` storage file.
        storage: PathBuf,
    },
}

/// Finds the files stored under `name` in `base`.
pub fn resolve(base: &Path, name: &str) -> CliResult<Vec<Target>> {
    let file = |suffix: &str| base.join(format!("{name}{suffix}"));

    let mut targets = Vec::new();
    let log = file(LOG_SUFFIX);
    if log.is_file() {
        targets.push(Target::Log { path: log });
    }
    let index = file(INDEX_SUFFIX);
    let storage = file(STORAGE_SUFFIX);
    if index.is_file() || storage.is_file() {
        targets.push(Target::Database { index, storage });
    }

    if targets.is_empty() {
        return Err(format!("no collection named {name:?} found in {}", base.display()).into());
    }
    Ok(targets)
}

/// How a log ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tail {
    /// Ends on an entry boundary.
    Clean,
    /// Ends inside the entry at `offset`.
    Torn {
        /// Start of the incomplete entry.
        offset: u64,
        /// Bytes an open would cut off.
        bytes: u64,
    },
    /// Holds a byte that is not an entry marker.
    UnknownMarker {
        /// Offset of the bad byte.
        offset: u64,
        /// The byte found.
        marker: u8,
    },
}

impl Tail {
    pub fn is_clean(self) -> bool {
        self == Self::Clean
    }
}

/// One append-log frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogEntry {
    /// A record payload.
    Insert {
        offset: u64,
        sequence: u32,
        len: usize,
    },
    /// A tombstone.
    Delete {
        offset: u64,
        sequence: u32,
        target: u32,
    },
}

impl LogEntry {
    pub fn offset(&self) -> u64 {
        match self {
            Self::Insert { offset, .. } | Self::Delete { offset, .. } => *offset,
        }
    }
}

/// Everything learned from reading a `.collection` log.
#[derive(Debug)]
pub struct LogScan {
    pub size: u64,
    pub entries: Vec<LogEntry>,
    pub inserts: usize,
    pub deletes: usize,
    pub live: usize,
    pub live_bytes: u64,
    /// Tombstones naming a sequence that is not a live insert, as
    /// `(offset, target)`.
    pub stray_tombstones: Vec<(u64, u32)>,
    pub tail: Tail,
}

/// Reads every complete frame of a `.collection` log.
pub fn scan_log(path: &Path) -> CliResult<LogScan> {
    let size = std::fs::metadata(path)?.len();
    let mut reader = FrameReader::new(BufReader::new(File::open(path)?));

    let mut scan = LogScan {
        size,
        entries: Vec::new(),
        inserts: 0,
        deletes: 0,
        live: 0,
        live_bytes: 0,
        stray_tombstones: Vec::new(),
        tail: Tail::Clean,
    };
    let mut live: HashMap<u32, usize> = HashMap::new();
    let mut sequence = 0u32;

    loop {
        match reader.next_frame()? {
            FrameRead::Frame { offset, frame } => {
                match frame {
                    Frame::Insert(payload) => {
                        scan.inserts += 1;
                        live.insert(sequence, payload.len());
                        scan.entries.push(LogEntry::Insert {
                            offset,
                            sequence,
                            len: payload.len(),
                        });
                    }
                    Frame::Delete(target) => {
                        scan.deletes += 1;
                        let target = target.as_u32();
                        if live.remove(&target).is_none() {
                            scan.stray_tombstones.push((offset, target));
                        }
                        scan.entries.push(LogEntry::Delete {
                            offset,
                            sequence,
                            target,
                        });
                    }
                }
                sequence = sequence.wrapping_add(1);
            }
            FrameRead::End => break,
            FrameRead::Torn { offset } => {
                scan.tail = Tail::Torn {
                    offset,
                    bytes: size - offset,
                };
                break;
            }
        }
    }

    scan.live = live.len();
    scan.live_bytes = live.values().map(|len| *len as u64).sum();
    debug!(path = %path.display(), frames = scan.entries.len(), "scanned log");
    Ok(scan)
}

/// One index log entry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndexLine {
    /// Binds an id to a payload.
    Insert {
        offset: u64,
        id: i32,
        slot_offset: u32,
        len: u16,
    },
    /// Unbinds an id.
    Delete { offset: u64, id: i32 },
}

impl IndexLine {
    pub fn offset(&self) -> u64 {
        match self {
            Self::Insert { offset, .. } | Self::Delete { offset, .. } => *offset,
        }
    }
}

/// Everything learned from reading an index log and its storage file.
#[derive(Debug)]
pub struct IndexScan {
    pub index_size: u64,
    pub storage_size: u64,
    pub entries: Vec<IndexLine>,
    pub inserts: usize,
    pub deletes: usize,
    pub live: usize,
    pub live_bytes: u64,
    pub max_id: i32,
    /// Inserts whose payload runs past the storage file, as
    /// `(offset, id)`.
    pub dangling: Vec<(u64, i32)>,
    /// Deletes for ids that were not bound, as `(offset, id)`.
    pub stray_deletes: Vec<(u64, i32)>,
    pub tail: Tail,
}

/// Reads every complete entry of an `_index.db` log.
///
/// Either file may be missing; a missing file reads as empty.
pub fn scan_index(index: &Path, storage: &Path) -> CliResult<IndexScan> {
    let storage_size = file_size(storage)?;
    let index_size = file_size(index)?;

    let mut scan = IndexScan {
        index_size,
        storage_size,
        entries: Vec::new(),
        inserts: 0,
        deletes: 0,
        live: 0,
        live_bytes: 0,
        max_id: 0,
        dangling: Vec::new(),
        stray_deletes: Vec::new(),
        tail: Tail::Clean,
    };
    if index_size == 0 {
        return Ok(scan);
    }

    let mut reader = IndexReader::new(BufReader::new(File::open(index)?));
    let mut live = HashMap::new();
    loop {
        match reader.next_entry()? {
            IndexRead::Entry { offset, entry } => match entry {
                IndexEntry::Insert { id, slot } => {
                    scan.inserts += 1;
                    if slot.end() > storage_size {
                        scan.dangling.push((offset, id));
                    }
                    live.insert(id, slot);
                    scan.max_id = scan.max_id.max(id);
                    scan.entries.push(IndexLine::Insert {
                        offset,
                        id,
                        slot_offset: slot.offset,
                        len: slot.len,
                    });
                }
                IndexEntry::Delete { id } => {
                    scan.deletes += 1;
                    if live.remove(&id).is_none() {
                        scan.stray_deletes.push((offset, id));
                    }
                    scan.entries.push(IndexLine::Delete { offset, id });
                }
            },
            IndexRead::End => break,
            IndexRead::Torn { offset } => {
                scan.tail = Tail::Torn {
                    offset,
                    bytes: index_size - offset,
                };
                break;
            }
            IndexRead::UnknownMarker { offset, marker } => {
                scan.tail = Tail::UnknownMarker { offset, marker };
                break;
            }
        }
    }

    scan.live = live.len();
    scan.live_bytes = live.values().map(|slot| u64::from(slot.len)).sum();
    debug!(path = %index.display(), entries = scan.entries.len(), "scanned index");
    Ok(scan)
}

fn file_size(path: &Path) -> CliResult<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::collection::frame::{write_delete, write_insert};
    use docket_core::database::index::Slot;
    use docket_core::SequenceNumber;
    use tempfile::tempdir;

    #[test]
    fn resolve_finds_both_kinds() {
        let dir = tempdir().unwrap();
        assert!(resolve(dir.path(), "users").is_err());

        std::fs::write(dir.path().join("users.collection"), b"").unwrap();
        std::fs::write(dir.path().join("users_index.db"), b"").unwrap();
        let targets = resolve(dir.path(), "users").unwrap();
        assert_eq!(targets.len(), 2);
        assert!(matches!(targets[0], Target::Log { .. }));
        assert!(matches!(targets[1], Target::Database { .. }));
    }

    #[test]
    fn log_scan_tracks_live_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.collection");
        let mut buf = Vec::new();
        write_insert(&mut buf, b"aaaa").unwrap();
        write_insert(&mut buf, b"bb").unwrap();
        write_delete(&mut buf, SequenceNumber::new(0));
        write_delete(&mut buf, SequenceNumber::new(9));
        let clean = buf.len() as u64;
        buf.extend_from_slice(&[5, 0, 1]);
        std::fs::write(&path, &buf).unwrap();

        let scan = scan_log(&path).unwrap();
        assert_eq!(scan.inserts, 2);
        assert_eq!(scan.deletes, 2);
        assert_eq!(scan.live, 1);
        assert_eq!(scan.live_bytes, 2);
        assert_eq!(scan.stray_tombstones, vec![(16, 9)]);
        assert_eq!(
            scan.tail,
            Tail::Torn {
                offset: clean,
                bytes: 3
            }
        );
    }

    #[test]
    fn index_scan_flags_problems() {
        let dir = tempdir().unwrap();
        let index = dir.path().join("pages_index.db");
        let storage = dir.path().join("pages.db");
        std::fs::write(&storage, b"0123456789").unwrap();

        let mut buf = Vec::new();
        IndexEntry::Insert {
            id: 1,
            slot: Slot { offset: 0, len: 4 },
        }
        .encode_into(&mut buf);
        IndexEntry::Insert {
            id: 2,
            slot: Slot { offset: 8, len: 4 },
        }
        .encode_into(&mut buf);
        IndexEntry::Delete { id: 7 }.encode_into(&mut buf);
        buf.push(9);
        std::fs::write(&index, &buf).unwrap();

        let scan = scan_index(&index, &storage).unwrap();
        assert_eq!(scan.live, 2);
        assert_eq!(scan.max_id, 2);
        assert_eq!(scan.dangling, vec![(11, 2)]);
        assert_eq!(scan.stray_deletes, vec![(22, 7)]);
        assert_eq!(
            scan.tail,
            Tail::UnknownMarker {
                offset: 27,
                marker: 9
            }
        );
    }

    #[test]
    fn missing_index_reads_as_empty() {
        let dir = tempdir().unwrap();
        let scan = scan_index(
            &dir.path().join("none_index.db"),
            &dir.path().join("none.db"),
        )
        .unwrap();
        assert_eq!(scan.entries.len(), 0);
        assert!(scan.tail.is_clean());
    }
}
