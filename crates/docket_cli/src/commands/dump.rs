//! Dump command implementation.

use crate::scan::{resolve, scan_index, scan_log, IndexLine, LogEntry, Target};
use crate::Format;
use serde::Serialize;
use std::path::Path;

/// Entries read from one file.
#[derive(Debug, Serialize)]
#[serde(tag = "file", rename_all = "snake_case")]
pub enum Dump {
    /// Frames of a `.collection` log.
    Log {
        /// Frames, in file order.
        entries: Vec<LogEntry>,
    },
    /// Entries of an `_index.db` log.
    Index {
        /// Entries, in file order.
        entries: Vec<IndexLine>,
    },
}

/// Runs the dump command.
pub fn run(
    base: &Path,
    name: &str,
    limit: Option<usize>,
    start_offset: u64,
    format: Format,
) -> Result<(), Box<dyn std::error::Error>> {
    let dumps = collect(base, name, limit, start_offset)?;

    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&dumps)?);
        }
        Format::Text => {
            for dump in &dumps {
                print_text_output(dump);
            }
        }
    }

    Ok(())
}

/// Reads the entries of every file stored under `name`.
pub fn collect(
    base: &Path,
    name: &str,
    limit: Option<usize>,
    start_offset: u64,
) -> Result<Vec<Dump>, Box<dyn std::error::Error>> {
    let max_entries = limit.unwrap_or(usize::MAX);
    let mut dumps = Vec::new();

    for target in resolve(base, name)? {
        match target {
            Target::Log { path } => {
                let entries = scan_log(&path)?
                    .entries
                    .into_iter()
                    .filter(|entry| entry.offset() >= start_offset)
                    .take(max_entries)
                    .collect();
                dumps.push(Dump::Log { entries });
            }
            Target::Database { index, storage } => {
                let entries = scan_index(&index, &storage)?
                    .entries
                    .into_iter()
                    .filter(|entry| entry.offset() >= start_offset)
                    .take(max_entries)
                    .collect();
                dumps.push(Dump::Index { entries });
            }
        }
    }

    Ok(dumps)
}

fn print_text_output(dump: &Dump) {
    match dump {
        Dump::Log { entries } => {
            println!("Log frames ({} shown)", entries.len());
            println!("================");
            for entry in entries {
                match entry {
                    LogEntry::Insert {
                        offset,
                        sequence,
                        len,
                    } => println!("[{offset:08}] seq={sequence:<6} INSERT  payload={len} bytes"),
                    LogEntry::Delete {
                        offset,
                        sequence,
                        target,
                    } => println!("[{offset:08}] seq={sequence:<6} DELETE  target={target}"),
                }
            }
        }
        Dump::Index { entries } => {
            println!("Index entries ({} shown)", entries.len());
            println!("================");
            for entry in entries {
                match entry {
                    IndexLine::Insert {
                        offset,
                        id,
                        slot_offset,
                        len,
                    } => println!("[{offset:08}] INSERT  id={id} at={slot_offset} len={len}"),
                    IndexLine::Delete { offset, id } => {
                        println!("[{offset:08}] DELETE  id={id}");
                    }
                }
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use docket_core::collection::frame::{write_delete, write_insert};
    use docket_core::SequenceNumber;
    use tempfile::tempdir;

    #[test]
    fn limit_and_offset_select_entries() {
        let dir = tempdir().unwrap();
        let mut buf = Vec::new();
        for payload in [b"aa", b"bb", b"cc"] {
            write_insert(&mut buf, payload).unwrap();
        }
        write_delete(&mut buf, SequenceNumber::new(1));
        std::fs::write(dir.path().join("x.collection"), &buf).unwrap();

        let dumps = collect(dir.path(), "x", Some(2), 4).unwrap();
        let Dump::Log { entries } = &dumps[0] else {
            panic!("expected a log dump");
        };
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], LogEntry::Insert { offset: 4, sequence: 1, len: 2 }));
        assert!(matches!(entries[1], LogEntry::Insert { offset: 8, sequence: 2, .. }));

        let json = serde_json::to_value(&dumps).unwrap();
        assert_eq!(json[0]["file"], "log");
        assert_eq!(json[0]["entries"][0]["kind"], "insert");
    }
}
