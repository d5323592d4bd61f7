//! Physical log files of an append-log collection.

use super::frame::{write_insert, Frame, FrameRead, FrameReader};
use crate::error::{CoreError, CoreResult};
use crate::identity::IdAccessor;
use crate::types::{Location, SequenceNumber};
use docket_codec::Codec;
use docket_storage::{remove_if_exists, write_atomic, AppendFile};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::PathBuf;
use tracing::{debug, warn};

/// File suffix of the append log.
pub const LOG_SUFFIX: &str = ".collection";
pub(crate) const TEMP_SUFFIX: &str = "_temp.collection";
pub(crate) const SNAPSHOT_SUFFIX: &str = ".json";
pub(crate) const SAVING_SUFFIX: &str = "_saving.json";

/// Live records recovered from disk.
pub(crate) struct Replayed<T> {
    pub entries: Vec<(SequenceNumber, T)>,
    pub next_sequence: SequenceNumber,
    pub max_id: i32,
}

impl<T> Replayed<T> {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next_sequence: SequenceNumber::default(),
            max_id: 0,
        }
    }
}

fn track_max<T>(accessor: Option<&IdAccessor<T>>, record: &T, max_id: &mut i32) {
    if let Some(accessor) = accessor {
        *max_id = (*max_id).max(accessor.get(record));
    }
}

/// Replays `{name}.collection` and opens it for appending.
///
/// A torn tail is cut off so the next append starts on a frame boundary.
pub(crate) fn open_log<T, C>(
    location: &Location,
    codec: &C,
    accessor: Option<&IdAccessor<T>>,
) -> CoreResult<(Replayed<T>, AppendFile)>
where
    T: DeserializeOwned,
    C: Codec,
{
    if remove_if_exists(&location.file(TEMP_SUFFIX))? {
        debug!(collection = %location, "discarded leftover compaction file");
    }

    let path = location.file(LOG_SUFFIX);
    let mut replayed = Replayed::empty();
    let mut valid_len = 0;
    let mut inserts = 0usize;
    let mut deletes = 0usize;

    match File::open(&path) {
        Ok(file) => {
            let mut reader = FrameReader::new(BufReader::new(file));
            loop {
                match reader.next_frame()? {
                    FrameRead::Frame { offset, frame } => {
                        let sequence = replayed.next_sequence;
                        replayed.next_sequence = sequence.next();
                        match frame {
                            Frame::Insert(payload) => {
                                let record: T = codec.decode(&payload).map_err(|e| {
                                    CoreError::corrupted(&path, offset, e.to_string())
                                })?;
                                track_max(accessor, &record, &mut replayed.max_id);
                                replayed.entries.push((sequence, record));
                                inserts += 1;
                            }
                            Frame::Delete(target) => {
                                if let Ok(pos) = replayed
                                    .entries
                                    .binary_search_by_key(&target, |(seq, _)| *seq)
                                {
                                    replayed.entries.remove(pos);
                                }
                                deletes += 1;
                            }
                        }
                    }
                    FrameRead::End => break,
                    FrameRead::Torn { offset } => {
                        warn!(
                            path = %path.display(),
                            offset,
                            "log ends inside a frame, dropping incomplete tail"
                        );
                        break;
                    }
                }
            }
            valid_len = reader.offset();
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut file = AppendFile::open(&path)?;
    if file.size() > valid_len {
        file.truncate(valid_len)?;
    }

    debug!(
        collection = %location,
        inserts,
        deletes,
        live = replayed.entries.len(),
        bytes = valid_len,
        "replayed log"
    );
    Ok((replayed, file))
}

/// Writes the live records to `{name}_temp.collection` and swaps it in.
///
/// Every record is encoded before anything touches the disk, so an
/// encoding failure leaves the current log untouched. Returns the size of
/// the new log.
pub(crate) fn rewrite_log<'a, T, C>(
    location: &Location,
    codec: &C,
    records: impl Iterator<Item = &'a T>,
) -> CoreResult<u64>
where
    T: Serialize + 'a,
    C: Codec,
{
    let mut buf = Vec::new();
    for record in records {
        let payload = codec.encode(record)?;
        write_insert(&mut buf, &payload)?;
    }

    write_atomic(
        &location.file(TEMP_SUFFIX),
        &location.file(LOG_SUFFIX),
        &buf,
    )?;
    Ok(buf.len() as u64)
}

/// Loads the `{name}.json` snapshot used when the log is disabled.
pub(crate) fn load_snapshot<T, C>(
    location: &Location,
    codec: &C,
    accessor: Option<&IdAccessor<T>>,
) -> CoreResult<Replayed<T>>
where
    T: DeserializeOwned,
    C: Codec,
{
    remove_if_exists(&location.file(SAVING_SUFFIX))?;

    let path = location.file(SNAPSHOT_SUFFIX);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replayed::empty()),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(Replayed::empty());
    }

    let records: Vec<T> = codec
        .decode_from(BufReader::new(file))
        .map_err(|e| CoreError::corrupted(&path, 0, e.to_string()))?;

    let mut replayed = Replayed::empty();
    for record in records {
        track_max(accessor, &record, &mut replayed.max_id);
        let sequence = replayed.next_sequence;
        replayed.next_sequence = sequence.next();
        replayed.entries.push((sequence, record));
    }
    debug!(collection = %location, live = replayed.entries.len(), "loaded snapshot");
    Ok(replayed)
}

/// Rewrites the `{name}.json` snapshot from the live records.
pub(crate) fn save_snapshot<'a, T, C>(
    location: &Location,
    codec: &C,
    records: impl Iterator<Item = &'a T>,
) -> CoreResult<u64>
where
    T: Serialize + 'a,
    C: Codec,
{
    let records: Vec<&T> = records.collect();
    let bytes = codec.encode(&records)?;
    write_atomic(
        &location.file(SAVING_SUFFIX),
        &location.file(SNAPSHOT_SUFFIX),
        &bytes,
    )?;
    Ok(bytes.len() as u64)
}

/// Every file an append-log collection may own.
pub(crate) fn owned_files(location: &Location) -> [PathBuf; 4] {
    [
        location.file(LOG_SUFFIX),
        location.file(TEMP_SUFFIX),
        location.file(SNAPSHOT_SUFFIX),
        location.file(SAVING_SUFFIX),
    ]
}
