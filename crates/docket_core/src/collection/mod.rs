//! Append-log document collection.
//!
//! A [`Collection`] keeps every live record in memory, in insertion order,
//! and persists changes by appending frames to `{name}.collection`.
//!
//! Mutations update the in-memory list immediately and queue a frame for
//! the background [`WriteQueue`]; they never wait for the disk. A change
//! becomes durable once its frame has been flushed, either by the timer,
//! by [`Collection::force_save`], or on [`Collection::close`].
//!
//! # Sequence numbers
//!
//! Every frame consumes one sequence number. Tombstones name the sequence
//! of the insert they cancel, so removing a record never rewrites history.
//! [`Collection::optimize`] rewrites the log with only the live records
//! and renumbers them from zero.
//!
//! # Example
//!
//! ```rust
//! use docket_core::{Collection, CollectionConfig, IdAccessor, Identity, JsonCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Note {
//!     id: i32,
//!     text: String,
//! }
//!
//! impl Identity for Note {
//!     fn id(&self) -> i32 { self.id }
//!     fn set_id(&mut self, id: i32) { self.id = id; }
//! }
//!
//! let dir = tempfile::tempdir().unwrap();
//! let notes = Collection::open(
//!     dir.path(),
//!     "notes",
//!     JsonCodec,
//!     Some(IdAccessor::identity()),
//!     CollectionConfig::default(),
//! )
//! .unwrap();
//!
//! let id = notes.add(Note { id: 0, text: "hello".into() }).unwrap();
//! assert_eq!(id, Some(1));
//! notes.close().unwrap();
//! ```

pub mod frame;
mod log;

pub use self::log::LOG_SUFFIX;

use crate::config::CollectionConfig;
use crate::error::{CoreError, CoreResult};
use crate::identity::IdAccessor;
use crate::queue::WriteQueue;
use crate::stats::{FlushCounters, LogStats};
use crate::types::{Location, SequenceNumber};
use docket_codec::Codec;
use docket_storage::{remove_if_exists, AppendFile};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use self::frame::{check_payload, write_delete, write_insert};

/// What a queued mutation writes.
#[derive(Debug)]
enum Op {
    Insert(Vec<u8>),
    Delete(SequenceNumber),
    /// Snapshot mode: rewrite the whole snapshot.
    Snapshot,
}

/// A queued mutation, stamped with the log generation it belongs to.
///
/// Rewriting the log from memory (compaction, clear, repair) starts a new
/// generation; frames queued for an older generation are already part of
/// the rewrite and are skipped.
#[derive(Debug)]
struct Mutation {
    generation: u64,
    op: Op,
}

struct State<T> {
    entries: Vec<(SequenceNumber, T)>,
    next_sequence: SequenceNumber,
    max_id: i32,
    generation: u64,
    /// A failed flush left the file out of step with memory.
    diverged: bool,
    closed: bool,
}

impl<T> State<T> {
    fn take_sequence(&mut self) -> SequenceNumber {
        let sequence = self.next_sequence;
        self.next_sequence = sequence.next();
        sequence
    }
}

struct Shared<T, C> {
    location: Location,
    codec: C,
    accessor: Option<IdAccessor<T>>,
    use_log: bool,
    state: Mutex<State<T>>,
    file: Mutex<Option<AppendFile>>,
    counters: FlushCounters,
}

impl<T, C> Shared<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    fn accessor(&self, operation: &'static str) -> CoreResult<&IdAccessor<T>> {
        self.accessor
            .as_ref()
            .ok_or_else(|| CoreError::missing_identity(operation))
    }

    fn ensure_open(&self, state: &State<T>) -> CoreResult<()> {
        if state.closed {
            return Err(CoreError::closed(self.location.name()));
        }
        Ok(())
    }

    fn position(&self, state: &State<T>, id: i32) -> Option<usize> {
        let accessor = self.accessor.as_ref()?;
        state
            .entries
            .iter()
            .position(|(_, record)| accessor.get(record) == id)
    }

    /// Assigns ids and encodes a batch without touching the state.
    ///
    /// `replacing` is the position of a live entry about to be removed,
    /// whose id may be reused by the batch.
    fn prepare(
        &self,
        state: &State<T>,
        records: &mut [T],
        replacing: Option<usize>,
    ) -> CoreResult<Vec<Op>> {
        if let Some(accessor) = &self.accessor {
            let mut next = state.max_id;
            let mut seen = HashSet::new();
            for record in records.iter_mut() {
                let mut id = accessor.get(record);
                if id == 0 {
                    next = next
                        .checked_add(1)
                        .ok_or_else(|| CoreError::invalid_config("id space exhausted"))?;
                    id = next;
                    accessor.set(record, id);
                } else {
                    if self
                        .position(state, id)
                        .is_some_and(|pos| Some(pos) != replacing)
                    {
                        return Err(CoreError::DuplicateId { id });
                    }
                    next = next.max(id);
                }
                if !seen.insert(id) {
                    return Err(CoreError::DuplicateId { id });
                }
            }
        }

        if !self.use_log {
            return Ok(vec![Op::Snapshot]);
        }
        records
            .iter()
            .map(|record| {
                let payload = self.codec.encode(record)?;
                check_payload(&payload)?;
                Ok(Op::Insert(payload))
            })
            .collect()
    }

    fn commit(&self, state: &mut State<T>, records: Vec<T>) -> Vec<Option<i32>> {
        records
            .into_iter()
            .map(|record| {
                let id = self.accessor.as_ref().map(|accessor| accessor.get(&record));
                if let Some(id) = id {
                    state.max_id = state.max_id.max(id);
                }
                let sequence = state.take_sequence();
                state.entries.push((sequence, record));
                id
            })
            .collect()
    }

    /// Removes the entry at `pos` and returns it with its tombstone op.
    fn unlink(&self, state: &mut State<T>, pos: usize) -> (T, Op) {
        let (sequence, record) = state.entries.remove(pos);
        state.take_sequence();
        let op = if self.use_log {
            Op::Delete(sequence)
        } else {
            Op::Snapshot
        };
        (record, op)
    }

    fn open_file<'a>(&self, file: &'a mut Option<AppendFile>) -> CoreResult<&'a mut AppendFile> {
        if file.is_none() {
            *file = Some(AppendFile::open(&self.location.file(log::LOG_SUFFIX))?);
        }
        file.as_mut()
            .ok_or_else(|| CoreError::closed(self.location.name()))
    }

    /// Rewrites the log from memory and starts a new generation.
    fn rewrite(&self, state: &mut State<T>) -> CoreResult<u64> {
        let mut file = self.file.lock();
        *file = None;

        let size = log::rewrite_log(
            &self.location,
            &self.codec,
            state.entries.iter().map(|(_, record)| record),
        )?;

        let mut sequence = SequenceNumber::default();
        for (seq, _) in &mut state.entries {
            *seq = sequence;
            sequence = sequence.next();
        }
        state.next_sequence = sequence;
        state.generation += 1;
        state.diverged = false;
        self.counters.record_compaction();

        *file = Some(AppendFile::open(&self.location.file(log::LOG_SUFFIX))?);
        Ok(size)
    }

    /// Batch processor run by the write queue.
    fn process(&self, batch: Vec<Mutation>) -> CoreResult<()> {
        let mut state = self.state.lock();

        if !self.use_log {
            if batch.iter().any(|m| m.generation == state.generation) {
                let _file = self.file.lock();
                let size = log::save_snapshot(
                    &self.location,
                    &self.codec,
                    state.entries.iter().map(|(_, record)| record),
                )
                .inspect_err(|_| self.counters.record_flush_error())?;
                self.counters.record_flush(1, size);
            }
            return Ok(());
        }

        if state.diverged {
            let size = self
                .rewrite(&mut state)
                .inspect_err(|_| self.counters.record_flush_error())?;
            info!(collection = %self.location, bytes = size, "rewrote log after failed flush");
        }

        let generation = state.generation;
        let mut buf = Vec::new();
        let mut frames = 0usize;
        for mutation in batch.into_iter().filter(|m| m.generation == generation) {
            match mutation.op {
                Op::Insert(payload) => write_insert(&mut buf, &payload)?,
                Op::Delete(sequence) => write_delete(&mut buf, sequence),
                Op::Snapshot => continue,
            }
            frames += 1;
        }
        if buf.is_empty() {
            return Ok(());
        }

        let mut file = self.file.lock();
        let handle = match self.open_file(&mut file) {
            Ok(handle) => handle,
            Err(err) => {
                state.diverged = true;
                self.counters.record_flush_error();
                return Err(err);
            }
        };
        let before = handle.size();
        let written = handle.append(&buf).and_then(|_| handle.flush());
        if let Err(err) = written {
            state.diverged = true;
            self.counters.record_flush_error();
            if handle.truncate(before).is_err() {
                *file = None;
            }
            return Err(err.into());
        }

        self.counters.record_flush(frames as u64, buf.len() as u64);
        debug!(collection = %self.location, frames, bytes = buf.len(), "appended frames");
        Ok(())
    }
}

/// Iterator over the live records of a [`Collection`], in order.
pub struct Records<'a, T> {
    inner: std::slice::Iter<'a, (SequenceNumber, T)>,
}

impl<'a, T> Iterator for Records<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, record)| record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> DoubleEndedIterator for Records<'_, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|(_, record)| record)
    }
}

impl<T> ExactSizeIterator for Records<'_, T> {}

/// An in-memory collection persisted to an append-only log.
///
/// All methods take `&self`; the collection can be shared between threads
/// behind an `Arc`.
pub struct Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    shared: Arc<Shared<T, C>>,
    queue: WriteQueue<Mutation>,
}

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    /// Opens or creates the collection `name` under `base_path`.
    ///
    /// The log is replayed into memory before this returns. Pass `None`
    /// as the accessor for record types without an id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a blank path or name or a zero flush
    /// interval, `Corrupted` if a complete frame cannot be decoded, or an
    /// I/O error.
    pub fn open(
        base_path: impl AsRef<Path>,
        name: impl Into<String>,
        codec: C,
        accessor: Option<IdAccessor<T>>,
        config: CollectionConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        let location = Location::new(base_path, name)?;
        location.ensure_dir()?;

        let (replayed, file) = if config.use_index_file {
            let (replayed, file) = log::open_log(&location, &codec, accessor.as_ref())?;
            (replayed, Some(file))
        } else {
            (log::load_snapshot(&location, &codec, accessor.as_ref())?, None)
        };

        let shared = Arc::new(Shared {
            location,
            codec,
            accessor,
            use_log: config.use_index_file,
            state: Mutex::new(State {
                entries: replayed.entries,
                next_sequence: replayed.next_sequence,
                max_id: replayed.max_id,
                generation: 0,
                diverged: false,
                closed: false,
            }),
            file: Mutex::new(file),
            counters: FlushCounters::default(),
        });

        let processor = Arc::clone(&shared);
        let queue = WriteQueue::start(
            shared.location.name(),
            config.flush_interval,
            config.max_items_per_flush,
            Box::new(move |batch| processor.process(batch)),
        )?;

        Ok(Self { shared, queue })
    }

    /// Returns where the collection lives.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.shared.location
    }

    /// Adds a record and returns its id.
    ///
    /// A zero id is replaced with the next free id. Returns `None` for
    /// record types without an id.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if the record carries an explicit id that is
    /// already live, `PayloadSize` if it encodes to an empty or oversized
    /// payload, or a codec error. The collection is unchanged on error.
    pub fn add(&self, record: T) -> CoreResult<Option<i32>> {
        let mut ids = self.add_range([record])?;
        Ok(ids.pop().flatten())
    }

    /// Adds several records as one unit: either all are added or none.
    ///
    /// # Errors
    ///
    /// Same as [`add`](Self::add); an explicit id repeated within the
    /// batch is also a `DuplicateId`.
    pub fn add_range(&self, records: impl IntoIterator<Item = T>) -> CoreResult<Vec<Option<i32>>> {
        let mut records: Vec<T> = records.into_iter().collect();
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let ops = self.shared.prepare(&state, &mut records, None)?;
        let ids = self.shared.commit(&mut state, records);
        self.enqueue(&state, ops);
        Ok(ids)
    }

    /// Removes the record with the same id as `record`.
    ///
    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id.
    pub fn remove(&self, record: &T) -> CoreResult<bool> {
        let id = self.shared.accessor("remove a record")?.get(record);
        Ok(self.remove_id(id)?.is_some())
    }

    /// Removes the record with `id`, returning it if it was present.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id.
    pub fn remove_id(&self, id: i32) -> CoreResult<Option<T>> {
        self.shared.accessor("remove by id")?;
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let Some(pos) = self.shared.position(&state, id) else {
            return Ok(None);
        };
        let (record, op) = self.shared.unlink(&mut state, pos);
        self.enqueue_one(&state, op);
        Ok(Some(record))
    }

    /// Removes and returns the record at `index`.
    ///
    /// # Errors
    ///
    /// Returns `IndexOutOfRange` if `index >= len()`.
    pub fn remove_at(&self, index: usize) -> CoreResult<T> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let len = state.entries.len();
        if index >= len {
            return Err(CoreError::IndexOutOfRange { index, len });
        }
        let (record, op) = self.shared.unlink(&mut state, index);
        self.enqueue_one(&state, op);
        Ok(record)
    }

    /// Removes every record matching `predicate`. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close).
    pub fn remove_where(&self, mut predicate: impl FnMut(&T) -> bool) -> CoreResult<usize> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let doomed: Vec<SequenceNumber> = state
            .entries
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(sequence, _)| *sequence)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        state
            .entries
            .retain(|(sequence, _)| doomed.binary_search(sequence).is_err());
        let ops: Vec<Op> = if self.shared.use_log {
            doomed
                .iter()
                .map(|sequence| {
                    state.take_sequence();
                    Op::Delete(*sequence)
                })
                .collect()
        } else {
            for _ in &doomed {
                state.take_sequence();
            }
            vec![Op::Snapshot]
        };
        self.enqueue(&state, ops);
        Ok(doomed.len())
    }

    /// Replaces the live record that has the same id as `record`.
    ///
    /// This is a remove followed by an add, so the record moves to the end
    /// of the iteration order. If no record has that id, `record` is
    /// simply added.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id, or any
    /// error [`add`](Self::add) can return.
    pub fn replace(&self, record: T) -> CoreResult<Option<i32>> {
        let accessor = self.shared.accessor("replace a record")?;
        let mut records = vec![record];
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let id = accessor.get(&records[0]);
        let existing = match id {
            0 => None,
            id => self.shared.position(&state, id),
        };
        let inserts = self.shared.prepare(&state, &mut records, existing)?;

        let mut ops = Vec::with_capacity(inserts.len() + 1);
        if let Some(pos) = existing {
            let (_, tombstone) = self.shared.unlink(&mut state, pos);
            ops.push(tombstone);
        }
        ops.extend(inserts);

        let mut ids = self.shared.commit(&mut state, records);
        self.enqueue(&state, ops);
        Ok(ids.pop().flatten())
    }

    /// Alias for [`replace`](Self::replace).
    ///
    /// # Errors
    ///
    /// See [`replace`](Self::replace).
    pub fn update(&self, record: T) -> CoreResult<Option<i32>> {
        self.replace(record)
    }

    /// Returns true if a record with `id` is live.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id.
    pub fn contains(&self, id: i32) -> CoreResult<bool> {
        self.shared.accessor("look up by id")?;
        let state = self.shared.state.lock();
        Ok(self.shared.position(&state, id).is_some())
    }

    /// Number of live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().entries.len()
    }

    /// Returns true if there are no live records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over the live records in order, under the collection lock.
    ///
    /// Other threads cannot mutate the collection while `f` runs, so keep
    /// it short.
    ///
    /// The lock is not reentrant: calling any method of this collection
    /// from inside `f` deadlocks. Copy what you need out of the records and
    /// act on it after `f` returns.
    pub fn with_records<R>(&self, f: impl FnOnce(Records<'_, T>) -> R) -> R {
        let state = self.shared.state.lock();
        f(Records {
            inner: state.entries.iter(),
        })
    }

    /// Rewrites the log with only the live records and renumbers them.
    ///
    /// Pending writes are flushed first. Does nothing when the collection
    /// uses a snapshot file instead of a log.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or rewriting fails; the previous log
    /// stays in place.
    pub fn optimize(&self) -> CoreResult<()> {
        if !self.shared.use_log {
            return Ok(());
        }
        self.queue.flush()?;

        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;
        let size = self.shared.rewrite(&mut state)?;
        info!(
            collection = %self.shared.location,
            live = state.entries.len(),
            bytes = size,
            "optimized log"
        );
        Ok(())
    }

    /// Flushes every queued write to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns the first flush error.
    pub fn force_save(&self) -> CoreResult<()> {
        self.queue.flush()?;

        let mut state = self.shared.state.lock();
        if state.diverged {
            self.shared.rewrite(&mut state)?;
        }
        if let Some(file) = self.shared.file.lock().as_mut() {
            file.sync()?;
        }
        Ok(())
    }

    /// Removes every record, drops queued writes, and deletes the
    /// collection's files. Id assignment restarts from 1.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be deleted.
    pub fn clear(&self) -> CoreResult<()> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&state)?;

        let removed = state.entries.len();
        state.entries.clear();
        state.next_sequence = SequenceNumber::default();
        state.max_id = 0;
        state.generation += 1;
        state.diverged = false;
        let dropped = self.queue.discard();

        let mut file = self.shared.file.lock();
        *file = None;
        for path in log::owned_files(&self.shared.location) {
            remove_if_exists(&path)?;
        }

        info!(
            collection = %self.shared.location,
            removed,
            dropped,
            "cleared collection"
        );
        Ok(())
    }

    /// Changes how long writes may wait before the background flush.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero interval.
    pub fn set_flush_interval(&self, interval: Duration) -> CoreResult<()> {
        self.queue.set_interval(interval)
    }

    /// Installs a handler for errors from background flushes.
    ///
    /// Without a handler they are logged at error level.
    pub fn on_flush_error(&self, handler: impl Fn(&CoreError) + Send + Sync + 'static) {
        self.queue.on_error(Arc::new(handler));
    }

    /// Returns a point-in-time summary of the collection.
    #[must_use]
    pub fn stats(&self) -> LogStats {
        let state = self.shared.state.lock();
        let bytes = if self.shared.use_log {
            self.shared.file.lock().as_ref().map_or(0, AppendFile::size)
        } else {
            std::fs::metadata(self.shared.location.file(log::SNAPSHOT_SUFFIX))
                .map_or(0, |m| m.len())
        };
        let counters = &self.shared.counters;
        LogStats {
            live_records: state.entries.len(),
            log_bytes: bytes,
            next_sequence: state.next_sequence,
            pending_writes: self.queue.len(),
            flushes: counters.flushes(),
            frames_written: counters.frames_written(),
            bytes_written: counters.bytes_written(),
            flush_errors: counters.flush_errors(),
            compactions: counters.compactions(),
        }
    }

    /// Flushes pending writes and releases the log file.
    ///
    /// Later mutations fail with `Closed`. Reads keep working on the
    /// in-memory records. Closing twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns the final flush error; the collection is closed anyway.
    pub fn close(&self) -> CoreResult<()> {
        if self.shared.state.lock().closed {
            return Ok(());
        }

        let flushed = self.force_save();
        self.queue.shutdown();

        let mut state = self.shared.state.lock();
        state.closed = true;
        *self.shared.file.lock() = None;
        debug!(collection = %self.shared.location, "closed collection");
        flushed
    }

    fn enqueue(&self, state: &State<T>, ops: Vec<Op>) {
        let generation = state.generation;
        self.queue
            .enqueue_all(ops.into_iter().map(|op| Mutation { generation, op }));
    }

    fn enqueue_one(&self, state: &State<T>, op: Op) {
        self.queue.enqueue(Mutation {
            generation: state.generation,
            op,
        });
    }
}

impl<T, C> Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + Clone + 'static,
    C: Codec,
{
    /// Returns a copy of the record with `id`.
    ///
    /// This is a linear scan over the live records.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id.
    pub fn find(&self, id: i32) -> CoreResult<Option<T>> {
        self.shared.accessor("look up by id")?;
        let state = self.shared.state.lock();
        Ok(self
            .shared
            .position(&state, id)
            .map(|pos| state.entries[pos].1.clone()))
    }

    /// Returns a copy of the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        let state = self.shared.state.lock();
        state.entries.get(index).map(|(_, record)| record.clone())
    }

    /// Returns a copy of every live record, in order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.with_records(|records| records.cloned().collect())
    }
}

impl<T, C> Drop for Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(collection = %self.shared.location, error = %err, "failed to close collection");
        }
    }
}

impl<T, C> std::fmt::Debug for Collection<T, C>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    C: Codec,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("location", &self.shared.location)
            .field("codec", &self.shared.codec.name())
            .field("len", &self.len())
            .finish()
    }
}
