//! Indexed file database.
//!
//! A [`Database`] keeps only an id → slot map in memory. Record payloads
//! live in `{name}.db`; every change to the map is recorded in
//! `{name}_index.db` (see [`index`]). Opening a database replays the index
//! log, so cold start time depends on the index size, not the data size.
//!
//! Writes are synchronous: a mutation returns once the payloads and the
//! index entries have been appended and flushed. Payloads are written
//! before the index entries that point at them; a crash in between leaves
//! unreferenced bytes in the storage file, never a dangling index entry.
//!
//! # Compaction
//!
//! [`Database::optimize`] copies the live payloads into
//! `{name}_temp.db` and a matching `{name}_temp_index.db`, syncs both, and
//! renames storage first, then index. A crash between the two renames is
//! completed on the next open.

pub mod index;
mod iter;

pub use iter::DatabaseIter;

use self::index::{IndexEntry, IndexRead, IndexReader, Slot};
use self::iter::SlotReader;
use crate::collection::frame::MAX_PAYLOAD;
use crate::error::{CoreError, CoreResult};
use crate::identity::IdAccessor;
use crate::stats::DatabaseStats;
use crate::types::Location;
use docket_codec::Codec;
use docket_storage::{remove_if_exists, replace_file, AppendFile};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::marker::PhantomData;
use std::path::Path;
use tracing::{debug, error, info, warn};

/// File suffix of the payload storage file.
pub const STORAGE_SUFFIX: &str = ".db";
/// File suffix of the index log.
pub const INDEX_SUFFIX: &str = "_index.db";
pub(crate) const TEMP_STORAGE_SUFFIX: &str = "_temp.db";
pub(crate) const TEMP_INDEX_SUFFIX: &str = "_temp_index.db";

/// In-memory index, guarded by the action lock.
#[derive(Debug, Default)]
struct IndexState {
    slots: HashMap<i32, Slot>,
    max_id: i32,
    closed: bool,
}

/// Open file handles, guarded by the file lock.
#[derive(Debug)]
struct Files {
    storage: AppendFile,
    index: AppendFile,
}

impl Files {
    fn open(location: &Location) -> CoreResult<Self> {
        Ok(Self {
            storage: AppendFile::open(&location.file(STORAGE_SUFFIX))?,
            index: AppendFile::open(&location.file(INDEX_SUFFIX))?,
        })
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.storage.sync()?;
        self.index.sync()?;
        Ok(())
    }
}

/// A disk-resident collection addressed by record id.
///
/// All methods take `&self`; the database can be shared between threads
/// behind an `Arc`.
///
/// ```rust
/// use docket_core::{Database, IdAccessor, Identity, JsonCodec};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Page {
///     id: i32,
///     body: String,
/// }
///
/// impl Identity for Page {
///     fn id(&self) -> i32 { self.id }
///     fn set_id(&mut self, id: i32) { self.id = id; }
/// }
///
/// let dir = tempfile::tempdir().unwrap();
/// let pages = Database::open(dir.path(), "pages", JsonCodec, Some(IdAccessor::identity())).unwrap();
///
/// let ids = pages
///     .add_range([
///         Page { id: 0, body: "a".into() },
///         Page { id: 0, body: "b".into() },
///     ])
///     .unwrap();
/// assert_eq!(ids, vec![1, 2]);
///
/// pages.remove_id(1).unwrap();
/// assert!(!pages.contains(1).unwrap());
/// assert_eq!(pages.get(2).unwrap().unwrap().body, "b");
/// ```
pub struct Database<T, C> {
    location: Location,
    codec: C,
    accessor: Option<IdAccessor<T>>,
    state: Mutex<IndexState>,
    files: Mutex<Option<Files>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> Database<T, C>
where
    T: Serialize + DeserializeOwned,
    C: Codec,
{
    /// Opens or creates the database `name` under `base_path`.
    ///
    /// Pass `None` as the accessor for record types without an id; such
    /// records get internal keys and can only be added, counted and
    /// iterated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a blank path or name, `Corrupted` if the
    /// index log holds an unknown entry or points past the storage file,
    /// or an I/O error.
    pub fn open(
        base_path: impl AsRef<Path>,
        name: impl Into<String>,
        codec: C,
        accessor: Option<IdAccessor<T>>,
    ) -> CoreResult<Self> {
        let location = Location::new(base_path, name)?;
        location.ensure_dir()?;

        recover_compaction(&location)?;
        let (state, files) = replay(&location)?;

        Ok(Self {
            location,
            codec,
            accessor,
            state: Mutex::new(state),
            files: Mutex::new(Some(files)),
            _marker: PhantomData,
        })
    }

    /// Returns where the database lives.
    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    fn accessor(&self, operation: &'static str) -> CoreResult<&IdAccessor<T>> {
        self.accessor
            .as_ref()
            .ok_or_else(|| CoreError::missing_identity(operation))
    }

    fn ensure_open(&self, state: &IndexState) -> CoreResult<()> {
        if state.closed {
            return Err(CoreError::closed(self.location.name()));
        }
        Ok(())
    }

    /// Adds a record and returns its id.
    ///
    /// # Errors
    ///
    /// See [`add_range`](Self::add_range).
    pub fn add(&self, record: T) -> CoreResult<i32> {
        let ids = self.add_range([record])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| CoreError::invalid_config("empty insert batch"))
    }

    /// Adds several records and returns their ids, in order.
    ///
    /// Zero ids are replaced with the next free id. Nothing is written
    /// unless every record in the batch is valid.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId` if an explicit id is already present or
    /// repeated within the batch, `PayloadSize` if a record encodes to an
    /// empty or oversized payload, `StorageFull` if the storage file has
    /// outgrown 32-bit offsets, or an I/O or codec error.
    pub fn add_range(&self, records: impl IntoIterator<Item = T>) -> CoreResult<Vec<i32>> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        self.write_batch(&mut state, &[], records.into_iter().collect())
    }

    /// Replaces the record with the same id as `record`.
    ///
    /// The old entry is unbound and the new payload appended. A record
    /// whose id is zero or not present is simply added.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id, or any
    /// error [`add_range`](Self::add_range) can return.
    pub fn replace(&self, record: T) -> CoreResult<i32> {
        let ids = self.replace_range([record])?;
        ids.into_iter()
            .next()
            .ok_or_else(|| CoreError::invalid_config("empty replace batch"))
    }

    /// Replaces several records in one write.
    ///
    /// # Errors
    ///
    /// See [`replace`](Self::replace).
    pub fn replace_range(&self, records: impl IntoIterator<Item = T>) -> CoreResult<Vec<i32>> {
        let accessor = self.accessor("replace a record")?;
        let records: Vec<T> = records.into_iter().collect();

        let mut state = self.state.lock();
        self.ensure_open(&state)?;

        let mut replaced = Vec::new();
        for record in &records {
            let id = accessor.get(record);
            if id != 0 && state.slots.contains_key(&id) && !replaced.contains(&id) {
                replaced.push(id);
            }
        }
        self.write_batch(&mut state, &replaced, records)
    }

    /// Alias for [`replace`](Self::replace).
    ///
    /// # Errors
    ///
    /// See [`replace`](Self::replace).
    pub fn update(&self, record: T) -> CoreResult<i32> {
        self.replace(record)
    }

    /// Removes the record with the same id as `record`.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id, or an I/O
    /// error.
    pub fn remove(&self, record: &T) -> CoreResult<bool> {
        let id = self.accessor("remove a record")?.get(record);
        Ok(self.remove_ids([id])? == 1)
    }

    /// Removes every record with the same id as one of `records`.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove).
    pub fn remove_range<'a>(&self, records: impl IntoIterator<Item = &'a T>) -> CoreResult<usize>
    where
        T: 'a,
    {
        let accessor = self.accessor("remove a record")?;
        let ids: Vec<i32> = records.into_iter().map(|r| accessor.get(r)).collect();
        self.remove_ids(ids)
    }

    /// Removes the record with `id`. Returns whether it was present.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove).
    pub fn remove_id(&self, id: i32) -> CoreResult<bool> {
        Ok(self.remove_ids([id])? == 1)
    }

    /// Removes the records with the given ids. Absent ids are skipped.
    /// Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// See [`remove`](Self::remove).
    pub fn remove_ids(&self, ids: impl IntoIterator<Item = i32>) -> CoreResult<usize> {
        self.accessor("remove by id")?;
        let mut state = self.state.lock();
        self.ensure_open(&state)?;

        let mut present = Vec::new();
        for id in ids {
            if state.slots.contains_key(&id) && !present.contains(&id) {
                present.push(id);
            }
        }
        if present.is_empty() {
            return Ok(0);
        }

        let mut buf = Vec::with_capacity(present.len() * index::DELETE_LEN);
        for id in &present {
            IndexEntry::Delete { id: *id }.encode_into(&mut buf);
        }

        let mut files = self.files.lock();
        let open = self.open_files(&mut files)?;
        if let Err(failure) = append_all(&mut open.index, &buf) {
            return Err(failure.settle(&mut files));
        }

        for id in &present {
            state.slots.remove(id);
        }
        Ok(present.len())
    }

    /// Returns true if a record with `id` is present.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id.
    pub fn contains(&self, id: i32) -> CoreResult<bool> {
        self.accessor("look up by id")?;
        Ok(self.state.lock().slots.contains_key(&id))
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Returns true if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the record with `id` from disk.
    ///
    /// # Errors
    ///
    /// Returns `MissingIdentity` if the record type has no id, or an I/O
    /// or codec error.
    pub fn get(&self, id: i32) -> CoreResult<Option<T>> {
        self.accessor("look up by id")?;
        let state = self.state.lock();
        self.ensure_open(&state)?;
        let Some(slot) = state.slots.get(&id).copied() else {
            return Ok(None);
        };

        let mut files = self.files.lock();
        let files = self.open_files(&mut files)?;
        let payload = files
            .storage
            .read_at(u64::from(slot.offset), usize::from(slot.len))?;
        Ok(Some(self.codec.decode(&payload)?))
    }

    /// Iterates over a snapshot of the records, in storage order.
    ///
    /// # Errors
    ///
    /// Returns `Closed` after [`close`](Self::close), or an I/O error if
    /// the storage file cannot be opened.
    pub fn iter(&self) -> CoreResult<DatabaseIter<'_, T, C>> {
        let state = self.state.lock();
        self.ensure_open(&state)?;
        let slots: Vec<(i32, Slot)> = state.slots.iter().map(|(id, slot)| (*id, *slot)).collect();

        // Open while the index is locked so the handle matches the slots.
        let path = self.location.file(STORAGE_SUFFIX);
        let reader = if slots.is_empty() {
            None
        } else {
            Some(SlotReader::open(&path)?)
        };
        Ok(DatabaseIter::new(path, &self.codec, reader, slots))
    }

    /// Reads every record into a vector, in storage order.
    ///
    /// # Errors
    ///
    /// Returns the first read or decode error.
    pub fn to_vec(&self) -> CoreResult<Vec<T>> {
        self.iter()?.collect()
    }

    /// Rewrites storage and index with only the live records.
    ///
    /// # Errors
    ///
    /// Returns an error if the rewrite fails; the current files stay in
    /// place and the database remains usable. An error reopening the
    /// compacted files is also returned, but the index already describes
    /// them and the next call retries the open.
    pub fn optimize(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut files = self.files.lock();
        if let Some(open) = files.as_mut() {
            open.storage.flush()?;
            open.index.flush()?;
        }

        let mut slots: Vec<(i32, Slot)> = state.slots.iter().map(|(id, slot)| (*id, *slot)).collect();
        slots.sort_by_key(|(_, slot)| slot.offset);

        let temp_storage = self.location.file(TEMP_STORAGE_SUFFIX);
        let temp_index = self.location.file(TEMP_INDEX_SUFFIX);
        let rebuilt = match write_compacted(&self.location, &slots) {
            Ok(rebuilt) => rebuilt,
            Err(err) => {
                remove_if_exists(&temp_storage)?;
                remove_if_exists(&temp_index)?;
                return Err(err);
            }
        };

        *files = None;
        replace_file(&temp_storage, &self.location.file(STORAGE_SUFFIX))?;
        if let Err(err) = replace_file(&temp_index, &self.location.file(INDEX_SUFFIX)) {
            // The old index no longer matches the storage file. Reopening
            // finishes the swap from the temp index.
            state.closed = true;
            return Err(err.into());
        }

        // The files on disk are the compacted ones from here on.
        state.slots = rebuilt.slots;
        info!(
            database = %self.location,
            records = state.slots.len(),
            storage_bytes = rebuilt.storage_bytes,
            "optimized database"
        );

        // On failure the handles stay closed and the next call reopens them.
        *files = Some(Files::open(&self.location)?);
        Ok(())
    }

    /// Removes every record and deletes the database files. Id assignment
    /// restarts from 1.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be deleted.
    pub fn clear(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        self.ensure_open(&state)?;
        let mut files = self.files.lock();
        *files = None;

        for suffix in [STORAGE_SUFFIX, INDEX_SUFFIX, TEMP_STORAGE_SUFFIX, TEMP_INDEX_SUFFIX] {
            remove_if_exists(&self.location.file(suffix))?;
        }

        let removed = state.slots.len();
        state.slots.clear();
        state.max_id = 0;
        info!(database = %self.location, removed, "cleared database");
        Ok(())
    }

    /// Returns a point-in-time summary of the database.
    #[must_use]
    pub fn stats(&self) -> DatabaseStats {
        let state = self.state.lock();
        let files = self.files.lock();
        let (storage_bytes, index_bytes) = files
            .as_ref()
            .map_or((0, 0), |f| (f.storage.size(), f.index.size()));
        let live: u64 = state.slots.values().map(|slot| u64::from(slot.len)).sum();

        DatabaseStats {
            records: state.slots.len(),
            storage_bytes,
            index_bytes,
            dead_bytes: storage_bytes.saturating_sub(live),
            max_id: state.max_id,
        }
    }

    /// Syncs and releases the files. Later calls fail with `Closed`.
    /// Closing twice is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails; the database is closed
    /// anyway.
    pub fn close(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let synced = match self.files.lock().take() {
            Some(mut files) => files.sync(),
            None => Ok(()),
        };
        debug!(database = %self.location, "closed database");
        synced
    }

    fn open_files<'a>(&self, files: &'a mut Option<Files>) -> CoreResult<&'a mut Files> {
        if files.is_none() {
            *files = Some(Files::open(&self.location)?);
        }
        files
            .as_mut()
            .ok_or_else(|| CoreError::closed(self.location.name()))
    }

    /// Unbinds `removed`, then appends `records`, as one index write.
    fn write_batch(
        &self,
        state: &mut IndexState,
        removed: &[i32],
        mut records: Vec<T>,
    ) -> CoreResult<Vec<i32>> {
        if records.is_empty() && removed.is_empty() {
            return Ok(Vec::new());
        }

        // Assign and validate ids before anything is written.
        let mut next = state.max_id;
        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(records.len());
        for record in &mut records {
            let explicit = self.accessor.as_ref().map_or(0, |a| a.get(record));
            let id = if explicit == 0 {
                next = next
                    .checked_add(1)
                    .ok_or_else(|| CoreError::invalid_config("id space exhausted"))?;
                if let Some(accessor) = &self.accessor {
                    accessor.set(record, next);
                }
                next
            } else {
                if state.slots.contains_key(&explicit) && !removed.contains(&explicit) {
                    return Err(CoreError::DuplicateId { id: explicit });
                }
                next = next.max(explicit);
                explicit
            };
            if !seen.insert(id) {
                return Err(CoreError::DuplicateId { id });
            }
            ids.push(id);
        }

        let payloads = records
            .iter()
            .map(|record| {
                let payload = self.codec.encode(record)?;
                if payload.is_empty() || payload.len() > MAX_PAYLOAD {
                    return Err(CoreError::PayloadSize {
                        len: payload.len(),
                        max: MAX_PAYLOAD,
                    });
                }
                Ok(payload)
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let mut files = self.files.lock();
        let open = self.open_files(&mut files)?;

        let mut data = Vec::new();
        let mut entries = Vec::with_capacity(removed.len() * index::DELETE_LEN + ids.len() * index::INSERT_LEN);
        let mut slots = Vec::with_capacity(ids.len());
        for id in removed {
            IndexEntry::Delete { id: *id }.encode_into(&mut entries);
        }
        for (id, payload) in ids.iter().zip(&payloads) {
            let offset = open.storage.size() + data.len() as u64;
            let offset = u32::try_from(offset).map_err(|_| CoreError::StorageFull {
                path: open.storage.path().to_path_buf(),
            })?;
            let slot = Slot {
                offset,
                len: payload.len() as u16,
            };
            IndexEntry::Insert { id: *id, slot }.encode_into(&mut entries);
            data.extend_from_slice(payload);
            slots.push((*id, slot));
        }

        let storage_before = open.storage.size();
        if let Err(failure) = append_all(&mut open.storage, &data) {
            return Err(failure.settle(&mut files));
        }
        if let Err(mut failure) = append_all(&mut open.index, &entries) {
            if let Err(undo) = open.storage.truncate(storage_before) {
                error!(database = %self.location, error = %undo, "failed to roll back storage append");
                failure.rolled_back = false;
            }
            return Err(failure.settle(&mut files));
        }

        for id in removed {
            state.slots.remove(id);
        }
        for (id, slot) in slots {
            state.slots.insert(id, slot);
        }
        state.max_id = next;
        Ok(ids)
    }
}

/// A failed append and whether the file was cut back to its old size.
#[derive(Debug)]
struct AppendFailure {
    error: CoreError,
    rolled_back: bool,
}

impl AppendFailure {
    /// Drops the handles if a file may hold bytes its cached size does not
    /// account for; the next call reopens them and reads the real sizes.
    fn settle(self, files: &mut Option<Files>) -> CoreError {
        if !self.rolled_back {
            *files = None;
        }
        self.error
    }
}

/// Appends and flushes, cutting the file back if the write fails partway.
fn append_all(file: &mut AppendFile, bytes: &[u8]) -> Result<(), AppendFailure> {
    let before = file.size();
    let Err(err) = file.append(bytes).and_then(|_| file.flush()) else {
        return Ok(());
    };

    // A partial write may have reached the file.
    let rolled_back = match file.truncate(before) {
        Ok(()) => true,
        Err(undo) => {
            error!(path = %file.path().display(), error = %undo, "failed to roll back append");
            false
        }
    };
    Err(AppendFailure {
        error: err.into(),
        rolled_back,
    })
}

struct Rebuilt {
    slots: HashMap<i32, Slot>,
    storage_bytes: u64,
}

/// Writes the compacted temp files for `slots` (sorted by offset).
fn write_compacted(location: &Location, slots: &[(i32, Slot)]) -> CoreResult<Rebuilt> {
    let mut reader = SlotReader::open(&location.file(STORAGE_SUFFIX))?;
    let mut storage = BufWriter::new(File::create(location.file(TEMP_STORAGE_SUFFIX))?);
    let mut index = BufWriter::new(File::create(location.file(TEMP_INDEX_SUFFIX))?);

    let mut rebuilt = HashMap::with_capacity(slots.len());
    let mut offset = 0u64;
    let mut entry = Vec::with_capacity(index::INSERT_LEN);
    for (id, slot) in slots {
        let payload = reader.read(*slot)?;
        storage.write_all(&payload)?;

        let new_slot = Slot {
            // Compaction never grows the file, so offsets still fit.
            offset: u32::try_from(offset).map_err(|_| CoreError::StorageFull {
                path: location.file(STORAGE_SUFFIX),
            })?,
            len: slot.len,
        };
        entry.clear();
        IndexEntry::Insert {
            id: *id,
            slot: new_slot,
        }
        .encode_into(&mut entry);
        index.write_all(&entry)?;

        rebuilt.insert(*id, new_slot);
        offset += u64::from(slot.len);
    }

    storage.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    index.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    Ok(Rebuilt {
        slots: rebuilt,
        storage_bytes: offset,
    })
}

/// Finishes or discards a compaction interrupted by a crash.
fn recover_compaction(location: &Location) -> CoreResult<()> {
    let temp_storage = location.file(TEMP_STORAGE_SUFFIX);
    let temp_index = location.file(TEMP_INDEX_SUFFIX);

    match (temp_storage.exists(), temp_index.exists()) {
        (false, true) => {
            replace_file(&temp_index, &location.file(INDEX_SUFFIX))?;
            warn!(database = %location, "completed interrupted compaction");
        }
        (true, _) => {
            remove_if_exists(&temp_storage)?;
            remove_if_exists(&temp_index)?;
            warn!(database = %location, "discarded interrupted compaction");
        }
        (false, false) => {}
    }
    Ok(())
}

/// Replays the index log and opens both files for appending.
fn replay(location: &Location) -> CoreResult<(IndexState, Files)> {
    let storage_path = location.file(STORAGE_SUFFIX);
    let index_path = location.file(INDEX_SUFFIX);

    if storage_path.exists() != index_path.exists() {
        warn!(database = %location, "storage or index file missing, starting empty");
        remove_if_exists(&storage_path)?;
        remove_if_exists(&index_path)?;
    }

    let mut state = IndexState::default();
    let mut valid_len = 0;
    let mut entries = 0usize;

    match File::open(&index_path) {
        Ok(file) => {
            let storage_size = std::fs::metadata(&storage_path)?.len();
            let mut reader = IndexReader::new(BufReader::new(file));
            loop {
                match reader.next_entry()? {
                    IndexRead::Entry { offset, entry } => {
                        entries += 1;
                        match entry {
                            IndexEntry::Insert { id, slot } => {
                                if slot.end() > storage_size {
                                    return Err(CoreError::corrupted(
                                        &index_path,
                                        offset,
                                        format!("entry for id {id} points past end of storage"),
                                    ));
                                }
                                state.slots.insert(id, slot);
                                state.max_id = state.max_id.max(id);
                            }
                            IndexEntry::Delete { id } => {
                                state.slots.remove(&id);
                            }
                        }
                    }
                    IndexRead::End => break,
                    IndexRead::Torn { offset } => {
                        warn!(
                            path = %index_path.display(),
                            offset,
                            "index ends inside an entry, dropping incomplete tail"
                        );
                        break;
                    }
                    IndexRead::UnknownMarker { offset, marker } => {
                        return Err(CoreError::corrupted(
                            &index_path,
                            offset,
                            format!("unknown entry marker {marker}"),
                        ));
                    }
                }
            }
            valid_len = reader.offset();
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let mut files = Files::open(location)?;
    if files.index.size() > valid_len {
        files.index.truncate(valid_len)?;
    }

    debug!(
        database = %location,
        entries,
        records = state.slots.len(),
        "replayed index"
    );
    Ok((state, files))
}

impl<T, C> Drop for Database<T, C> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(mut files) = self.files.lock().take() {
            if let Err(err) = files.sync() {
                error!(database = %self.location, error = %err, "failed to close database");
            }
        }
    }
}

impl<T, C: Codec> std::fmt::Debug for Database<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("codec", &self.codec.name())
            .field("records", &self.state.lock().slots.len())
            .finish()
    }
}
