//! Sequential reads from the storage file.

use super::index::Slot;
use crate::error::{CoreError, CoreResult};
use docket_codec::Codec;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Reads payloads in offset order through one buffered handle.
///
/// The reader only seeks when the next slot does not start where the
/// previous one ended, so a freshly compacted file is read as one stream.
pub(crate) struct SlotReader {
    reader: BufReader<File>,
    position: u64,
}

impl SlotReader {
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            position: 0,
        })
    }

    pub(crate) fn read(&mut self, slot: Slot) -> io::Result<Vec<u8>> {
        let offset = u64::from(slot.offset);
        if offset != self.position {
            self.reader.seek(SeekFrom::Start(offset))?;
        }

        let mut payload = vec![0u8; usize::from(slot.len)];
        self.reader.read_exact(&mut payload)?;
        self.position = slot.end();
        Ok(payload)
    }
}

/// Iterator over the records of a [`Database`](crate::Database), in
/// storage order.
///
/// The set of records is fixed when the iterator is created; later
/// writes are not observed. The storage file is opened up front, so a
/// later [`optimize`](crate::Database::optimize) or
/// [`clear`](crate::Database::clear) does not disturb the reads.
/// Iteration stops after the first error.
pub struct DatabaseIter<'a, T, C> {
    path: PathBuf,
    codec: &'a C,
    slots: std::vec::IntoIter<(i32, Slot)>,
    reader: Option<SlotReader>,
    failed: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T, C> DatabaseIter<'a, T, C>
where
    T: DeserializeOwned,
    C: Codec,
{
    /// `reader` may be `None` only when `slots` is empty.
    pub(crate) fn new(
        path: PathBuf,
        codec: &'a C,
        reader: Option<SlotReader>,
        mut slots: Vec<(i32, Slot)>,
    ) -> Self {
        slots.sort_by_key(|(_, slot)| slot.offset);
        Self {
            path,
            codec,
            slots: slots.into_iter(),
            reader,
            failed: false,
            _marker: PhantomData,
        }
    }

    fn read(&mut self, slot: Slot) -> CoreResult<T> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CoreError::corrupted(&self.path, 0, "storage file unavailable"))?;

        let payload = reader.read(slot).map_err(|e| {
            CoreError::corrupted(&self.path, u64::from(slot.offset), e.to_string())
        })?;
        Ok(self.codec.decode(&payload)?)
    }
}

impl<T, C> Iterator for DatabaseIter<'_, T, C>
where
    T: DeserializeOwned,
    C: Codec,
{
    type Item = CoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let (_, slot) = self.slots.next()?;
        let result = self.read(slot);
        self.failed = result.is_err();
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            (0, Some(0))
        } else {
            (0, Some(self.slots.len()))
        }
    }
}

impl<T, C> std::iter::FusedIterator for DatabaseIter<'_, T, C>
where
    T: DeserializeOwned,
    C: Codec,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_contiguous_and_scattered_slots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        std::fs::write(&path, b"aaabbbbcc").unwrap();

        let mut reader = SlotReader::open(&path).unwrap();
        assert_eq!(reader.read(Slot { offset: 0, len: 3 }).unwrap(), b"aaa");
        assert_eq!(reader.read(Slot { offset: 3, len: 4 }).unwrap(), b"bbbb");
        assert_eq!(reader.read(Slot { offset: 7, len: 2 }).unwrap(), b"cc");
        assert_eq!(reader.read(Slot { offset: 0, len: 1 }).unwrap(), b"a");
    }

    #[test]
    fn short_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        std::fs::write(&path, b"abc").unwrap();

        let mut reader = SlotReader::open(&path).unwrap();
        assert!(reader.read(Slot { offset: 2, len: 5 }).is_err());
    }
}
