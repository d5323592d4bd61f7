//! Append-log framing.
//!
//! A `.collection` log is a sequence of frames with no file header:
//!
//! ```text
//! insert:  [len: u16 LE, 1..=65535][payload: len bytes]
//! delete:  [0: u16][target sequence: u32 LE]
//! ```
//!
//! A zero length marks a tombstone, which is why payloads may never be
//! empty. Every frame, insert or delete, consumes one sequence number in
//! file order, starting at zero.

use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use docket_storage::{read_full, ReadOutcome, StorageResult};
use std::io::Read;

/// Largest payload an insert frame can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const LEN_SIZE: usize = 2;
const SEQ_SIZE: usize = 4;

/// A decoded log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A record payload.
    Insert(Vec<u8>),
    /// A tombstone cancelling the insert with this sequence number.
    Delete(SequenceNumber),
}

impl Frame {
    /// Encoded size of this frame in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Insert(payload) => LEN_SIZE + payload.len(),
            Self::Delete(_) => LEN_SIZE + SEQ_SIZE,
        }
    }
}

/// Checks that a payload fits an insert frame.
///
/// # Errors
///
/// Returns `PayloadSize` for empty payloads or payloads over
/// [`MAX_PAYLOAD`] bytes.
pub fn check_payload(payload: &[u8]) -> CoreResult<()> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(CoreError::PayloadSize {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    Ok(())
}

/// Appends an insert frame to `buf`.
///
/// # Errors
///
/// Returns `PayloadSize` if the payload does not fit.
pub fn write_insert(buf: &mut Vec<u8>, payload: &[u8]) -> CoreResult<()> {
    check_payload(payload)?;
    let len = payload.len() as u16;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Appends a delete frame to `buf`.
pub fn write_delete(buf: &mut Vec<u8>, target: SequenceNumber) {
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&target.as_u32().to_le_bytes());
}

/// Result of reading one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameRead {
    /// A complete frame starting at `offset`.
    Frame {
        /// Byte offset of the frame header.
        offset: u64,
        /// The frame.
        frame: Frame,
    },
    /// Clean end of log at a frame boundary.
    End,
    /// The log ends inside the frame starting at `offset`.
    Torn {
        /// Byte offset of the incomplete frame.
        offset: u64,
    },
}

/// Sequential frame reader.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a reader positioned at the start of a log.
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Offset just past the last complete frame.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next frame.
    ///
    /// After `End` or `Torn` the reader should not be used again.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures; short reads are reported
    /// as `End` or `Torn`.
    pub fn next_frame(&mut self) -> StorageResult<FrameRead> {
        let start = self.offset;

        let mut header = [0u8; LEN_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            ReadOutcome::Complete => {}
            ReadOutcome::Eof => return Ok(FrameRead::End),
            ReadOutcome::Truncated { .. } => return Ok(FrameRead::Torn { offset: start }),
        }

        let len = usize::from(u16::from_le_bytes(header));
        let frame = if len == 0 {
            let mut target = [0u8; SEQ_SIZE];
            if read_full(&mut self.reader, &mut target)? != ReadOutcome::Complete {
                return Ok(FrameRead::Torn { offset: start });
            }
            Frame::Delete(SequenceNumber::new(u32::from_le_bytes(target)))
        } else {
            let mut payload = vec![0u8; len];
            if read_full(&mut self.reader, &mut payload)? != ReadOutcome::Complete {
                return Ok(FrameRead::Torn { offset: start });
            }
            Frame::Insert(payload)
        };

        self.offset += frame.encoded_len() as u64;
        Ok(FrameRead::Frame {
            offset: start,
            frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn read_all(bytes: &[u8]) -> (Vec<Frame>, FrameRead) {
        let mut reader = FrameReader::new(Cursor::new(bytes));
        let mut frames = Vec::new();
        loop {
            match reader.next_frame().unwrap() {
                FrameRead::Frame { frame, .. } => frames.push(frame),
                end => return (frames, end),
            }
        }
    }

    #[test]
    fn insert_layout() {
        let mut buf = Vec::new();
        write_insert(&mut buf, b"abc").unwrap();
        assert_eq!(buf, vec![3, 0, b'a', b'b', b'c']);
    }

    #[test]
    fn delete_layout() {
        let mut buf = Vec::new();
        write_delete(&mut buf, SequenceNumber::new(0x0102_0304));
        assert_eq!(buf, vec![0, 0, 4, 3, 2, 1]);
    }

    #[test]
    fn payload_bounds() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_insert(&mut buf, b""),
            Err(CoreError::PayloadSize { len: 0, .. })
        ));
        assert!(write_insert(&mut buf, &vec![1u8; MAX_PAYLOAD]).is_ok());
        assert!(matches!(
            write_insert(&mut buf, &vec![1u8; MAX_PAYLOAD + 1]),
            Err(CoreError::PayloadSize { .. })
        ));
    }

    #[test]
    fn reads_mixed_frames() {
        let mut buf = Vec::new();
        write_insert(&mut buf, b"one").unwrap();
        write_delete(&mut buf, SequenceNumber::new(0));
        write_insert(&mut buf, b"two").unwrap();

        let (frames, end) = read_all(&buf);
        assert_eq!(
            frames,
            vec![
                Frame::Insert(b"one".to_vec()),
                Frame::Delete(SequenceNumber::new(0)),
                Frame::Insert(b"two".to_vec()),
            ]
        );
        assert_eq!(end, FrameRead::End);
    }

    #[test]
    fn torn_payload_reports_frame_start() {
        let mut buf = Vec::new();
        write_insert(&mut buf, b"whole").unwrap();
        let boundary = buf.len() as u64;
        write_insert(&mut buf, b"partial").unwrap();
        buf.truncate(buf.len() - 2);

        let (frames, end) = read_all(&buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(end, FrameRead::Torn { offset: boundary });
    }

    #[test]
    fn torn_header_and_tombstone() {
        let (frames, end) = read_all(&[5]);
        assert!(frames.is_empty());
        assert_eq!(end, FrameRead::Torn { offset: 0 });

        let (_, end) = read_all(&[0, 0, 1, 2]);
        assert_eq!(end, FrameRead::Torn { offset: 0 });
    }

    #[test]
    fn offset_tracks_complete_frames() {
        let mut buf = Vec::new();
        write_insert(&mut buf, b"ab").unwrap();
        write_delete(&mut buf, SequenceNumber::new(0));

        let mut reader = FrameReader::new(Cursor::new(&buf));
        reader.next_frame().unwrap();
        assert_eq!(reader.offset(), 4);
        reader.next_frame().unwrap();
        assert_eq!(reader.offset(), 10);
    }

    proptest! {
        #[test]
        fn frames_survive_reading(
            frames in prop::collection::vec(
                prop_oneof![
                    prop::collection::vec(any::<u8>(), 1..64).prop_map(Frame::Insert),
                    any::<u32>().prop_map(|s| Frame::Delete(SequenceNumber::new(s))),
                ],
                0..32,
            )
        ) {
            let mut buf = Vec::new();
            for frame in &frames {
                match frame {
                    Frame::Insert(payload) => write_insert(&mut buf, payload).unwrap(),
                    Frame::Delete(seq) => write_delete(&mut buf, *seq),
                }
            }

            let (read, end) = read_all(&buf);
            prop_assert_eq!(read, frames);
            prop_assert_eq!(end, FrameRead::End);
        }
    }
}
