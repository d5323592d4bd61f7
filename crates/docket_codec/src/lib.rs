//! # Docket Codec
//!
//! Record serialization strategies for Docket.
//!
//! The storage engines never look inside a payload. They hand records to
//! a [`Codec`] and store whatever bytes come back, so the encoding can be
//! swapped without touching the on-disk framing.
//!
//! Two codecs ship with the crate:
//!
//! - [`JsonCodec`] - UTF-8 JSON via `serde_json`, easy to inspect
//! - [`CborCodec`] - compact binary CBOR via `ciborium`
//!
//! ## Usage
//!
//! ```
//! use docket_codec::{Codec, CborCodec, JsonCodec};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Note {
//!     id: i32,
//!     text: String,
//! }
//!
//! let note = Note { id: 7, text: "hello".into() };
//!
//! let json = JsonCodec.encode(&note).unwrap();
//! assert_eq!(json, br#"{"id":7,"text":"hello"}"#);
//!
//! let cbor = CborCodec.encode(&note).unwrap();
//! let back: Note = CborCodec.decode(&cbor).unwrap();
//! assert_eq!(back, note);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod json;

pub use cbor::CborCodec;
pub use error::{CodecError, CodecResult};
pub use json::JsonCodec;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

/// A serialization strategy for records.
///
/// Implementations must be deterministic for a given value and must
/// round-trip: `decode(encode(x)) == x`. A codec is shared between the
/// caller's threads and the background flush worker, hence the
/// `Send + Sync` bound.
pub trait Codec: Send + Sync + 'static {
    /// Short, human-readable codec name (used in log events).
    fn name(&self) -> &'static str;

    /// Encodes a value to bytes.
    fn encode<T>(&self, value: &T) -> CodecResult<Vec<u8>>
    where
        T: Serialize + ?Sized;

    /// Decodes a value from a byte slice.
    fn decode<T>(&self, bytes: &[u8]) -> CodecResult<T>
    where
        T: DeserializeOwned;

    /// Decodes a value by streaming from a reader.
    fn decode_from<T, R>(&self, reader: R) -> CodecResult<T>
    where
        T: DeserializeOwned,
        R: Read;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: i32,
        owner: String,
        tags: Vec<String>,
        balance: Option<i64>,
    }

    fn roundtrip<C: Codec>(codec: &C, value: &Account) -> Account {
        let bytes = codec.encode(value).unwrap();
        codec.decode(&bytes).unwrap()
    }

    #[test]
    fn codecs_agree_on_content() {
        let account = Account {
            id: 3,
            owner: "dana".into(),
            tags: vec!["vip".into()],
            balance: None,
        };

        assert_eq!(roundtrip(&JsonCodec, &account), account);
        assert_eq!(roundtrip(&CborCodec, &account), account);
    }

    #[test]
    fn cbor_is_more_compact_than_json() {
        let account = Account {
            id: 123_456,
            owner: "someone".into(),
            tags: vec!["a".into(), "b".into(), "c".into()],
            balance: Some(-42),
        };

        let json = JsonCodec.encode(&account).unwrap();
        let cbor = CborCodec.encode(&account).unwrap();
        assert!(cbor.len() < json.len());
    }

    proptest! {
        #[test]
        fn any_account_survives_both_codecs(
            id in any::<i32>(),
            owner in ".{0,40}",
            tags in proptest::collection::vec("[a-z]{1,8}", 0..5),
            balance in proptest::option::of(any::<i64>()),
        ) {
            let account = Account { id, owner, tags, balance };
            prop_assert_eq!(roundtrip(&JsonCodec, &account), account.clone());
            prop_assert_eq!(roundtrip(&CborCodec, &account), account);
        }
    }
}
