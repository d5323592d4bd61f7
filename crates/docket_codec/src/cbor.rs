//! CBOR codec.

use crate::error::{CodecError, CodecResult};
use crate::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

const NAME: &str = "cbor";

/// Compact binary CBOR (RFC 8949) via `ciborium`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode<T>(&self, value: &T) -> CodecResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(value, &mut buf)
            .map_err(|e| CodecError::encoding_failed(NAME, e.to_string()))?;
        Ok(buf)
    }

    fn decode<T>(&self, bytes: &[u8]) -> CodecResult<T>
    where
        T: DeserializeOwned,
    {
        ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::decoding_failed(NAME, e.to_string()))
    }

    fn decode_from<T, R>(&self, reader: R) -> CodecResult<T>
    where
        T: DeserializeOwned,
        R: Read,
    {
        ciborium::de::from_reader(reader)
            .map_err(|e| CodecError::decoding_failed(NAME, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_take_one_byte() {
        assert_eq!(CborCodec.encode(&7u8).unwrap(), vec![0x07]);
    }

    #[test]
    fn truncated_input_fails() {
        let bytes = CborCodec.encode(&"a longer string").unwrap();
        let result: CodecResult<String> = CborCodec.decode(&bytes[..bytes.len() - 3]);
        assert!(matches!(
            result,
            Err(CodecError::DecodingFailed { codec: "cbor", .. })
        ));
    }

    #[test]
    fn decodes_sequence_from_reader() {
        let bytes = CborCodec.encode(&[10, 20, 30]).unwrap();
        let values: Vec<u32> = CborCodec.decode_from(bytes.as_slice()).unwrap();
        assert_eq!(values, vec![10, 20, 30]);
    }
}
