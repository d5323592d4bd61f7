//! JSON codec.

use crate::error::{CodecError, CodecResult};
use crate::Codec;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;

const NAME: &str = "json";

/// Compact UTF-8 JSON, one document per record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        NAME
    }

    fn encode<T>(&self, value: &T) -> CodecResult<Vec<u8>>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(NAME, e.to_string()))
    }

    fn decode<T>(&self, bytes: &[u8]) -> CodecResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(NAME, e.to_string()))
    }

    fn decode_from<T, R>(&self, reader: R) -> CodecResult<T>
    where
        T: DeserializeOwned,
        R: Read,
    {
        serde_json::from_reader(reader)
            .map_err(|e| CodecError::decoding_failed(NAME, e.to_string()))
    }
}
