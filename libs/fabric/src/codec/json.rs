use serde::de::DeserializeOwned;
use serde::Serialize;

use constellation_core::CodecError;

use crate::codec::{Codec, CodecResult};

/// JSON codec, useful when the payload should stay human-readable
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<A: Serialize + DeserializeOwned> Codec<A> for JsonCodec {
    fn encode(&self, value: &A) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<A> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }
}
