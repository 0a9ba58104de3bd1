use serde::de::DeserializeOwned;
use serde::Serialize;

use constellation_core::CodecError;

use crate::codec::{Codec, CodecResult};

/// Bincode codec for binary serialization
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl<A: Serialize + DeserializeOwned> Codec<A> for BincodeCodec {
    fn encode(&self, value: &A) -> CodecResult<Vec<u8>> {
        bincode::serialize(value).map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<A> {
        bincode::deserialize(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }
}
