use constellation_core::CodecError;

use crate::codec::{Codec, CodecResult};

/// Raw codec that passes bytes through untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, value: &Vec<u8>) -> CodecResult<Vec<u8>> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Plain UTF-8 text codec
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, value: &String) -> CodecResult<Vec<u8>> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| CodecError::decode(e.to_string()))
    }
}
