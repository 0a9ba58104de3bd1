use constellation_core::CodecError;

pub mod bincode;
pub mod json;
pub mod raw;

pub use self::bincode::BincodeCodec;
pub use self::json::JsonCodec;
pub use self::raw::{RawCodec, Utf8Codec};

pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Converts one message type to and from its wire bytes
///
/// Implementations are pure: no I/O, no shared mutable state, and failures
/// surface only as [`CodecError::Encode`] or [`CodecError::Decode`]. For any
/// value that encodes successfully, decoding the bytes yields the value back.
pub trait Codec<A>: Send + Sync {
    fn encode(&self, value: &A) -> CodecResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> CodecResult<A>;
}
