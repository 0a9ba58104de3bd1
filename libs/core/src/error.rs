use thiserror::Error;

/// Failure raised by a message codec.
///
/// Codec failures are local and synchronous; nothing in the framework
/// retries them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Encode failure: {0}")]
    Encode(String),

    #[error("Decode failure: {0}")]
    Decode(String),
}

impl CodecError {
    pub fn encode(details: impl Into<String>) -> Self {
        Self::Encode(details.into())
    }

    pub fn decode(details: impl Into<String>) -> Self {
        Self::Decode(details.into())
    }
}
