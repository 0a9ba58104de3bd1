use constellation_core::Status;
use thiserror::Error;

/// Failure to bring a server up or down
#[derive(Error, Debug)]
pub enum ServerError {
    /// Nothing was left bound
    #[error("Server startup failed: {0}")]
    StartupFailure(String),

    #[error("Server shutdown failed: {0}")]
    ShutdownFailure(String),
}

/// Failure to open a client channel
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection to {address} failed: {cause}")]
    ConnectionFailed { address: String, cause: String },
}

/// Outcome of a failed client call
///
/// `RemoteError` carries a domain error decoded from the status the server
/// closed the call with. A status that does not decode into `E` is a
/// `TransportError`, and failures that never produced a status at all are
/// `CallFailure`.
#[derive(Error, Debug)]
pub enum ClientError<E> {
    #[error("Remote error: {0:?}")]
    RemoteError(E),

    #[error("Transport error: {0}")]
    TransportError(Status),

    #[error("Call failed: {0}")]
    CallFailure(String),
}

impl<E> ClientError<E> {
    /// The domain error, if the server sent one
    pub fn remote(&self) -> Option<&E> {
        match self {
            ClientError::RemoteError(error) => Some(error),
            _ => None,
        }
    }

    /// The raw status, if the call ended with one that is not a domain error
    pub fn status(&self) -> Option<&Status> {
        match self {
            ClientError::TransportError(status) => Some(status),
            _ => None,
        }
    }
}

/// Descriptor set that cannot be served
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Streaming methods are not supported: {}", .methods.join(", "))]
    StreamingNotSupported { methods: Vec<String> },

    #[error("Malformed descriptor: {0}")]
    Malformed(String),
}
