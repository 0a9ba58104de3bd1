use constellation_core::{CodecError, Status};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("{0} timeout exceeded")]
    Timeout(&'static str),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Address already in use: {0}")]
    AddressInUse(String),

    #[error("Registration error: {0}")]
    Registration(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single unary call on a client connection
#[derive(Error, Debug)]
pub enum CallError {
    /// The server closed the call with a status
    #[error("call closed with status {0}")]
    Status(Status),

    /// The call failed before any status was produced
    #[error("transport failure: {0}")]
    Transport(#[from] Error),
}
