//! Constellation Core - Shared vocabulary types
//!
//! Leaf types used by both the transport fabric and the typed RPC layer:
//! call metadata, wire status codes and codec failures.

pub mod error;
pub mod metadata;
pub mod status;

pub use error::CodecError;
pub use metadata::Metadata;
pub use status::{Code, Status};
