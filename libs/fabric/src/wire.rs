//! Call framing on top of a [`Transport`](crate::transport::Transport).
//!
//! Every frame names the connection-local call it belongs to, so any number
//! of unary calls can be in flight on one connection. A call on the wire
//! always looks like:
//!
//! ```text
//! client: Open -> Message -> HalfClose        (Cancel at any point)
//! server: Headers -> Message -> Close          (or just Close)
//! ```

use serde::{Deserialize, Serialize};

use constellation_core::{Metadata, Status};

use crate::error::{Error, Result};

pub type CallId = u64;

/// Encoded size of a `Message` frame on top of its payload
pub(crate) const MESSAGE_OVERHEAD: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Client starts a call on `method` with request headers
    Open {
        call_id: CallId,
        method: String,
        metadata: Metadata,
    },
    /// One message in either direction
    Message { call_id: CallId, payload: Vec<u8> },
    /// Client has sent everything it will send
    HalfClose { call_id: CallId },
    /// Client abandons the call
    Cancel { call_id: CallId },
    /// Server response headers
    Headers { call_id: CallId, metadata: Metadata },
    /// Server terminal status; nothing follows for this call
    Close {
        call_id: CallId,
        status: Status,
        trailers: Metadata,
    },
}

impl Frame {
    pub fn call_id(&self) -> CallId {
        match self {
            Frame::Open { call_id, .. }
            | Frame::Message { call_id, .. }
            | Frame::HalfClose { call_id }
            | Frame::Cancel { call_id }
            | Frame::Headers { call_id, .. }
            | Frame::Close { call_id, .. } => *call_id,
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>> {
    bincode::serialize(frame).map_err(|e| Error::InvalidFrame(e.to_string()))
}

/// Encode `frame`, refusing results larger than `max` bytes
pub(crate) fn encode_within(frame: &Frame, max: usize) -> Result<Vec<u8>> {
    let bytes = encode_frame(frame)?;
    if bytes.len() > max {
        return Err(Error::FrameTooLarge {
            size: bytes.len(),
            max,
        });
    }
    Ok(bytes)
}

pub fn decode_frame(bytes: &[u8]) -> Result<Frame> {
    bincode::deserialize(bytes).map_err(|e| Error::InvalidFrame(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_frame_preserves_status() {
        let frame = Frame::Close {
            call_id: 7,
            status: Status::invalid_argument("bad"),
            trailers: Metadata::new().with_header("X-Reason", "validation"),
        };
        let decoded = decode_frame(&encode_frame(&frame).unwrap()).unwrap();

        assert_eq!(decoded, frame);
        assert_eq!(decoded.call_id(), 7);
    }

    #[test]
    fn message_overhead_matches_the_encoding() {
        let frame = Frame::Message {
            call_id: u64::MAX,
            payload: vec![0; 100],
        };
        assert_eq!(encode_frame(&frame).unwrap().len(), 100 + MESSAGE_OVERHEAD);
    }

    #[test]
    fn encode_within_enforces_the_limit() {
        let frame = Frame::Message {
            call_id: 1,
            payload: vec![0; 10],
        };
        assert!(encode_within(&frame, 10 + MESSAGE_OVERHEAD).is_ok());
        assert!(matches!(
            encode_within(&frame, 10 + MESSAGE_OVERHEAD - 1),
            Err(Error::FrameTooLarge { size: 30, max: 29 })
        ));
    }

    #[test]
    fn garbage_is_an_invalid_frame() {
        let result = decode_frame(&[0xff, 0xff, 0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(Error::InvalidFrame(_))));
    }
}
