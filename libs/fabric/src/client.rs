//! Client half of the call protocol.
//!
//! A [`ClientConnection`] multiplexes any number of concurrent unary calls
//! over one transport. A driver task owns the table of pending calls so no
//! locking is needed; handles talk to it over a channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use constellation_core::{Metadata, Status};

use crate::config::TransportConfig;
use crate::error::{CallError, Error, Result};
use crate::transport::{self, Address, Transport};
use crate::wire::{decode_frame, encode_frame, encode_within, CallId, Frame};

const INBOUND_BUFFER: usize = 64;

/// A successful unary exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryResponse {
    pub headers: Metadata,
    pub payload: Vec<u8>,
    pub trailers: Metadata,
}

type CallOutcome = std::result::Result<UnaryResponse, CallError>;

enum Command {
    Start {
        call_id: CallId,
        method: String,
        metadata: Metadata,
        payload: Vec<u8>,
        reply: oneshot::Sender<CallOutcome>,
    },
    Cancel {
        call_id: CallId,
    },
    Shutdown,
}

/// Cloneable handle to one client connection
#[derive(Clone)]
pub struct ClientConnection {
    address: Address,
    commands: mpsc::UnboundedSender<Command>,
    next_call_id: Arc<AtomicU64>,
}

impl ClientConnection {
    /// Dial `address` and start the connection driver
    pub async fn connect(address: &Address, config: &TransportConfig) -> Result<Self> {
        let transport = transport::connect(address, config).await?;
        debug!(%address, "Connected");
        Ok(Self::from_transport(address.clone(), transport))
    }

    /// Run the call protocol over an already established transport
    pub fn from_transport(address: Address, transport: Transport) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        tokio::spawn(drive(transport, receiver));
        Self {
            address,
            commands,
            next_call_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Whether the driver is still accepting calls
    pub fn is_open(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Perform one unary call
    ///
    /// Dropping the returned future before it resolves cancels the call on
    /// the server.
    pub async fn unary(
        &self,
        method: &str,
        metadata: Metadata,
        payload: Vec<u8>,
    ) -> std::result::Result<UnaryResponse, CallError> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (reply, outcome) = oneshot::channel();

        self.commands
            .send(Command::Start {
                call_id,
                method: method.to_string(),
                metadata,
                payload,
                reply,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        let mut guard = CancelOnDrop {
            call_id,
            commands: &self.commands,
            armed: true,
        };
        let outcome = outcome.await;
        guard.armed = false;

        outcome.unwrap_or(Err(CallError::Transport(Error::ConnectionClosed)))
    }

    /// Stop the driver; pending calls fail with `ConnectionClosed`
    ///
    /// Closing an already closed connection does nothing.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct CancelOnDrop<'a> {
    call_id: CallId,
    commands: &'a mpsc::UnboundedSender<Command>,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Cancel {
                call_id: self.call_id,
            });
        }
    }
}

#[derive(Default)]
struct Pending {
    headers: Metadata,
    payload: Option<Vec<u8>>,
    extra_messages: bool,
}

struct PendingCall {
    reply: oneshot::Sender<CallOutcome>,
    state: Pending,
}

async fn drive(transport: Transport, mut commands: mpsc::UnboundedReceiver<Command>) {
    let max_frame_size = transport.max_frame_size();
    let (mut reader, mut writer) = transport.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Result<Frame>>(INBOUND_BUFFER);

    let mut writer_task = tokio::spawn(async move {
        while let Some(bytes) = frames_rx.recv().await {
            writer.write_frame(&bytes).await?;
        }
        writer.close().await
    });

    let reader_task = tokio::spawn(async move {
        loop {
            let next = match reader.read_frame().await {
                Ok(bytes) => decode_frame(&bytes),
                Err(e) => Err(e),
            };
            let failed = next.is_err();
            if inbound_tx.send(next).await.is_err() || failed {
                break;
            }
        }
    });

    let mut pending: HashMap<CallId, PendingCall> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Start { call_id, method, metadata, payload, reply }) => {
                    trace!(call_id, %method, "Starting call");
                    match encode_call(call_id, method, metadata, payload, max_frame_size) {
                        Ok(frames) => {
                            pending.insert(call_id, PendingCall { reply, state: Pending::default() });
                            for bytes in frames {
                                let _ = frames_tx.send(bytes);
                            }
                        }
                        Err(e) => {
                            debug!(call_id, error = %e, "Refusing call");
                            let _ = reply.send(Err(CallError::Transport(e)));
                        }
                    }
                }
                Some(Command::Cancel { call_id }) => {
                    if pending.remove(&call_id).is_some() {
                        debug!(call_id, "Cancelling call");
                        match encode_frame(&Frame::Cancel { call_id }) {
                            Ok(bytes) => {
                                let _ = frames_tx.send(bytes);
                            }
                            Err(e) => warn!(call_id, error = %e, "Dropping unencodable cancel"),
                        }
                    }
                }
                Some(Command::Shutdown) | None => break,
            },
            inbound = inbound_rx.recv() => match inbound {
                Some(Ok(frame)) => settle(frame, &mut pending),
                Some(Err(e)) => {
                    debug!(error = %e, "Connection lost");
                    break;
                }
                None => break,
            },
            written = &mut writer_task => {
                match written {
                    Ok(Err(e)) => debug!(error = %e, "Connection write failed"),
                    Err(e) => warn!(error = %e, "Connection writer stopped"),
                    Ok(Ok(())) => {}
                }
                break;
            }
        }
    }

    // Closes the command channel so later calls fail fast.
    drop(commands);
    reader_task.abort();
    drop(frames_tx);
    for (_, call) in pending.drain() {
        let _ = call.reply.send(Err(CallError::Transport(Error::ConnectionClosed)));
    }
}

/// Encode the three frames of a unary request
///
/// Fails when any of them would exceed `max_frame_size`, in which case nothing
/// has been written for the call.
fn encode_call(
    call_id: CallId,
    method: String,
    metadata: Metadata,
    payload: Vec<u8>,
    max_frame_size: usize,
) -> Result<[Vec<u8>; 3]> {
    Ok([
        encode_within(&Frame::Open { call_id, method, metadata }, max_frame_size)?,
        encode_within(&Frame::Message { call_id, payload }, max_frame_size)?,
        encode_within(&Frame::HalfClose { call_id }, max_frame_size)?,
    ])
}

fn settle(frame: Frame, pending: &mut HashMap<CallId, PendingCall>) {
    match frame {
        Frame::Headers { call_id, metadata } => {
            if let Some(call) = pending.get_mut(&call_id) {
                call.state.headers = metadata;
            }
        }
        Frame::Message { call_id, payload } => {
            if let Some(call) = pending.get_mut(&call_id) {
                if call.state.payload.is_some() {
                    call.state.extra_messages = true;
                } else {
                    call.state.payload = Some(payload);
                }
            }
        }
        Frame::Close {
            call_id,
            status,
            trailers,
        } => {
            let Some(call) = pending.remove(&call_id) else {
                trace!(call_id, "Close for unknown call");
                return;
            };
            trace!(call_id, code = %status.code(), "Call closed");
            let outcome = match (status.is_ok(), call.state) {
                (false, _) => Err(CallError::Status(status)),
                (true, Pending { extra_messages: true, .. }) => Err(CallError::Status(
                    Status::internal("server sent more than one response message"),
                )),
                (true, Pending { payload: None, .. }) => Err(CallError::Status(
                    Status::internal("server closed the call without a response message"),
                )),
                (
                    true,
                    Pending {
                        headers,
                        payload: Some(payload),
                        ..
                    },
                ) => Ok(UnaryResponse {
                    headers,
                    payload,
                    trailers,
                }),
            };
            let _ = call.reply.send(outcome);
        }
        Frame::Open { call_id, .. }
        | Frame::HalfClose { call_id }
        | Frame::Cancel { call_id } => {
            warn!(call_id, "Ignoring client-only frame sent by server");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_request_is_refused_before_any_frame() {
        let err = encode_call(1, "pkg.A/M".into(), Metadata::new(), vec![0u8; 4096], 1024).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 4116, max: 1024 }));

        let frames = encode_call(2, "pkg.A/M".into(), Metadata::new(), vec![0u8; 4], 1024).unwrap();
        assert!(matches!(decode_frame(&frames[0]), Ok(Frame::Open { call_id: 2, .. })));
        assert!(matches!(decode_frame(&frames[1]), Ok(Frame::Message { payload, .. }) if payload.len() == 4));
        assert!(matches!(decode_frame(&frames[2]), Ok(Frame::HalfClose { call_id: 2 })));
    }
}
