//! Server half of the call protocol.
//!
//! The connection loop owns one [`CallListener`] per open call and feeds it
//! transport events in order. Listeners answer through the [`ServerCall`]
//! they were handed, which can be moved to any task.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use constellation_core::{Metadata, Status};

use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::wire::{decode_frame, encode_within, CallId, Frame, MESSAGE_OVERHEAD};

/// Inbound frames buffered between the reader task and the dispatch loop
const INBOUND_BUFFER: usize = 64;

/// Transport-owned handle for answering one call
///
/// Headers go out at most once and always before the first message.
/// [`close`](ServerCall::close) consumes the call, so nothing can be written
/// after the terminal status. A call dropped without being closed is closed
/// with `CANCELLED`.
pub struct ServerCall {
    call_id: CallId,
    method: String,
    frames: mpsc::UnboundedSender<Frame>,
    closed: Option<mpsc::UnboundedSender<CallId>>,
    max_frame_size: usize,
    headers_sent: bool,
    finished: bool,
}

impl ServerCall {
    fn new(
        call_id: CallId,
        method: String,
        frames: mpsc::UnboundedSender<Frame>,
        closed: Option<mpsc::UnboundedSender<CallId>>,
        max_frame_size: usize,
    ) -> Self {
        Self {
            call_id,
            method,
            frames,
            closed,
            max_frame_size,
            headers_sent: false,
            finished: false,
        }
    }

    /// A call whose output lands in the returned receiver instead of a connection
    ///
    /// Lets a [`CallListener`] be driven directly, without sockets.
    pub fn capture(
        call_id: CallId,
        method: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (frames, captured) = mpsc::unbounded_channel();
        let call = Self::new(call_id, method.into(), frames, None, DEFAULT_MAX_FRAME_SIZE);
        (call, captured)
    }

    /// Builder: replace the frame size limit of a captured call
    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    /// Full method name, `"<service>/<method>"`
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Send response headers; later calls are no-ops
    pub fn send_headers(&mut self, metadata: Metadata) {
        if self.headers_sent {
            return;
        }
        self.headers_sent = true;
        self.emit(Frame::Headers {
            call_id: self.call_id,
            metadata,
        });
    }

    /// Send one response message, sending empty headers first if needed
    ///
    /// A message that would not fit in one frame is refused and nothing is
    /// sent; the call stays open.
    pub fn send_message(&mut self, payload: Vec<u8>) -> Result<()> {
        let size = payload.len() + MESSAGE_OVERHEAD;
        if size > self.max_frame_size {
            return Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        self.send_headers(Metadata::new());
        self.emit(Frame::Message {
            call_id: self.call_id,
            payload,
        });
        Ok(())
    }

    /// Finish the call with `status`
    pub fn close(mut self, status: Status, trailers: Metadata) {
        self.finish(status, trailers);
    }

    fn finish(&mut self, status: Status, trailers: Metadata) {
        if self.finished {
            return;
        }
        self.finished = true;
        trace!(call_id = self.call_id, code = %status.code(), "Closing call");
        self.emit(Frame::Close {
            call_id: self.call_id,
            status,
            trailers,
        });
        if let Some(closed) = &self.closed {
            let _ = closed.send(self.call_id);
        }
    }

    // A send error means the connection is gone and there is nobody to tell.
    fn emit(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }
}

impl Drop for ServerCall {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(
                Status::cancelled("call dropped without a status"),
                Metadata::new(),
            );
        }
    }
}

impl fmt::Debug for ServerCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCall")
            .field("call_id", &self.call_id)
            .field("method", &self.method)
            .field("headers_sent", &self.headers_sent)
            .finish()
    }
}

/// Receives the client-side events of one call
///
/// Callbacks run on the connection task and must not block.
pub trait CallListener: Send {
    /// A request message arrived
    fn on_message(&mut self, payload: Vec<u8>);

    /// The client will send nothing more
    fn on_half_close(&mut self);

    /// The client cancelled, or the connection went away
    fn on_cancel(&mut self);
}

/// Starts calls for one registered method
pub trait CallHandler: Send + Sync {
    fn start_call(&self, call: ServerCall, metadata: Metadata) -> Box<dyn CallListener>;
}

/// Transport-level grouping of methods under one service name
pub struct ServiceDefinition {
    name: String,
    methods: Vec<(String, Arc<dyn CallHandler>)>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Register a handler under its full method name
    pub fn add_method(
        mut self,
        full_name: impl Into<String>,
        handler: Arc<dyn CallHandler>,
    ) -> Self {
        self.methods.push((full_name.into(), handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(|(name, _)| name.as_str())
    }
}

impl fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("name", &self.name)
            .field("methods", &self.method_names().collect::<Vec<_>>())
            .finish()
    }
}

/// Every service a server exposes, indexed by full method name
#[derive(Default)]
pub struct Registry {
    services: BTreeMap<String, Vec<String>>,
    methods: HashMap<String, Arc<dyn CallHandler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service definition
    ///
    /// Fails without modifying the registry when the service name or any of
    /// its method names is already registered.
    pub fn add_service(&mut self, definition: ServiceDefinition) -> Result<()> {
        if self.services.contains_key(&definition.name) {
            return Err(Error::Registration(format!(
                "service registered twice: {}",
                definition.name
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for (method, _) in &definition.methods {
            if self.methods.contains_key(method) || !seen.insert(method.as_str()) {
                return Err(Error::Registration(format!(
                    "method registered twice: {}",
                    method
                )));
            }
        }

        let names = definition
            .methods
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        self.methods.extend(definition.methods);
        self.services.insert(definition.name, names);
        Ok(())
    }

    pub fn lookup(&self, method: &str) -> Option<Arc<dyn CallHandler>> {
        self.methods.get(method).cloned()
    }

    /// Registered service names in sorted order
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Full method names of one service, in registration order
    pub fn methods_of(&self, service: &str) -> Option<&[String]> {
        self.services.get(service).map(Vec::as_slice)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.services.iter()).finish()
    }
}

/// Serve calls on one accepted connection until the peer leaves or
/// `shutdown` fires
///
/// Every call still open at that point receives `on_cancel`.
pub async fn serve_connection(
    transport: Transport,
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let max_frame_size = transport.max_frame_size();
    let (mut reader, mut writer) = transport.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Frame>();
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<CallId>();
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Result<Frame>>(INBOUND_BUFFER);

    // Ends once every ServerCall handed out has been dropped.
    tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let Some(bytes) = outbound_bytes(frame, max_frame_size) else {
                continue;
            };
            if let Err(e) = writer.write_frame(&bytes).await {
                debug!(error = %e, "Connection write failed");
                break;
            }
        }
        let _ = writer.close().await;
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

    let mut calls: HashMap<CallId, Box<dyn CallListener>> = HashMap::new();

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => match inbound {
                Some(Ok(frame)) => {
                    let outbound = Outbound {
                        frames: &frames_tx,
                        closed: &closed_tx,
                        max_frame_size,
                    };
                    dispatch_frame(frame, &registry, &mut calls, &outbound);
                }
                Some(Err(Error::ConnectionClosed)) | None => {
                    debug!("Peer closed connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Connection failed");
                    break;
                }
            },
            Some(call_id) = closed_rx.recv() => {
                calls.remove(&call_id);
            }
            _ = shutdown.changed() => {
                debug!(open_calls = calls.len(), "Connection shutting down");
                break;
            }
        }
    }

    reader_task.abort();
    for (call_id, mut listener) in calls.drain() {
        trace!(call_id, "Cancelling open call");
        listener.on_cancel();
    }
}

/// Encode a frame for the wire
///
/// Frames over the connection limit are dropped, except a `Close`, which is
/// replaced by a bare `INTERNAL` one so the client still learns the outcome.
fn outbound_bytes(frame: Frame, max_frame_size: usize) -> Option<Vec<u8>> {
    let call_id = frame.call_id();
    let error = match encode_within(&frame, max_frame_size) {
        Ok(bytes) => return Some(bytes),
        Err(e) => e,
    };
    warn!(call_id, error = %error, "Dropping unsendable frame");

    match frame {
        Frame::Close { .. } => encode_within(
            &Frame::Close {
                call_id,
                status: Status::internal("call status too large to send"),
                trailers: Metadata::new(),
            },
            max_frame_size,
        )
        .ok(),
        _ => None,
    }
}

/// Where calls started on one connection send their output
struct Outbound<'a> {
    frames: &'a mpsc::UnboundedSender<Frame>,
    closed: &'a mpsc::UnboundedSender<CallId>,
    max_frame_size: usize,
}

fn dispatch_frame(
    frame: Frame,
    registry: &Registry,
    calls: &mut HashMap<CallId, Box<dyn CallListener>>,
    outbound: &Outbound<'_>,
) {
    match frame {
        Frame::Open {
            call_id,
            method,
            metadata,
        } => {
            if calls.contains_key(&call_id) {
                warn!(call_id, "Ignoring reused call id");
                return;
            }
            let lookup = registry.lookup(&method);
            let call = ServerCall::new(
                call_id,
                method,
                outbound.frames.clone(),
                Some(outbound.closed.clone()),
                outbound.max_frame_size,
            );
            match lookup {
                Some(handler) => {
                    debug!(call_id, method = %call.method(), "Call started");
                    let listener = handler.start_call(call, metadata);
                    calls.insert(call_id, listener);
                }
                None => {
                    debug!(call_id, method = %call.method(), "Unknown method");
                    let status =
                        Status::unimplemented(format!("method not found: {}", call.method()));
                    call.close(status, Metadata::new());
                }
            }
        }
        Frame::Message { call_id, payload } => match calls.get_mut(&call_id) {
            Some(listener) => listener.on_message(payload),
            None => trace!(call_id, "Message for inactive call"),
        },
        Frame::HalfClose { call_id } => match calls.get_mut(&call_id) {
            Some(listener) => listener.on_half_close(),
            None => trace!(call_id, "Half-close for inactive call"),
        },
        Frame::Cancel { call_id } => {
            if let Some(mut listener) = calls.remove(&call_id) {
                debug!(call_id, "Call cancelled by client");
                listener.on_cancel();
            }
        }
        Frame::Headers { call_id, .. } | Frame::Close { call_id, .. } => {
            warn!(call_id, "Ignoring server-only frame sent by client");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    impl CallListener for Silent {
        fn on_message(&mut self, _payload: Vec<u8>) {}
        fn on_half_close(&mut self) {}
        fn on_cancel(&mut self) {}
    }

    struct NoopHandler;

    impl CallHandler for NoopHandler {
        fn start_call(&self, _call: ServerCall, _metadata: Metadata) -> Box<dyn CallListener> {
            Box::new(Silent)
        }
    }

    #[test]
    fn headers_are_sent_once_before_the_message() {
        let (mut call, mut frames) = ServerCall::capture(1, "pkg.A/M");
        call.send_headers(Metadata::new().with_header("x-a", "1"));
        call.send_headers(Metadata::new().with_header("x-b", "2"));
        call.send_message(b"out".to_vec()).unwrap();
        call.close(Status::ok(), Metadata::new());

        assert!(matches!(frames.try_recv(), Ok(Frame::Headers { metadata, .. }) if metadata.contains("x-a")));
        assert!(matches!(frames.try_recv(), Ok(Frame::Message { payload, .. }) if payload == b"out"));
        assert!(matches!(frames.try_recv(), Ok(Frame::Close { status, .. }) if status.is_ok()));
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn oversized_message_is_refused_without_sending_anything() {
        let (call, mut frames) = ServerCall::capture(3, "pkg.A/M");
        let mut call = call.with_max_frame_size(64);

        let err = call.send_message(vec![0u8; 64]).unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 84, max: 64 }));
        assert!(frames.try_recv().is_err());

        call.send_message(vec![0u8; 44]).unwrap();
        assert!(matches!(frames.try_recv(), Ok(Frame::Headers { .. })));
        assert!(matches!(frames.try_recv(), Ok(Frame::Message { payload, .. }) if payload.len() == 44));
    }

    #[test]
    fn oversized_frames_are_dropped_but_close_still_goes_out() {
        let message = Frame::Message {
            call_id: 4,
            payload: vec![0u8; 512],
        };
        assert!(outbound_bytes(message, 256).is_none());

        let close = Frame::Close {
            call_id: 4,
            status: Status::unknown("x".repeat(512)),
            trailers: Metadata::new(),
        };
        let bytes = outbound_bytes(close, 256).expect("substitute close");
        match decode_frame(&bytes).unwrap() {
            Frame::Close { call_id, status, .. } => {
                assert_eq!(call_id, 4);
                assert_eq!(status.code(), constellation_core::Code::Internal);
            }
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[test]
    fn dropped_call_closes_as_cancelled() {
        let (call, mut frames) = ServerCall::capture(2, "pkg.A/M");
        drop(call);

        match frames.try_recv() {
            Ok(Frame::Close { status, .. }) => {
                assert_eq!(status.code(), constellation_core::Code::Cancelled)
            }
            other => panic!("expected close frame, got {:?}", other),
        }
    }

    #[test]
    fn registry_rejects_duplicate_methods() {
        let mut registry = Registry::new();
        registry
            .add_service(ServiceDefinition::new("pkg.A").add_method("pkg.A/M1", Arc::new(NoopHandler)))
            .unwrap();

        let clash = ServiceDefinition::new("pkg.B")
            .add_method("pkg.B/M2", Arc::new(NoopHandler))
            .add_method("pkg.A/M1", Arc::new(NoopHandler));
        assert!(matches!(registry.add_service(clash), Err(Error::Registration(_))));

        assert!(registry.lookup("pkg.A/M1").is_some());
        assert!(registry.lookup("pkg.B/M2").is_none());
        assert_eq!(registry.service_names().collect::<Vec<_>>(), vec!["pkg.A"]);
    }
}
