//! Server-side state machine for one unary call.
//!
//! ```text
//! AwaitingMessage --message--> Received --half-close--> Executing --> closed by completion task
//!        |                        |
//!   half-close              second message
//!        v                        v
//!   closed INTERNAL          closed INTERNAL
//! ```
//!
//! Transport events arrive on the connection task. The handler runs on its
//! own tokio task inside a [`RequestContext`] scope, and the call object is
//! moved into a completion task that waits on the handler's `JoinHandle`.
//! That handle resolves exactly once, so exactly one path ever writes the
//! terminal status.

use constellation_core::{Metadata, Status};
use constellation_fabric::{CallHandler, CallListener, ServerCall};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

use crate::context::RequestContext;
use crate::handler::HandlerError;
use crate::method::{Endpoint, Method};

/// Description sent for every failure the endpoint did not declare
pub(crate) const DEFECT_DESCRIPTION: &str = "internal error";
pub(crate) const NO_REQUEST_DESCRIPTION: &str = "no request message received";

enum CallState {
    AwaitingMessage,
    Received(Vec<u8>),
    Executing(AbortHandle),
    Closed,
}

pub(crate) struct UnaryListener<E, In, Out> {
    endpoint: Endpoint<E, In, Out>,
    call: Option<ServerCall>,
    metadata: Metadata,
    state: CallState,
}

impl<E, In, Out> UnaryListener<E, In, Out>
where
    E: Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn close(&mut self, status: Status) {
        self.state = CallState::Closed;
        if let Some(call) = self.call.take() {
            call.close(status, Metadata::new());
        }
    }

    fn execute(&mut self, payload: Vec<u8>) {
        let Some(call) = self.call.take() else {
            self.state = CallState::Closed;
            return;
        };
        let method = self.endpoint.method.clone();

        let request = match method.request_codec.decode(&payload) {
            Ok(request) => request,
            Err(e) => {
                warn!(method = %method.name(), error = %e, "Rejecting undecodable request");
                self.state = CallState::Closed;
                call.close(Status::internal("failed to decode request"), Metadata::new());
                return;
            }
        };

        let context = RequestContext::new(self.metadata.clone(), method.name());
        let handler = self.endpoint.handler.clone();
        let metadata = self.metadata.clone();
        let task = tokio::spawn(context.scope(async move { handler.handle(metadata, request).await }));

        self.state = CallState::Executing(task.abort_handle());
        tokio::spawn(complete(task, call, method));
    }
}

impl<E, In, Out> CallListener for UnaryListener<E, In, Out>
where
    E: Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn on_message(&mut self, payload: Vec<u8>) {
        match std::mem::replace(&mut self.state, CallState::Closed) {
            CallState::AwaitingMessage => self.state = CallState::Received(payload),
            CallState::Received(_) => {
                warn!(method = %self.endpoint.name(), "More than one request message on a unary call");
                self.close(Status::internal("more than one request message received"));
            }
            other => self.state = other,
        }
    }

    fn on_half_close(&mut self) {
        match std::mem::replace(&mut self.state, CallState::Closed) {
            CallState::AwaitingMessage => {
                warn!(method = %self.endpoint.name(), "Half-close without a request message");
                self.close(Status::internal(NO_REQUEST_DESCRIPTION));
            }
            CallState::Received(payload) => self.execute(payload),
            other => self.state = other,
        }
    }

    fn on_cancel(&mut self) {
        match std::mem::replace(&mut self.state, CallState::Closed) {
            CallState::Executing(abort) => {
                debug!(method = %self.endpoint.name(), "Aborting handler of cancelled call");
                abort.abort();
            }
            _ => self.close(Status::cancelled("call cancelled")),
        }
    }
}

// Reached without on_cancel only when the connection task itself is torn down.
impl<E, In, Out> Drop for UnaryListener<E, In, Out> {
    fn drop(&mut self) {
        if let CallState::Executing(abort) = &self.state {
            abort.abort();
        }
    }
}

impl<E, In, Out> CallHandler for Endpoint<E, In, Out>
where
    E: Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn start_call(&self, call: ServerCall, metadata: Metadata) -> Box<dyn CallListener> {
        Box::new(UnaryListener {
            endpoint: self.clone(),
            call: Some(call),
            metadata,
            state: CallState::AwaitingMessage,
        })
    }
}

async fn complete<E, In, Out>(
    task: JoinHandle<Result<Out, HandlerError<E>>>,
    mut call: ServerCall,
    method: Method<E, In, Out>,
) {
    let status = match task.await {
        Ok(Ok(response)) => match method.response_codec.encode(&response) {
            Ok(bytes) => match call.send_message(bytes) {
                Ok(()) => Status::ok(),
                Err(e) => {
                    warn!(method = %method.name(), error = %e, "Response does not fit in one frame");
                    Status::resource_exhausted("response message too large")
                }
            },
            Err(e) => {
                error!(method = %method.name(), error = %e, "Failed to encode response");
                Status::internal("failed to encode response")
            }
        },
        Ok(Err(HandlerError::Domain(domain))) => {
            let status = method.error_codec().to_status(&domain);
            if status.is_ok() {
                error!(method = %method.name(), "Domain error mapped to OK status");
                Status::unknown("domain error mapped to OK")
            } else {
                debug!(method = %method.name(), code = %status.code(), "Handler returned domain error");
                status
            }
        }
        Ok(Err(HandlerError::Defect(details))) => {
            error!(method = %method.name(), %details, "Handler failed");
            Status::internal(DEFECT_DESCRIPTION)
        }
        Err(join) if join.is_cancelled() => {
            debug!(method = %method.name(), "Handler aborted");
            Status::cancelled("call cancelled")
        }
        Err(join) => {
            error!(method = %method.name(), error = %join, "Handler panicked");
            Status::internal(DEFECT_DESCRIPTION)
        }
    };
    call.close(status, Metadata::new());
}
