use std::fmt;

use constellation_core::{Metadata, Status};
use constellation_fabric::{CallError, ClientConnection};
use tracing::debug;

use crate::channel::Channel;
use crate::error::ClientError;
use crate::error_codec::ErrorCodec;
use crate::method::Method;

/// A decoded response together with the metadata that came with it
#[derive(Debug, Clone, PartialEq)]
pub struct Response<Out> {
    pub headers: Metadata,
    pub message: Out,
    pub trailers: Metadata,
}

/// Issues typed calls over a [`Channel`]
///
/// Cheap to clone. Dropping an in-flight call future cancels the call.
#[derive(Clone)]
pub struct Client {
    connection: ClientConnection,
    metadata: Metadata,
}

impl Client {
    pub fn new(channel: &Channel) -> Self {
        Self {
            connection: channel.connection().clone(),
            metadata: Metadata::new(),
        }
    }

    /// Headers sent with every call; per-call headers win on conflict
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub async fn call<E, In, Out>(
        &self,
        method: &Method<E, In, Out>,
        request: In,
    ) -> Result<Out, ClientError<E>> {
        self.call_full(method, Metadata::new(), request)
            .await
            .map(|response| response.message)
    }

    pub async fn call_with_metadata<E, In, Out>(
        &self,
        method: &Method<E, In, Out>,
        metadata: Metadata,
        request: In,
    ) -> Result<Out, ClientError<E>> {
        self.call_full(method, metadata, request)
            .await
            .map(|response| response.message)
    }

    /// Like [`call_with_metadata`](Client::call_with_metadata), also returning
    /// response headers and trailers
    pub async fn call_full<E, In, Out>(
        &self,
        method: &Method<E, In, Out>,
        metadata: Metadata,
        request: In,
    ) -> Result<Response<Out>, ClientError<E>> {
        let payload = method
            .request_codec
            .encode(&request)
            .map_err(|e| ClientError::CallFailure(e.to_string()))?;

        let response = match self
            .connection
            .unary(method.name(), self.metadata.merge(&metadata), payload)
            .await
        {
            Ok(response) => response,
            Err(CallError::Status(status)) => {
                debug!(method = %method.name(), code = %status.code(), "Call failed with status");
                return Err(classify(method.error_codec(), status));
            }
            Err(CallError::Transport(e)) => {
                debug!(method = %method.name(), error = %e, "Call failed without status");
                return Err(ClientError::CallFailure(e.to_string()));
            }
        };

        let message = method
            .response_codec
            .decode(&response.payload)
            .map_err(|e| ClientError::CallFailure(e.to_string()))?;

        Ok(Response {
            headers: response.headers,
            message,
            trailers: response.trailers,
        })
    }
}

fn classify<E>(codec: &dyn ErrorCodec<E>, status: Status) -> ClientError<E> {
    match codec.from_status(&status) {
        Some(error) => ClientError::RemoteError(error),
        None => ClientError::TransportError(status),
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("address", self.connection.address())
            .field("metadata", &self.metadata)
            .finish()
    }
}
