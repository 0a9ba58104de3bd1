use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use constellation_core::Metadata;

/// Why a handler did not produce a response
///
/// `Domain` errors reach the client as their mapped status. A `Defect` is
/// anything the endpoint did not declare; it reaches the client as a
/// generic `INTERNAL` status and its details stay in the server log.
/// A panicking handler counts as a defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError<E> {
    Domain(E),
    Defect(String),
}

impl<E> HandlerError<E> {
    /// Wrap an unexpected failure
    pub fn defect(cause: impl fmt::Display) -> Self {
        HandlerError::Defect(cause.to_string())
    }
}

impl<E> From<E> for HandlerError<E> {
    fn from(error: E) -> Self {
        HandlerError::Domain(error)
    }
}

impl<E: fmt::Display> fmt::Display for HandlerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Domain(error) => write!(f, "{}", error),
            HandlerError::Defect(details) => write!(f, "defect: {}", details),
        }
    }
}

/// User code executed once per call
///
/// Implemented for every `Fn(Metadata, In) -> impl Future<Output = Result<Out, HandlerError<E>>>`,
/// so plain closures and `async fn`s work as handlers.
#[async_trait]
pub trait Handler<E, In, Out>: Send + Sync + 'static {
    async fn handle(&self, metadata: Metadata, request: In) -> Result<Out, HandlerError<E>>;
}

#[async_trait]
impl<F, Fut, E, In, Out> Handler<E, In, Out> for F
where
    F: Fn(Metadata, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, HandlerError<E>>> + Send + 'static,
    E: Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    async fn handle(&self, metadata: Metadata, request: In) -> Result<Out, HandlerError<E>> {
        (self)(metadata, request).await
    }
}
