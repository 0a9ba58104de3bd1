//! Ambient per-call context.
//!
//! The dispatcher binds a [`RequestContext`] around each handler execution.
//! Code running inside the handler, at any depth, reads it with
//! [`RequestContext::current`] instead of receiving it as a parameter.
//! Tasks started with [`spawn`] inherit the binding; plain `tokio::spawn`
//! does not.

use std::future::Future;
use std::sync::Arc;

use constellation_core::Metadata;
use tokio::task::JoinHandle;

tokio::task_local! {
    static CURRENT: RequestContext;
}

/// Metadata and full method name of the call being handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    metadata: Metadata,
    method_name: Arc<str>,
}

impl RequestContext {
    pub fn new(metadata: Metadata, method_name: impl Into<Arc<str>>) -> Self {
        Self {
            metadata,
            method_name: method_name.into(),
        }
    }

    /// The context bound to the running task, if any
    pub fn current() -> Option<RequestContext> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Borrow the bound context without cloning it
    pub fn with_current<R>(f: impl FnOnce(&RequestContext) -> R) -> Option<R> {
        CURRENT.try_with(f).ok()
    }

    /// Run `future` with `self` bound as the current context
    ///
    /// The binding survives suspension points and ends when `future` completes.
    pub fn scope<F: Future>(self, future: F) -> impl Future<Output = F::Output> {
        CURRENT.scope(self, future)
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Full method name, `"<service>/<method>"`
    pub fn method_name(&self) -> &str {
        &self.method_name
    }
}

/// Spawn a task that inherits the caller's request context
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    match RequestContext::current() {
        Some(context) => tokio::spawn(context.scope(future)),
        None => tokio::spawn(future),
    }
}
