use std::fmt;
use std::sync::Arc;

use constellation_fabric::Codec;

use crate::error_codec::ErrorCodec;
use crate::handler::Handler;

/// Service part of a full method name: everything before the last `/`
///
/// Returns `None` unless both the service and the method part are non-empty.
pub fn service_name(method_name: &str) -> Option<&str> {
    match method_name.rsplit_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => Some(service),
        _ => None,
    }
}

/// Everything a client or server needs to know about one unary method
///
/// `name` has the form `"<package>.<Service>/<Method>"`. Cloning is cheap;
/// codecs are shared.
pub struct Method<E, In, Out> {
    name: Arc<str>,
    pub(crate) request_codec: Arc<dyn Codec<In>>,
    pub(crate) response_codec: Arc<dyn Codec<Out>>,
    error_codec: Arc<dyn ErrorCodec<E>>,
}

impl<E, In, Out> Method<E, In, Out> {
    pub fn new(
        name: impl Into<Arc<str>>,
        request_codec: impl Codec<In> + 'static,
        response_codec: impl Codec<Out> + 'static,
        error_codec: impl ErrorCodec<E> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            request_codec: Arc::new(request_codec),
            response_codec: Arc::new(response_codec),
            error_codec: Arc::new(error_codec),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_codec(&self) -> &dyn ErrorCodec<E> {
        self.error_codec.as_ref()
    }

    /// Bind a handler, producing an endpoint for a [`Service`](crate::Service)
    pub fn serve(&self, handler: impl Handler<E, In, Out>) -> Endpoint<E, In, Out> {
        Endpoint {
            method: self.clone(),
            handler: Arc::new(handler),
        }
    }
}

impl<E, In, Out> Clone for Method<E, In, Out> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            request_codec: self.request_codec.clone(),
            response_codec: self.response_codec.clone(),
            error_codec: self.error_codec.clone(),
        }
    }
}

impl<E, In, Out> fmt::Debug for Method<E, In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("name", &self.name).finish()
    }
}

/// A method together with the handler that serves it
pub struct Endpoint<E, In, Out> {
    pub(crate) method: Method<E, In, Out>,
    pub(crate) handler: Arc<dyn Handler<E, In, Out>>,
}

impl<E, In, Out> Endpoint<E, In, Out> {
    pub fn method(&self) -> &Method<E, In, Out> {
        &self.method
    }

    pub fn name(&self) -> &str {
        self.method.name()
    }
}

impl<E, In, Out> Clone for Endpoint<E, In, Out> {
    fn clone(&self) -> Self {
        Self {
            method: self.method.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<E, In, Out> fmt::Debug for Endpoint<E, In, Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("method", &self.method.name())
            .finish()
    }
}
