use std::fmt;
use std::ops::Add;
use std::sync::Arc;

use constellation_fabric::CallHandler;

use crate::method::Endpoint;
use crate::reflection::ServiceDescriptor;

pub(crate) struct ServiceEntry {
    pub(crate) name: String,
    pub(crate) handler: Arc<dyn CallHandler>,
}

/// Ordered collection of endpoints a server exposes
///
/// Endpoints may have different request, response and error types. `+`
/// concatenates two services, keeping order.
#[derive(Default)]
pub struct Service {
    pub(crate) entries: Vec<ServiceEntry>,
    pub(crate) descriptors: Vec<ServiceDescriptor>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint
    pub fn add<E, In, Out>(mut self, endpoint: Endpoint<E, In, Out>) -> Self
    where
        E: Send + 'static,
        In: Send + 'static,
        Out: Send + 'static,
    {
        self.entries.push(ServiceEntry {
            name: endpoint.name().to_string(),
            handler: Arc::new(endpoint),
        });
        self
    }

    /// Attach a reflection descriptor
    ///
    /// Services without descriptors are served but not listed by reflection.
    pub fn with_descriptor(mut self, descriptor: ServiceDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    /// Full method names in the order they were added
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Add for Service {
    type Output = Service;

    fn add(mut self, other: Service) -> Service {
        self.entries.extend(other.entries);
        self.descriptors.extend(other.descriptors);
        self
    }
}

impl<E, In, Out> From<Endpoint<E, In, Out>> for Service
where
    E: Send + 'static,
    In: Send + 'static,
    Out: Send + 'static,
{
    fn from(endpoint: Endpoint<E, In, Out>) -> Self {
        Service::new().add(endpoint)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("methods", &self.method_names().collect::<Vec<_>>())
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}
