//! Reflection descriptors and the listing method built on them.
//!
//! A descriptor is the schema summary the code generator embeds next to the
//! handler trait it emits, as a base64 string of its bincode encoding.

use std::convert::Infallible;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use constellation_core::Metadata;
use constellation_fabric::codec::JsonCodec;

use crate::error::DescriptorError;
use crate::error_codec::NoErrors;
use crate::handler::HandlerError;
use crate::method::{Endpoint, Method};

/// Method the server adds when any service carries a descriptor
pub const LIST_SERVICES: &str = "constellation.reflection.v1.ServerReflection/ListServices";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    /// Short method name, without the service part
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodDescriptor {
    pub fn unary(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            output_type: output_type.into(),
            client_streaming: false,
            server_streaming: false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.client_streaming || self.server_streaming
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Fully qualified service name, e.g. `"test.Greeter"`
    pub name: String,
    pub methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    /// Full method names, `"<service>/<method>"`
    pub fn full_method_names(&self) -> impl Iterator<Item = String> + '_ {
        self.methods
            .iter()
            .map(move |method| format!("{}/{}", self.name, method.name))
    }

    pub fn to_base64(&self) -> Result<String, DescriptorError> {
        let bytes =
            bincode::serialize(self).map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        Ok(STANDARD.encode(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, DescriptorError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| DescriptorError::Malformed(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| DescriptorError::Malformed(e.to_string()))
    }
}

/// Reject the whole set if any method of any service streams
///
/// The error names every offending method, not just the first.
pub fn validate_unary(descriptors: &[ServiceDescriptor]) -> Result<(), DescriptorError> {
    let methods: Vec<String> = descriptors
        .iter()
        .flat_map(|service| {
            service
                .methods
                .iter()
                .filter(|method| method.is_streaming())
                .map(move |method| format!("{}/{}", service.name, method.name))
        })
        .collect();

    if methods.is_empty() {
        Ok(())
    } else {
        Err(DescriptorError::StreamingNotSupported { methods })
    }
}

/// Client-side handle for the listing method
pub fn list_services_method() -> Method<Infallible, (), Vec<ServiceDescriptor>> {
    Method::new(LIST_SERVICES, JsonCodec, JsonCodec, NoErrors)
}

pub(crate) fn list_services_endpoint(
    descriptors: Vec<ServiceDescriptor>,
) -> Endpoint<Infallible, (), Vec<ServiceDescriptor>> {
    let descriptors = Arc::new(descriptors);
    list_services_method().serve(move |_: Metadata, _: ()| {
        let descriptors = descriptors.clone();
        async move { Ok::<_, HandlerError<Infallible>>(descriptors.as_ref().clone()) }
    })
}
