use std::fmt;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use constellation_fabric::{serve_connection, Address, Listener, Registry, ServiceDefinition};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::method::service_name;
use crate::reflection::{list_services_endpoint, validate_unary};
use crate::service::{Service, ServiceEntry};

/// A bound, serving RPC server
///
/// Owns its listener. [`shutdown`](Server::shutdown) stops accepting,
/// cancels every open call and waits for connections to wind down; dropping
/// a running server tears it down without waiting.
pub struct Server {
    local_address: Address,
    shutdown: watch::Sender<bool>,
    accept_loop: Option<JoinHandle<()>>,
}

impl Server {
    /// Validate `service`, bind, and start accepting
    ///
    /// Either the server is fully bound and serving, or nothing is bound.
    pub async fn start(config: ServerConfig, service: Service) -> Result<Server, ServerError> {
        if config.max_connections == 0 {
            return Err(ServerError::StartupFailure(
                "max_connections must be at least 1".to_string(),
            ));
        }
        let registry = build_registry(service)?;

        let listener = Listener::bind(&config.address, &config.transport)
            .await
            .map_err(|e| {
                ServerError::StartupFailure(format!("cannot bind {}: {}", config.address, e))
            })?;
        let local_address = listener
            .local_address()
            .map_err(|e| ServerError::StartupFailure(e.to_string()))?;

        info!(
            address = %local_address,
            services = ?registry.service_names().collect::<Vec<_>>(),
            "Server listening"
        );

        let (shutdown, signal) = watch::channel(false);
        let accept_loop = tokio::spawn(accept_connections(
            listener,
            Arc::new(registry),
            config.max_connections,
            signal,
        ));

        Ok(Server {
            local_address,
            shutdown,
            accept_loop: Some(accept_loop),
        })
    }

    /// Run `body` against a freshly started server, shutting it down afterwards
    ///
    /// If the returned future is dropped early the server is torn down by
    /// its `Drop` impl instead.
    pub async fn scoped<F, Fut, T>(
        config: ServerConfig,
        service: Service,
        body: F,
    ) -> Result<T, ServerError>
    where
        F: FnOnce(Address) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut server = Server::start(config, service).await?;
        let output = body(server.local_address.clone()).await;
        server.shutdown().await?;
        Ok(output)
    }

    /// The bound address, with any ephemeral port resolved
    pub fn local_address(&self) -> &Address {
        &self.local_address
    }

    pub fn is_running(&self) -> bool {
        self.accept_loop
            .as_ref()
            .is_some_and(|accept_loop| !accept_loop.is_finished())
    }

    /// Stop serving; later calls return immediately
    pub async fn shutdown(&mut self) -> Result<(), ServerError> {
        let Some(accept_loop) = self.accept_loop.take() else {
            return Ok(());
        };
        info!(address = %self.local_address, "Shutting down server");
        let _ = self.shutdown.send(true);
        accept_loop
            .await
            .map_err(|e| ServerError::ShutdownFailure(e.to_string()))
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(accept_loop) = self.accept_loop.take() {
            debug!(address = %self.local_address, "Server dropped while running");
            let _ = self.shutdown.send(true);
            accept_loop.abort();
        }
    }
}

/// First delay after a failed accept; doubles per consecutive failure
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Delay before accepting again after `failures` consecutive errors
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << doublings)
        .min(ACCEPT_BACKOFF_MAX)
}

async fn accept_connections(
    listener: Listener,
    registry: Arc<Registry>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(max_connections));
    let mut connections: JoinSet<()> = JoinSet::new();
    let mut failures = 0u32;

    loop {
        while connections.try_join_next().is_some() {}

        let permit = tokio::select! {
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((transport, peer)) => {
                    failures = 0;
                    debug!(%peer, "Accepted connection");
                    let registry = registry.clone();
                    let signal = shutdown.clone();
                    connections.spawn(async move {
                        serve_connection(transport, registry, signal).await;
                        debug!(%peer, "Connection closed");
                        drop(permit);
                    });
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = accept_backoff(failures);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Failed to accept connection");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            },
        }
    }

    drop(listener);
    let open = connections.len();
    if open > 0 {
        debug!(open, "Waiting for connections to close");
        while connections.join_next().await.is_some() {}
    }
}

/// Group endpoints into one transport-level service per derived service name
pub(crate) fn build_registry(service: Service) -> Result<Registry, ServerError> {
    validate_unary(&service.descriptors)
        .map_err(|e| ServerError::StartupFailure(e.to_string()))?;

    let Service {
        mut entries,
        descriptors,
    } = service;
    if !descriptors.is_empty() {
        let reflection = list_services_endpoint(descriptors);
        entries.push(ServiceEntry {
            name: reflection.name().to_string(),
            handler: Arc::new(reflection),
        });
    }

    let mut groups: BTreeMap<String, ServiceDefinition> = BTreeMap::new();
    for entry in entries {
        let service = service_name(&entry.name)
            .ok_or_else(|| {
                ServerError::StartupFailure(format!("invalid method name: {:?}", entry.name))
            })?
            .to_string();
        let definition = groups
            .remove(&service)
            .unwrap_or_else(|| ServiceDefinition::new(service.clone()));
        groups.insert(service, definition.add_method(entry.name, entry.handler));
    }

    let mut registry = Registry::new();
    for definition in groups.into_values() {
        registry
            .add_service(definition)
            .map_err(|e| ServerError::StartupFailure(e.to_string()))?;
    }
    Ok(registry)
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_address", &self.local_address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use constellation_core::Metadata;
    use constellation_fabric::codec::Utf8Codec;

    use super::*;
    use crate::error_codec::NoErrors;
    use crate::handler::HandlerError;
    use crate::method::{Endpoint, Method};
    use crate::reflection::{MethodDescriptor, ServiceDescriptor, LIST_SERVICES};

    fn endpoint(name: &str) -> Endpoint<Infallible, String, String> {
        Method::new(name, Utf8Codec, Utf8Codec, NoErrors)
            .serve(|_: Metadata, s: String| async move { Ok::<_, HandlerError<Infallible>>(s) })
    }

    fn methods<'a>(registry: &'a Registry, service: &str) -> Vec<&'a str> {
        registry
            .methods_of(service)
            .unwrap_or_default()
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn accept_backoff_doubles_up_to_a_ceiling() {
        assert_eq!(accept_backoff(1), Duration::from_millis(5));
        assert_eq!(accept_backoff(2), Duration::from_millis(10));
        assert_eq!(accept_backoff(4), Duration::from_millis(40));
        assert_eq!(accept_backoff(9), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn endpoints_group_by_service_name() {
        let service = Service::from(endpoint("pkg.A/M1"))
            .add(endpoint("pkg.B/M3"))
            .add(endpoint("pkg.A/M2"));

        let registry = build_registry(service).unwrap();

        assert_eq!(registry.service_names().collect::<Vec<_>>(), vec!["pkg.A", "pkg.B"]);
        assert_eq!(methods(&registry, "pkg.A"), vec!["pkg.A/M1", "pkg.A/M2"]);
        assert_eq!(methods(&registry, "pkg.B"), vec!["pkg.B/M3"]);
    }

    #[test]
    fn malformed_method_name_fails_startup() {
        let err = build_registry(Service::from(endpoint("NoSlash"))).unwrap_err();
        assert!(matches!(err, ServerError::StartupFailure(msg) if msg.contains("NoSlash")));
    }

    #[test]
    fn duplicate_method_fails_startup() {
        let service = Service::from(endpoint("pkg.A/M1")) + Service::from(endpoint("pkg.A/M1"));
        let err = build_registry(service).unwrap_err();
        assert!(matches!(err, ServerError::StartupFailure(msg) if msg.contains("pkg.A/M1")));
    }

    #[test]
    fn descriptors_enable_reflection() {
        let without = build_registry(Service::from(endpoint("pkg.A/M1"))).unwrap();
        assert!(without.lookup(LIST_SERVICES).is_none());

        let with = build_registry(
            Service::from(endpoint("pkg.A/M1")).with_descriptor(
                ServiceDescriptor::new("pkg.A").with_method(MethodDescriptor::unary("M1", "S", "S")),
            ),
        )
        .unwrap();
        assert!(with.lookup(LIST_SERVICES).is_some());
    }

    #[test]
    fn streaming_descriptor_fails_startup() {
        let mut stream = MethodDescriptor::unary("Watch", "K", "V");
        stream.server_streaming = true;
        let service = Service::from(endpoint("pkg.A/M1"))
            .with_descriptor(ServiceDescriptor::new("pkg.A").with_method(stream));

        let err = build_registry(service).unwrap_err();
        assert!(matches!(err, ServerError::StartupFailure(msg) if msg.contains("pkg.A/Watch")));
    }
}
