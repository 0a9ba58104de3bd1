use std::net::SocketAddr;

use constellation_fabric::{Address, TransportConfig};

/// Default ceiling on concurrently served connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Where to listen; a TCP port of 0 picks a free one
    pub address: Address,

    pub transport: TransportConfig,

    /// Connections beyond this wait in the accept queue
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: Address::Tcp(SocketAddr::from(([127, 0, 0, 1], 0))),
            transport: TransportConfig::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServerConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub address: Address,
    pub transport: TransportConfig,
}

impl ChannelConfig {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            transport: TransportConfig::default(),
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
