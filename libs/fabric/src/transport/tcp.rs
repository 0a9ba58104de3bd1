use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::framed::with_timeout;
use crate::transport::Transport;

/// Connect to a remote TCP address, honouring the configured connect timeout
pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> Result<Transport> {
    let stream = with_timeout(config.connect_timeout, "Connect", async {
        TcpStream::connect(addr).await.map_err(Error::from)
    })
    .await?;
    stream.set_nodelay(true)?;
    Ok(Transport::new(stream, config))
}

/// TCP listener for accepting incoming connections
pub struct TcpTransportListener {
    listener: TcpListener,
    config: TransportConfig,
}

impl TcpTransportListener {
    /// Bind to a local address
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<(Transport, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Transport::new(stream, &self.config), addr))
    }

    /// Get the local address this listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Into::into)
    }
}
