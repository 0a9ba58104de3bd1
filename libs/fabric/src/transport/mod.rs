use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::TransportConfig;
use crate::error::{Error, Result};

pub mod framed;
pub mod tcp;
pub mod unix;

pub use self::framed::{FramedReader, FramedWriter};
pub use self::tcp::TcpTransportListener;
pub use self::unix::UnixTransportListener;

/// Where a listener binds or a connection dials
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for Address {
    type Err = Error;

    /// Accepts `host:port` for TCP and `unix:/path` for Unix sockets
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::InvalidAddress(s.to_string()));
            }
            return Ok(Address::Unix(PathBuf::from(path)));
        }

        s.parse::<SocketAddr>()
            .map(Address::Tcp)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "{}", addr),
            Address::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::Tcp(addr)
    }
}

/// A connected, framed byte pipe
///
/// Each transport instance represents a single connection.
pub struct Transport {
    reader: FramedReader,
    writer: FramedWriter,
}

impl Transport {
    /// Wrap any duplex stream
    pub fn new<S>(stream: S, config: &TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FramedReader::new(read_half, config),
            writer: FramedWriter::new(write_half, config),
        }
    }

    /// Send one frame
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_frame(bytes).await
    }

    /// Receive one frame
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        self.reader.read_frame().await
    }

    /// Close the write direction of the connection
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    /// Separate the halves so reads and writes can run on different tasks
    /// Largest frame this transport reads or writes
    pub fn max_frame_size(&self) -> usize {
        self.writer.max_frame_size()
    }

    pub fn split(self) -> (FramedReader, FramedWriter) {
        (self.reader, self.writer)
    }
}

/// Dial `address`
pub async fn connect(address: &Address, config: &TransportConfig) -> Result<Transport> {
    match address {
        Address::Tcp(addr) => tcp::connect(*addr, config).await,
        Address::Unix(path) => unix::connect(path, config).await,
    }
}

/// A bound listener of either flavour
pub enum Listener {
    Tcp(TcpTransportListener),
    Unix(UnixTransportListener),
}

impl Listener {
    /// Bind to `address`
    pub async fn bind(address: &Address, config: &TransportConfig) -> Result<Self> {
        match address {
            Address::Tcp(addr) => Ok(Listener::Tcp(
                TcpTransportListener::bind(*addr, config.clone()).await?,
            )),
            Address::Unix(path) => Ok(Listener::Unix(
                UnixTransportListener::bind(path, config.clone()).await?,
            )),
        }
    }

    /// Accept an incoming connection, returning it with a printable peer name
    pub async fn accept(&self) -> Result<(Transport, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (transport, peer) = listener.accept().await?;
                Ok((transport, peer.to_string()))
            }
            Listener::Unix(listener) => {
                let transport = listener.accept().await?;
                Ok((transport, format!("unix:{}", listener.path().display())))
            }
        }
    }

    /// The address actually bound, with any wildcard port resolved
    pub fn local_address(&self) -> Result<Address> {
        match self {
            Listener::Tcp(listener) => Ok(Address::Tcp(listener.local_addr()?)),
            Listener::Unix(listener) => Ok(Address::Unix(listener.path().to_path_buf())),
        }
    }
}
