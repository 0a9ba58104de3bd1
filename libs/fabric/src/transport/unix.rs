use std::path::{Path, PathBuf};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::transport::framed::with_timeout;
use crate::transport::Transport;

/// Connect to a Unix socket, honouring the configured connect timeout
pub async fn connect(path: &Path, config: &TransportConfig) -> Result<Transport> {
    let stream = with_timeout(config.connect_timeout, "Connect", async {
        UnixStream::connect(path).await.map_err(Error::from)
    })
    .await?;
    Ok(Transport::new(stream, config))
}

/// Unix socket listener for accepting incoming connections
///
/// The socket file is removed when the listener is dropped.
pub struct UnixTransportListener {
    listener: UnixListener,
    path: PathBuf,
    config: TransportConfig,
}

impl UnixTransportListener {
    /// Bind to a Unix socket path
    ///
    /// A leftover socket file nobody listens on is replaced; a live one is
    /// reported as [`Error::AddressInUse`].
    pub async fn bind(path: impl AsRef<Path>, config: TransportConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.exists() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(Error::AddressInUse(path.display().to_string()));
            }
            debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            listener,
            path,
            config,
        })
    }

    /// Accept an incoming connection
    pub async fn accept(&self) -> Result<Transport> {
        let (stream, _) = self.listener.accept().await?;
        Ok(Transport::new(stream, &self.config))
    }

    /// Get the path this listener is bound to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UnixTransportListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}
