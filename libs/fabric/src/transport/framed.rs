use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::TransportConfig;
use crate::error::{Error, Result};

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// Run `op` under an optional deadline
pub(crate) async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    operation: &'static str,
    op: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| Error::Timeout(operation))?,
        None => op.await,
    }
}

fn eof_as_closed(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ConnectionClosed
    } else {
        e.into()
    }
}

/// Read half of a length-prefixed connection
///
/// Frames carry a 4-byte big-endian length prefix.
pub struct FramedReader {
    inner: BoxedRead,
    receive_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl FramedReader {
    pub fn new(inner: impl AsyncRead + Unpin + Send + 'static, config: &TransportConfig) -> Self {
        Self {
            inner: Box::new(inner),
            receive_timeout: config.receive_timeout,
            max_frame_size: config.max_frame_size,
        }
    }

    /// Read the next frame
    ///
    /// Waiting for a frame to start is unbounded; the receive timeout covers
    /// the rest of the frame once its first byte has arrived. A peer that
    /// disconnects yields [`Error::ConnectionClosed`].
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let max = self.max_frame_size;
        let timeout = self.receive_timeout;
        let first = self.inner.read_u8().await.map_err(eof_as_closed)?;
        let inner = &mut self.inner;

        with_timeout(timeout, "Receive", async move {
            let mut rest = [0u8; 3];
            inner.read_exact(&mut rest).await.map_err(eof_as_closed)?;
            let len = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]) as usize;
            if len > max {
                return Err(Error::InvalidFrame(format!(
                    "Message too large: {} bytes (max {})",
                    len, max
                )));
            }

            let mut buf = vec![0u8; len];
            inner.read_exact(&mut buf).await.map_err(eof_as_closed)?;
            Ok::<Vec<u8>, Error>(buf)
        })
        .await
    }
}

/// Write half of a length-prefixed connection
pub struct FramedWriter {
    inner: BoxedWrite,
    send_timeout: Option<Duration>,
    max_frame_size: usize,
}

impl FramedWriter {
    pub fn new(inner: impl AsyncWrite + Unpin + Send + 'static, config: &TransportConfig) -> Self {
        Self {
            inner: Box::new(inner),
            send_timeout: config.send_timeout,
            max_frame_size: config.max_frame_size,
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_frame_size {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes (max {})",
                bytes.len(),
                self.max_frame_size
            )));
        }

        let timeout = self.send_timeout;
        let inner = &mut self.inner;

        with_timeout(timeout, "Send", async move {
            inner.write_u32(bytes.len() as u32).await?;
            inner.write_all(bytes).await?;
            inner.flush().await?;
            Ok::<(), Error>(())
        })
        .await
    }

    /// Shut down the write direction
    pub async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
