use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use constellation_fabric::{Address, ClientConnection};
use tracing::{debug, info};

use crate::client::Client;
use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// Client side of one connection to a server
///
/// Any number of [`Client`]s can share a channel; shutting it down fails
/// their pending and future calls.
pub struct Channel {
    connection: ClientConnection,
    closed: AtomicBool,
}

impl Channel {
    pub async fn connect(config: ChannelConfig) -> Result<Channel, ChannelError> {
        let connection = ClientConnection::connect(&config.address, &config.transport)
            .await
            .map_err(|e| ChannelError::ConnectionFailed {
                address: config.address.to_string(),
                cause: e.to_string(),
            })?;
        info!(address = %config.address, "Channel connected");

        Ok(Channel {
            connection,
            closed: AtomicBool::new(false),
        })
    }

    /// Run `body` with a client on a fresh channel, shutting it down afterwards
    ///
    /// The channel is shut down whether `body` completes, panics or is dropped.
    pub async fn scoped<F, Fut, T>(config: ChannelConfig, body: F) -> Result<T, ChannelError>
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = T>,
    {
        let channel = Channel::connect(config).await?;
        let output = body(Client::new(&channel)).await;
        channel.shutdown();
        Ok(output)
    }

    pub fn address(&self) -> &Address {
        self.connection.address()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.connection.is_open()
    }

    /// Close the connection; later calls do nothing
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(address = %self.connection.address(), "Shutting down channel");
        self.connection.close();
    }

    pub(crate) fn connection(&self) -> &ClientConnection {
        &self.connection
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("address", self.connection.address())
            .field("closed", &self.closed)
            .finish()
    }
}
