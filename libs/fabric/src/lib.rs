//! Constellation Fabric - Transport and call protocol layer
//!
//! Provides framed transports (TCP, Unix sockets), message codecs
//! (bincode, JSON, raw bytes, UTF-8 text) and a small multiplexed call
//! protocol with a callback-driven server side and a future-based client
//! side. Typed request handling lives one layer up, in `constellation-rpc`.
//!
//! # Example
//!
//! ```no_run
//! use constellation_core::Metadata;
//! use constellation_fabric::{Address, ClientConnection, TransportConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let address: Address = "127.0.0.1:50051".parse()?;
//! let connection = ClientConnection::connect(&address, &TransportConfig::default()).await?;
//! let response = connection
//!     .unary("echo.Echo/Say", Metadata::new(), b"hello".to_vec())
//!     .await?;
//! println!("{:?}", response.payload);
//! connection.close();
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod server;
pub mod transport;
pub mod wire;

// Re-exports for convenience
pub use client::{ClientConnection, UnaryResponse};
pub use codec::Codec;
pub use config::TransportConfig;
pub use error::{CallError, Error, Result};
pub use server::{serve_connection, CallHandler, CallListener, Registry, ServerCall, ServiceDefinition};
pub use transport::{Address, Listener, Transport};
