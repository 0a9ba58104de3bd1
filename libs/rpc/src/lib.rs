//! Constellation RPC - Typed unary calls over the fabric call protocol
//!
//! Describe a method once with [`Method`], serve it by binding a handler
//! with [`Method::serve`], and call it from a [`Client`]. Codecs turn
//! messages into bytes, an [`ErrorCodec`] turns domain errors into wire
//! statuses and back, and handlers can read the current call's
//! [`RequestContext`] from anywhere in their async call tree.
//!
//! # Example
//!
//! ```no_run
//! use std::convert::Infallible;
//!
//! use constellation_rpc::codec::Utf8Codec;
//! use constellation_rpc::{
//!     Channel, ChannelConfig, HandlerError, Metadata, Method, NoErrors, Server, ServerConfig,
//!     Service,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let say_hello: Method<Infallible, String, String> =
//!     Method::new("test.Greeter/SayHello", Utf8Codec, Utf8Codec, NoErrors);
//! let service = Service::from(say_hello.serve(|_: Metadata, name: String| async move {
//!     Ok::<_, HandlerError<Infallible>>(format!("hello {}", name))
//! }));
//!
//! let reply = Server::scoped(ServerConfig::default(), service, |address| async move {
//!     Channel::scoped(ChannelConfig::new(address), |client| async move {
//!         client.call(&say_hello, "zio".to_string()).await
//!     })
//!     .await
//! })
//! .await???;
//! assert_eq!(reply, "hello zio");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
pub mod error_codec;
pub mod handler;
pub mod method;
pub mod reflection;
pub mod server;
pub mod service;

pub use constellation_core::{Code, CodecError, Metadata, Status};
pub use constellation_fabric::{codec, Address, Codec, TransportConfig};

pub use channel::Channel;
pub use client::{Client, Response};
pub use config::{ChannelConfig, ServerConfig};
pub use context::RequestContext;
pub use error::{ChannelError, ClientError, DescriptorError, ServerError};
pub use error_codec::{
    check_round_trip, ErrorCodec, Mapped, NoErrors, RuleCodec, StatusMapping, StatusRule,
};
pub use handler::{Handler, HandlerError};
pub use method::{Endpoint, Method};
pub use reflection::{MethodDescriptor, ServiceDescriptor};
pub use server::Server;
pub use service::Service;
