//! Protocol-agnostic TCP/TLS stream-networking engine.
//!
//! `wirechain` turns a raw byte stream into a sequence of handler
//! invocations. An application registers [`Handler`]s on a server or
//! client; each established connection gets a *session* that buffers
//! inbound bytes in an [`ElasticBuffer`] with commit/rollback semantics and
//! drives the handlers through the connection's lifecycle: connect, read,
//! write, timeout, disconnect, and error.
//!
//! The crate never interprets payload bytes. Framing, parsing, and
//! serialization belong to the handlers; the engine supplies ordered
//! delivery, transactional buffering for partial frames, per-call I/O
//! deadlines, and hierarchical cancellation so that stopping a service
//! closes every live session.
//!
//! # Examples
//!
//! An echo server:
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bytes::Bytes;
//! use wirechain::{Capabilities, Handler, Payload, SessionContext, TcpServer};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Handler for Echo {
//!     fn capabilities(&self) -> Capabilities { Capabilities::READ }
//!
//!     async fn on_read(
//!         &self,
//!         ctx: &mut SessionContext,
//!         input: Payload,
//!     ) -> Result<Payload, wirechain::BoxError> {
//!         let data = Bytes::copy_from_slice(ctx.buffer().data());
//!         let len = data.len();
//!         ctx.buffer_mut().consume(len);
//!         ctx.write(data);
//!         Ok(input)
//!     }
//! }
//!
//! # async fn run() -> wirechain::Result<()> {
//! let mut server = TcpServer::new();
//! server.set_address("127.0.0.1:7000");
//! server.add_handler(Arc::new(Echo))?;
//! server.start().await?;
//! server.wait_for_done().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod error;
pub mod handler;
pub mod pipeline;
pub mod server;
pub mod service;
pub mod session;
mod sockopt;
pub mod tls;

pub use buffer::ElasticBuffer;
pub use client::TcpClient;
pub use error::{BoxError, Error, Result};
pub use handler::{Capabilities, Handler, Payload};
pub use pipeline::Pipeline;
pub use server::TcpServer;
pub use service::Service;
pub use session::{SessionContext, SessionHandle};
pub use tls::{TlsClient, TlsServer};
