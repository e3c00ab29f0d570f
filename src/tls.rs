//! TLS server and client, a drop-in stream decorator over the TCP variants.
//!
//! The session engine is generic over its stream, so TLS support is a thin
//! layer: accept or dial a TCP connection, wrap it with a rustls handshake,
//! and hand the encrypted stream to an ordinary session. A failed handshake
//! affects only that connection; the listener keeps accepting.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{
    client::{ClientRuntime, spawn_client_session},
    error::{Error, Result},
    handler::{Handler, Payload},
    server::{ServerRuntime, start_server},
    service::{Service, Settings},
    session::SessionHandle,
};

/// A server accepting TLS connections.
pub struct TlsServer {
    settings: Settings,
    acceptor: TlsAcceptor,
    runtime: Option<ServerRuntime>,
}

impl TlsServer {
    /// Create a server that wraps every accepted connection with `config`.
    #[must_use]
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            settings: Settings::default(),
            acceptor: TlsAcceptor::from(config),
            runtime: None,
        }
    }

    /// Set the bind address, in `host:port` form.
    pub fn set_address(&mut self, address: &str) { self.settings.address = address.to_owned(); }

    /// Set the read and write deadlines applied to every session's I/O
    /// calls.
    pub fn set_timeout(&mut self, read: Option<Duration>, write: Option<Duration>) {
        self.settings.read_timeout = read;
        self.settings.write_timeout = write;
    }

    /// Control Nagle's algorithm on accepted connections.
    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.settings.socket_options.no_delay = Some(no_delay);
    }

    /// Enable or disable TCP keep-alive, optionally with an idle period.
    pub fn set_keep_alive(&mut self, keep_alive: bool, period: Option<Duration>) {
        self.settings.socket_options.keep_alive = Some(keep_alive);
        self.settings.socket_options.keep_alive_period = period;
    }

    /// Set the close-linger duration on accepted connections.
    pub fn set_linger(&mut self, linger: Duration) {
        self.settings.socket_options.linger = Some(linger);
    }

    /// Set the kernel receive buffer size on accepted connections.
    pub fn set_read_buffer(&mut self, bytes: usize) {
        self.settings.socket_options.read_buffer = Some(bytes);
    }

    /// Set the kernel send buffer size on accepted connections.
    pub fn set_write_buffer(&mut self, bytes: usize) {
        self.settings.socket_options.write_buffer = Some(bytes);
    }

    /// Register a handler for session events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapability`] if the handler declares no
    /// capability.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        self.settings.pipeline.register(handler)
    }

    /// Bind the listener and launch the accept loop; each accepted
    /// connection completes a TLS handshake before its session spawns.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] when already running, or with
    /// the underlying I/O error when binding fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        let acceptor = self.acceptor.clone();
        let runtime = start_server(&self.settings, move |stream| {
            let acceptor = acceptor.clone();
            async move { acceptor.accept(stream).await.map_err(handshake_error) }
        })
        .await?;
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Cancel the root scope, closing every live session.
    pub fn stop(&mut self) {
        if let Some(runtime) = &self.runtime {
            runtime.cancel.cancel();
        }
    }

    /// Block until shutdown completes. Returns immediately if never
    /// started.
    pub async fn wait_for_done(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.cancel.cancelled().await;
            runtime.tracker.wait().await;
        }
    }

    /// The error that stopped the server, or `None` after a clean stop.
    #[must_use]
    pub fn error(&self) -> Option<Arc<Error>> {
        self.runtime.as_ref().and_then(|runtime| runtime.error.get())
    }

    /// Local address of the bound listener.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.runtime.as_ref().map(|runtime| runtime.local_addr)
    }

    fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| !runtime.cancel.is_cancelled())
    }
}

#[async_trait]
impl Service for TlsServer {
    fn set_address(&mut self, address: &str) { Self::set_address(self, address); }

    fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        Self::add_handler(self, handler)
    }

    async fn start(&mut self) -> Result<()> { Self::start(self).await }

    fn stop(&mut self) { Self::stop(self); }

    async fn wait_for_done(&self) { Self::wait_for_done(self).await; }
}

/// A client dialing a single TLS connection.
pub struct TlsClient {
    settings: Settings,
    connector: TlsConnector,
    server_name: ServerName<'static>,
    runtime: Option<ClientRuntime>,
}

impl TlsClient {
    /// Create a client that wraps the dialed connection with `config`,
    /// verifying the peer as `server_name`.
    #[must_use]
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            settings: Settings::default(),
            connector: TlsConnector::from(config),
            server_name,
            runtime: None,
        }
    }

    /// Set the remote address to dial, in `host:port` form.
    pub fn set_address(&mut self, address: &str) { self.settings.address = address.to_owned(); }

    /// Set the read and write deadlines applied to the session's I/O calls.
    pub fn set_timeout(&mut self, read: Option<Duration>, write: Option<Duration>) {
        self.settings.read_timeout = read;
        self.settings.write_timeout = write;
    }

    /// Control Nagle's algorithm on the dialed connection.
    pub fn set_no_delay(&mut self, no_delay: bool) {
        self.settings.socket_options.no_delay = Some(no_delay);
    }

    /// Enable or disable TCP keep-alive, optionally with an idle period.
    pub fn set_keep_alive(&mut self, keep_alive: bool, period: Option<Duration>) {
        self.settings.socket_options.keep_alive = Some(keep_alive);
        self.settings.socket_options.keep_alive_period = period;
    }

    /// Register a handler for session events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapability`] if the handler declares no
    /// capability.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        self.settings.pipeline.register(handler)
    }

    /// Dial, complete the TLS handshake, and spawn the session.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] when already running, or with
    /// the underlying I/O error when the dial or handshake fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        let stream = TcpStream::connect(self.settings.checked_address()?).await?;
        if let Err(e) = self.settings.socket_options.apply(&stream) {
            log::warn!("failed to apply socket options: error={e}");
        }
        let peer = stream.peer_addr().ok();
        let stream = self
            .connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(handshake_error)?;
        self.runtime = Some(spawn_client_session(&self.settings, stream, peer));
        Ok(())
    }

    /// Enqueue `payload` for the session's write handler sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotStarted`] before [`start`](Self::start), or
    /// [`Error::SessionClosed`] once the connection has shut down.
    pub async fn write(&self, payload: impl Into<Payload> + Send) -> Result<()> {
        match &self.runtime {
            Some(runtime) => runtime.session.write(payload).await,
            None => Err(Error::NotStarted),
        }
    }

    /// Close the connection.
    pub fn stop(&mut self) {
        if let Some(runtime) = &self.runtime {
            runtime.cancel.cancel();
        }
    }

    /// Block until the session has shut down. Returns immediately if never
    /// started.
    pub async fn wait_for_done(&self) {
        if let Some(runtime) = &self.runtime {
            runtime.cancel.cancelled().await;
            runtime.tracker.wait().await;
        }
    }

    /// Handle of the live session, when started.
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.runtime.as_ref().map(|runtime| runtime.session.clone())
    }

    fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| !runtime.cancel.is_cancelled())
    }
}

#[async_trait]
impl Service for TlsClient {
    fn set_address(&mut self, address: &str) { Self::set_address(self, address); }

    fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        Self::add_handler(self, handler)
    }

    async fn start(&mut self) -> Result<()> { Self::start(self).await }

    fn stop(&mut self) { Self::stop(self); }

    async fn wait_for_done(&self) { Self::wait_for_done(self).await; }
}

/// Recover the `rustls::Error` that `tokio-rustls` wraps inside the
/// handshake's `io::Error`, falling back to the I/O arm for genuine socket
/// failures during the handshake.
fn handshake_error(error: std::io::Error) -> Error {
    match error.downcast::<rustls::Error>() {
        Ok(tls) => Error::Tls(tls),
        Err(io) => Error::Io(io),
    }
}
