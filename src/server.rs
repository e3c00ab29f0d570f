//! TCP server: accept loop, child session scopes, terminal-error tracking.
//!
//! A [`TcpServer`] owns the listening socket and a root cancellation scope.
//! Every accepted connection gets a session whose scope is a child of the
//! server's, so stopping the server cancels every live session while the
//! failure of one session never affects its siblings or the listener.

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    handler::Handler,
    service::{ErrorSlot, Service, SessionConfig, Settings},
    session,
    sockopt::SocketOptions,
};

/// A server accepting plain TCP connections.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use wirechain::{Capabilities, Handler, TcpServer};
///
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Handler for Echo {
///     fn capabilities(&self) -> Capabilities { Capabilities::READ }
/// }
///
/// # async fn run() -> wirechain::Result<()> {
/// let mut server = TcpServer::new();
/// server.set_address("127.0.0.1:9999");
/// server.add_handler(Arc::new(Echo))?;
/// server.start().await?;
/// server.wait_for_done().await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TcpServer {
    settings: Settings,
    runtime: Option<ServerRuntime>,
}

/// Live state of a started server, shared by TCP and TLS variants.
pub(crate) struct ServerRuntime {
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) error: ErrorSlot,
    pub(crate) local_addr: SocketAddr,
}

impl TcpServer {
    /// Create an unconfigured server.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Set the bind address, in `host:port` form.
    pub fn set_address(&mut self, address: &str) { self.settings.address = address.to_owned(); }

    /// Set the read and write deadlines applied to every session's I/O
    /// calls. `None` disables the corresponding deadline.
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

    /// Bind the listener and launch the accept loop.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] when already running, or with
    /// the underlying I/O error when binding fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        let runtime = start_server(&self.settings, |stream| std::future::ready(Ok(stream))).await?;
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Cancel the root scope; every live session shuts down in an orderly
    /// fashion (socket close, disconnect notification).
    pub fn stop(&mut self) {
        if let Some(runtime) = &self.runtime {
            runtime.cancel.cancel();
        }
    }

    /// Block until the root scope is cancelled, the listener is closed, and
    /// all sessions have drained. Returns immediately if never started.
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

    /// Local address of the bound listener, useful with ephemeral ports.
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
impl Service for TcpServer {
    fn set_address(&mut self, address: &str) { Self::set_address(self, address); }

    fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        Self::add_handler(self, handler)
    }

    async fn start(&mut self) -> Result<()> { Self::start(self).await }

    fn stop(&mut self) { Self::stop(self); }

    async fn wait_for_done(&self) { Self::wait_for_done(self).await; }
}

/// Bind, spawn the accept loop under a fresh root scope, and hand back the
/// runtime. `wrap` decorates each accepted stream (identity for plain TCP,
/// a TLS handshake for [`TlsServer`](crate::tls::TlsServer)).
pub(crate) async fn start_server<W, Fut, S>(settings: &Settings, wrap: W) -> Result<ServerRuntime>
where
    W: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let listener = TcpListener::bind(settings.checked_address()?).await?;
    let local_addr = listener.local_addr()?;
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let error = ErrorSlot::default();

    tracker.spawn(accept_loop(
        listener,
        settings.session_config(),
        settings.socket_options,
        cancel.clone(),
        tracker.clone(),
        error.clone(),
        wrap,
    ));
    tracker.close();

    Ok(ServerRuntime {
        cancel,
        tracker,
        error,
        local_addr,
    })
}

async fn accept_loop<W, Fut, S>(
    listener: TcpListener,
    config: Arc<SessionConfig>,
    socket_options: SocketOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    error: ErrorSlot,
    wrap: W,
) where
    W: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<S>> + Send + 'static,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    loop {
        let accepted = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = socket_options.apply(&stream) {
                    log::warn!("failed to apply socket options: peer={peer}, error={e}");
                }
                let child = cancel.child_token();
                let config = Arc::clone(&config);
                let session_tracker = tracker.clone();
                let setup = wrap(stream);
                tracker.spawn(async move {
                    match setup.await {
                        Ok(stream) => {
                            session::spawn(stream, Some(peer), config, child, &session_tracker);
                        }
                        Err(e) => log::warn!("connection setup failed: peer={peer}, error={e}"),
                    }
                });
            }
            // Transient accept failures are retried immediately and never
            // surfaced to the application.
            Err(e) if is_transient(&e) => continue,
            Err(e) => {
                log::error!("accept failed, stopping server: {e}");
                error.set(Error::Io(e));
                cancel.cancel();
                break;
            }
        }
    }
    // The listener drops here, closing the socket before the tracker drains.
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}
