//! TCP client: one dialed connection driven by one session.
//!
//! A [`TcpClient`]'s cancellation scope *is* its session's scope: stopping
//! the client closes the connection, and the peer closing the connection
//! stops the client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::{Error, Result},
    handler::{Handler, Payload},
    service::{Service, Settings},
    session::{self, SessionHandle},
};

/// A client dialing a single plain TCP connection.
///
/// # Examples
///
/// ```no_run
/// # async fn run() -> wirechain::Result<()> {
/// use bytes::Bytes;
/// use wirechain::TcpClient;
///
/// let mut client = TcpClient::new();
/// client.set_address("127.0.0.1:9999");
/// client.start().await?;
/// client.write(Bytes::from_static(b"ping")).await?;
/// client.wait_for_done().await;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct TcpClient {
    settings: Settings,
    runtime: Option<ClientRuntime>,
}

pub(crate) struct ClientRuntime {
    pub(crate) cancel: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) session: SessionHandle,
}

impl TcpClient {
    /// Create an unconfigured client.
    #[must_use]
    pub fn new() -> Self { Self::default() }

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

    /// Dial the remote address and spawn the session.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AlreadyStarted`] when already running, or with
    /// the underlying I/O error when the dial fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyStarted);
        }
        let stream = TcpStream::connect(self.settings.checked_address()?).await?;
        if let Err(e) = self.settings.socket_options.apply(&stream) {
            log::warn!("failed to apply socket options: error={e}");
        }
        let peer = stream.peer_addr().ok();
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

    /// Remote address of the dialed connection, when started.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.runtime.as_ref().and_then(|runtime| runtime.session.peer_addr())
    }

    fn is_running(&self) -> bool {
        self.runtime
            .as_ref()
            .is_some_and(|runtime| !runtime.cancel.is_cancelled())
    }
}

/// Spawn the session for a dialed connection under a fresh root scope.
/// Shared with [`TlsClient`](crate::tls::TlsClient), which wraps the stream
/// before spawning.
pub(crate) fn spawn_client_session<S>(
    settings: &Settings,
    stream: S,
    peer: Option<SocketAddr>,
) -> ClientRuntime
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let session = session::spawn(stream, peer, settings.session_config(), cancel.clone(), &tracker);
    tracker.close();
    ClientRuntime {
        cancel,
        tracker,
        session,
    }
}

#[async_trait]
impl Service for TcpClient {
    fn set_address(&mut self, address: &str) { Self::set_address(self, address); }

    fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        Self::add_handler(self, handler)
    }

    async fn start(&mut self) -> Result<()> { Self::start(self).await }

    fn stop(&mut self) { Self::stop(self); }

    async fn wait_for_done(&self) { Self::wait_for_done(self).await; }
}
