//! Per-connection session engine.
//!
//! A session owns exactly one connection and drives the shared
//! [`Pipeline`](crate::pipeline::Pipeline) through the connection's
//! lifecycle with two tasks:
//!
//! - the *reader* task blocks in socket reads (bounded by the optional read
//!   deadline) and forwards what it learns as events;
//! - the *dispatcher* task drains the event queue in FIFO order and is the
//!   only code that touches the session's [`ElasticBuffer`] or invokes
//!   handlers.
//!
//! The two tasks coordinate exclusively through a bounded event queue and
//! the session's cancellation token; no locks guard the hot path. Write
//! requests may arrive concurrently from any task via [`SessionHandle`] and
//! are serialized by the dispatcher, so concurrent writers never interleave
//! bytes on the wire.

mod dispatch;
mod event;
mod reader;

use std::{collections::VecDeque, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    buffer::ElasticBuffer,
    error::{Error, Result},
    handler::Payload,
    service::SessionConfig,
};
use dispatch::Dispatcher;
use event::Event;

/// Cloneable handle for interacting with a live session from any task.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
    peer: Option<SocketAddr>,
}

impl SessionHandle {
    /// Enqueue `payload` for the write handler sequence.
    ///
    /// The write happens asynchronously on the session's dispatcher task;
    /// this call returns once the request is queued, applying backpressure
    /// when the event queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if the session has shut down.
    pub async fn write(&self, payload: impl Into<Payload> + Send) -> Result<()> {
        self.events
            .send(Event::Write(payload.into()))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Request that the session close its connection.
    pub fn close(&self) { self.cancel.cancel(); }

    /// Whether the session's cancellation scope has been triggered.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.cancel.is_cancelled() }

    /// Remote address of the connection, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The session state handlers operate on.
///
/// Exposes the inbound buffer with its transactional read semantics, the
/// rollback request flag, and the session's write and close operations.
/// Handlers receive `&mut SessionContext`; the context never outlives its
/// session.
pub struct SessionContext {
    buffer: ElasticBuffer,
    rollback: bool,
    outbox: VecDeque<Payload>,
    handle: SessionHandle,
}

impl SessionContext {
    pub(crate) fn new(handle: SessionHandle) -> Self {
        Self {
            buffer: ElasticBuffer::new(),
            rollback: false,
            outbox: VecDeque::new(),
            handle,
        }
    }

    /// The session's inbound buffer.
    #[must_use]
    pub fn buffer(&self) -> &ElasticBuffer { &self.buffer }

    /// Mutable access to the inbound buffer for consuming decoded bytes.
    pub fn buffer_mut(&mut self) -> &mut ElasticBuffer { &mut self.buffer }

    /// Request that the current read dispatch be rolled back to the last
    /// commit point, typically because the buffered bytes do not yet form a
    /// complete protocol unit.
    pub fn rollback(&mut self) { self.rollback = true; }

    /// Whether a rollback request is pending.
    #[must_use]
    pub fn is_rollback(&self) -> bool { self.rollback }

    /// Commit the bytes consumed so far and clear any rollback request.
    pub fn commit(&mut self) {
        self.rollback = false;
        self.buffer.commit();
    }

    /// Queue `payload` for the write handler sequence.
    ///
    /// The dispatcher drains queued writes after the current handler chain
    /// completes, so a handler can never deadlock itself against the
    /// session's own event queue.
    pub fn write(&mut self, payload: impl Into<Payload>) {
        self.outbox.push_back(payload.into());
    }

    /// Request that the session close its connection.
    pub fn close(&self) { self.handle.close(); }

    /// A cloneable handle usable outside the handler call, e.g. for server
    /// pushes from unrelated tasks.
    #[must_use]
    pub fn handle(&self) -> SessionHandle { self.handle.clone() }

    /// Remote address of the connection, when known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.handle.peer_addr() }

    pub(crate) fn take_queued_write(&mut self) -> Option<Payload> { self.outbox.pop_front() }
}

/// Spawn the reader and dispatcher tasks for one established connection.
///
/// `cancel` is the session's own scope: a child of the owning server's root
/// token, or the client's root token itself.
pub(crate) fn spawn<S>(
    stream: S,
    peer: Option<SocketAddr>,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
    tracker: &TaskTracker,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (events_tx, events_rx) = mpsc::channel(config.queue_size);
    let handle = SessionHandle {
        events: events_tx.clone(),
        cancel: cancel.clone(),
        peer,
    };
    let (read_half, write_half) = tokio::io::split(stream);
    let dispatcher = Dispatcher::new(
        SessionContext::new(handle.clone()),
        write_half,
        events_rx,
        events_tx,
        config,
        cancel,
        tracker.clone(),
    );
    tracker.spawn(dispatcher.run(read_half));
    handle
}
