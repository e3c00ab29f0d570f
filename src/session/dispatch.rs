//! The session dispatcher task.
//!
//! Single consumer of a session's event queue and sole owner of its buffer.
//! The dispatcher runs the connect chain once, spawns the reader, then
//! drains events until the session scope is cancelled: read-ready events
//! drive the read handler sequence over the buffer, write requests drive
//! the write handler sequence in reverse registration order followed by a
//! deadline-bounded socket write. On every exit path from the open state
//! the socket is shut down and the disconnect chain runs exactly once.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{SessionContext, event::Event, reader};
use crate::{error::Error, handler::Payload, service::SessionConfig};

/// Upper bound on read-dispatch passes per read event.
///
/// The stall check (readable length unchanged across a pass) assumes
/// decoders either consume bytes or roll back; this bound keeps a
/// misbehaving decoder from spinning the dispatcher forever.
const MAX_READ_PASSES: usize = 1024;

pub(super) struct Dispatcher<S> {
    ctx: SessionContext,
    writer: WriteHalf<S>,
    events: mpsc::Receiver<Event>,
    events_tx: mpsc::Sender<Event>,
    config: Arc<SessionConfig>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<S> Dispatcher<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub(super) fn new(
        ctx: SessionContext,
        writer: WriteHalf<S>,
        events: mpsc::Receiver<Event>,
        events_tx: mpsc::Sender<Event>,
        config: Arc<SessionConfig>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            ctx,
            writer,
            events,
            events_tx,
            config,
            cancel,
            tracker,
        }
    }

    pub(super) async fn run(mut self, read_half: ReadHalf<S>) {
        if !self.run_connect_chain().await {
            // The connection never became logically open: close the socket
            // without a disconnect notification.
            self.cancel.cancel();
            let _ = self.writer.shutdown().await;
            return;
        }
        // Connect handlers may already have queued outbound payloads.
        self.drain_outbox().await;

        self.tracker.spawn(reader::read_loop(
            read_half,
            self.events_tx.clone(),
            self.cancel.clone(),
            self.config.read_timeout,
        ));

        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => break,
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle_event(event).await;
            self.drain_outbox().await;
        }

        self.cancel.cancel();
        let _ = self.writer.shutdown().await;
        self.run_disconnect_chain().await;
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Read(bytes) => {
                self.ctx.buffer_mut().write(&bytes);
                self.dispatch_read().await;
            }
            Event::Write(payload) => self.dispatch_write(payload).await,
            Event::Timeout => self.run_timeout_chain().await,
            Event::Error(error) => {
                // Terminal transport failure: error handlers see the live
                // context, then the session closes.
                self.run_error_chain(&error).await;
                self.cancel.cancel();
            }
        }
    }

    /// Drive the read handler sequence over the buffer until it is empty or
    /// a full pass leaves it unchanged (a stalled, incomplete frame).
    async fn dispatch_read(&mut self) {
        for _ in 0..MAX_READ_PASSES {
            let remain = self.ctx.buffer().readable_len();
            let mut payload = Payload::Buffer;
            let mut failure: Option<Error> = None;

            for handler in self.config.pipeline.read_handlers() {
                if self.cancel.is_cancelled() {
                    return;
                }
                match handler.on_read(&mut self.ctx, payload).await {
                    Ok(next) => payload = next,
                    Err(error) => {
                        failure = Some(Error::Handler(error));
                        break;
                    }
                }
                if self.ctx.is_rollback() {
                    break;
                }
            }

            if self.ctx.is_rollback() || failure.is_some() {
                if self.ctx.is_rollback() {
                    self.ctx.buffer_mut().rollback();
                }
                if let Some(error) = failure {
                    self.run_error_chain(&error).await;
                }
                // Commit also clears the rollback flag; leftover bytes stay
                // buffered for the next read.
                self.ctx.commit();
                return;
            }

            self.ctx.commit();
            let readable = self.ctx.buffer().readable_len();
            if readable == 0 || readable == remain {
                return;
            }
            // More than one complete unit arrived in a single socket read.
        }
        log::warn!("read dispatch pass limit reached; returning to the event loop");
    }

    /// Run the write handler sequence (reverse registration order) and send
    /// the resulting bytes, retrying partial writes under the write deadline.
    async fn dispatch_write(&mut self, payload: Payload) {
        let mut out = payload;
        for handler in self.config.pipeline.write_handlers() {
            if self.cancel.is_cancelled() {
                return;
            }
            out = match handler.on_write(&mut self.ctx, out).await {
                Ok(next) => next,
                Err(error) => {
                    self.run_error_chain(&Error::Handler(error)).await;
                    return;
                }
            };
        }

        let bytes = match out {
            Payload::Bytes(bytes) => bytes,
            Payload::Buffer => Bytes::copy_from_slice(self.ctx.buffer().data()),
            Payload::Empty => return,
            Payload::Message(_) => {
                self.run_error_chain(&Error::UnencodedWrite).await;
                return;
            }
        };
        self.write_wire(&bytes).await;
    }

    async fn write_wire(&mut self, bytes: &[u8]) {
        let mut written = 0;
        while written < bytes.len() {
            let result = match self.config.write_timeout {
                Some(limit) => match timeout(limit, self.writer.write(&bytes[written..])).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        self.run_timeout_chain().await;
                        return;
                    }
                },
                None => self.writer.write(&bytes[written..]).await,
            };
            match result {
                Ok(0) => {
                    let error = Error::Io(std::io::ErrorKind::WriteZero.into());
                    self.run_error_chain(&error).await;
                    return;
                }
                Ok(n) => written += n,
                Err(error) => {
                    self.run_error_chain(&Error::Io(error)).await;
                    return;
                }
            }
        }
    }

    async fn drain_outbox(&mut self) {
        while let Some(payload) = self.ctx.take_queued_write() {
            if self.cancel.is_cancelled() {
                return;
            }
            self.dispatch_write(payload).await;
        }
    }

    async fn run_connect_chain(&mut self) -> bool {
        let mut failure: Option<Error> = None;
        for handler in self.config.pipeline.connect_handlers() {
            if self.cancel.is_cancelled() {
                return false;
            }
            if let Err(error) = handler.on_connect(&mut self.ctx).await {
                failure = Some(Error::Handler(error));
                break;
            }
        }
        if let Some(error) = failure {
            self.run_error_chain(&error).await;
            return false;
        }
        true
    }

    async fn run_timeout_chain(&mut self) {
        let mut failure: Option<Error> = None;
        for handler in self.config.pipeline.timeout_handlers() {
            if self.cancel.is_cancelled() {
                return;
            }
            if let Err(error) = handler.on_timeout(&mut self.ctx).await {
                failure = Some(Error::Handler(error));
                break;
            }
        }
        if let Some(error) = failure {
            self.run_error_chain(&error).await;
        }
    }

    async fn run_error_chain(&mut self, error: &Error) {
        for handler in self.config.pipeline.error_handlers() {
            if self.cancel.is_cancelled() {
                return;
            }
            handler.on_error(&mut self.ctx, error).await;
        }
    }

    /// Best-effort notifications; runs after the session scope is cancelled,
    /// so no liveness guard applies.
    async fn run_disconnect_chain(&mut self) {
        for handler in self.config.pipeline.disconnect_handlers() {
            handler.on_disconnect(&mut self.ctx).await;
        }
    }
}
