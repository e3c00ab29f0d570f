//! Shared service surface and per-session configuration.
//!
//! A service is either a listening server or a dialing client. Both own a
//! root cancellation scope, a handler [`Pipeline`], and the timeout
//! configuration applied to every session they create. The [`Service`]
//! trait is the uniform lifecycle surface, letting tests and embedding code
//! drive a server and a client through the same calls.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    handler::Handler,
    pipeline::Pipeline,
    sockopt::SocketOptions,
};

/// Default depth of each session's event queue.
pub(crate) const DEFAULT_QUEUE_SIZE: usize = 32;

/// Immutable per-session configuration shared by every session a service
/// spawns.
pub(crate) struct SessionConfig {
    pub(crate) pipeline: Pipeline,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) queue_size: usize,
}

/// Builder-side settings common to all service types.
#[derive(Clone, Default)]
pub(crate) struct Settings {
    pub(crate) address: String,
    pub(crate) pipeline: Pipeline,
    pub(crate) socket_options: SocketOptions,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

impl Settings {
    /// The configured address, rejecting the unset default up front so bind
    /// and dial failures report a configuration mistake, not an I/O error.
    pub(crate) fn checked_address(&self) -> Result<&str> {
        if self.address.trim().is_empty() {
            return Err(Error::InvalidAddress(self.address.clone()));
        }
        Ok(&self.address)
    }

    pub(crate) fn session_config(&self) -> Arc<SessionConfig> {
        Arc::new(SessionConfig {
            pipeline: self.pipeline.clone(),
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            queue_size: DEFAULT_QUEUE_SIZE,
        })
    }
}

/// Terminal-error slot for a running service; first error wins.
#[derive(Clone, Default)]
pub(crate) struct ErrorSlot(Arc<Mutex<Option<Arc<Error>>>>);

impl ErrorSlot {
    pub(crate) fn set(&self, error: Error) {
        let mut slot = self.0.lock().expect("error slot lock poisoned");
        if slot.is_none() {
            *slot = Some(Arc::new(error));
        }
    }

    pub(crate) fn get(&self) -> Option<Arc<Error>> {
        self.0.lock().expect("error slot lock poisoned").clone()
    }
}

/// Uniform lifecycle surface implemented by every server and client type.
#[async_trait]
pub trait Service: Send {
    /// Set the bind or dial address, in `host:port` form.
    fn set_address(&mut self, address: &str);

    /// Register a handler for session events.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCapability`] if the handler declares no
    /// capability.
    fn add_handler(&mut self, handler: Arc<dyn Handler>) -> Result<()>;

    /// Start the service: bind and accept for servers, dial for clients.
    ///
    /// # Errors
    ///
    /// Fails fast with [`Error::AlreadyStarted`] when already running, or
    /// with the underlying I/O error when bind/dial fails. No session is
    /// created on failure.
    async fn start(&mut self) -> Result<()>;

    /// Cancel the root scope, closing every live session.
    fn stop(&mut self);

    /// Block until the root scope is cancelled and shutdown has completed.
    async fn wait_for_done(&self);
}
