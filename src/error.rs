//! Canonical error and result types for the crate.
//!
//! The engine distinguishes configuration mistakes (caught synchronously at
//! the call site) from runtime transport failures (routed to the registered
//! error handlers of the affected session).

use std::io;

use thiserror::Error;

/// Boxed error returned by application handlers.
///
/// Handler implementations surface whatever error type suits their protocol;
/// the engine wraps it in [`Error::Handler`] before routing it to the error
/// handler sequence.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Top-level error type exposed by `wirechain`.
#[derive(Debug, Error)]
pub enum Error {
    /// A handler was registered that implements none of the six event
    /// capabilities.
    #[error("handler implements no event capability")]
    NoCapability,

    /// `start` was called on a service that is already running.
    #[error("service is already started")]
    AlreadyStarted,

    /// An operation requiring a live connection was called before `start`.
    #[error("service is not started")]
    NotStarted,

    /// The configured bind or dial address is unusable.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A write was requested on a session that has already shut down.
    #[error("session is closed")]
    SessionClosed,

    /// The write handler sequence finished without producing wire bytes.
    #[error("write pipeline produced no wire bytes")]
    UnencodedWrite,

    /// An application handler returned an error.
    #[error("handler error: {0}")]
    Handler(#[source] BoxError),

    /// An error in the underlying transport.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A TLS-layer failure while wrapping a connection.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}

impl Error {
    /// Wrap a handler-supplied error for routing through the error chain.
    pub fn handler(error: impl Into<BoxError>) -> Self { Self::Handler(error.into()) }
}

/// Canonical result alias used by `wirechain` public APIs.
pub type Result<T> = std::result::Result<T, Error>;
