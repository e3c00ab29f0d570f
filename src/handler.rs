//! Event handler capabilities and the payloads that flow through them.
//!
//! Application logic is expressed as objects implementing [`Handler`]. A
//! single handler may serve any non-empty subset of the six session events;
//! the subset is declared through [`Handler::capabilities`] and checked when
//! the handler is registered with a
//! [`Pipeline`](crate::pipeline::Pipeline). Rust offers no runtime interface
//! query, so the capability set is an explicit declaration rather than a
//! downcast probe.

use std::any::Any;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::BoxError, session::SessionContext};

/// Bitset of the six session event capabilities.
///
/// Combine with `|`:
///
/// ```
/// use wirechain::handler::Capabilities;
///
/// let caps = Capabilities::READ | Capabilities::WRITE;
/// assert!(caps.contains(Capabilities::READ));
/// assert!(!caps.contains(Capabilities::CONNECT));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    /// `on_connect` participation.
    pub const CONNECT: Self = Self(1);
    /// `on_read` participation.
    pub const READ: Self = Self(1 << 1);
    /// `on_write` participation.
    pub const WRITE: Self = Self(1 << 2);
    /// `on_timeout` participation.
    pub const TIMEOUT: Self = Self(1 << 3);
    /// `on_disconnect` participation.
    pub const DISCONNECT: Self = Self(1 << 4);
    /// `on_error` participation.
    pub const ERROR: Self = Self(1 << 5);

    /// The empty capability set.
    #[must_use]
    pub const fn empty() -> Self { Self(0) }

    /// Whether no capability is declared.
    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    /// Whether every capability in `other` is present in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool { self.0 & other.0 == other.0 }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

/// Value passed along the read and write handler sequences.
///
/// The engine imposes no wire format; a payload starts life as
/// [`Payload::Buffer`] on the inbound path and must end as wire-ready bytes
/// on the outbound path. Handlers in between may replace it with decoded
/// protocol values via [`Payload::Message`].
pub enum Payload {
    /// Nothing to pass on. Later handlers in the chain still run and see an
    /// empty payload; writing it sends nothing.
    Empty,
    /// The session's buffered inbound window. Access the bytes through
    /// [`SessionContext::buffer`]; on the outbound path this writes a
    /// snapshot of the current window.
    Buffer,
    /// Flat bytes, ready for the socket on the outbound path.
    Bytes(Bytes),
    /// A decoded protocol value.
    Message(Box<dyn Any + Send>),
}

impl Payload {
    /// Wrap a decoded protocol value.
    #[must_use]
    pub fn message<T: Any + Send>(value: T) -> Self { Self::Message(Box::new(value)) }

    /// Recover a decoded value of type `T`, returning the payload unchanged
    /// on mismatch.
    ///
    /// # Errors
    ///
    /// Returns `Err(self)` if the payload is not a `Message` of type `T`.
    pub fn downcast<T: Any + Send>(self) -> std::result::Result<Box<T>, Self> {
        match self {
            Self::Message(boxed) => boxed.downcast::<T>().map_err(Self::Message),
            other => Err(other),
        }
    }

    /// Whether this is [`Payload::Empty`].
    #[must_use]
    pub fn is_empty(&self) -> bool { matches!(self, Self::Empty) }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => f.write_str("Payload::Empty"),
            Self::Buffer => f.write_str("Payload::Buffer"),
            Self::Bytes(bytes) => write!(f, "Payload::Bytes({} bytes)", bytes.len()),
            Self::Message(_) => f.write_str("Payload::Message(..)"),
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self { Self::Bytes(bytes) }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self { Self::Bytes(Bytes::from(bytes)) }
}

/// A session event handler.
///
/// Every method has a pass-through default; implementors override the ones
/// matching their declared [`capabilities`](Handler::capabilities). The
/// engine only invokes a method when the corresponding capability is
/// declared, so an overridden method without its capability bit is never
/// called.
///
/// Handlers are shared across sessions behind `Arc` and invoked from each
/// session's dispatcher task, one event at a time per session; per-session
/// state belongs in the [`SessionContext`] or in the payload, not in the
/// handler.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// The event capabilities this handler participates in.
    fn capabilities(&self) -> Capabilities;

    /// Called once when the connection becomes logically open. Returning an
    /// error aborts the session before it opens; disconnect handlers do not
    /// run in that case.
    async fn on_connect(&self, _ctx: &mut SessionContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called for each inbound dispatch pass with the payload produced by
    /// the previous read handler (the first handler sees
    /// [`Payload::Buffer`]). Request [`SessionContext::rollback`] when the
    /// buffered bytes do not yet form a complete protocol unit.
    async fn on_read(
        &self,
        _ctx: &mut SessionContext,
        input: Payload,
    ) -> std::result::Result<Payload, BoxError> {
        Ok(input)
    }

    /// Called for each outbound payload, in reverse registration order. The
    /// last handler to run must leave wire-ready [`Payload::Bytes`].
    async fn on_write(
        &self,
        _ctx: &mut SessionContext,
        output: Payload,
    ) -> std::result::Result<Payload, BoxError> {
        Ok(output)
    }

    /// Called when a read or write deadline elapses.
    async fn on_timeout(&self, _ctx: &mut SessionContext) -> std::result::Result<(), BoxError> {
        Ok(())
    }

    /// Called exactly once when the session leaves the open state.
    /// Best-effort notification; there is no error path.
    async fn on_disconnect(&self, _ctx: &mut SessionContext) {}

    /// Called with every error routed to this session, including errors
    /// returned by other handlers in its chains.
    async fn on_error(&self, _ctx: &mut SessionContext, _error: &crate::Error) {}
}
