//! Messages flowing from the reader task (and external writers) to the
//! dispatcher task.

use bytes::Bytes;

use crate::{error::Error, handler::Payload};

/// One unit of work for a session's dispatcher.
///
/// Events are delivered in FIFO order over a bounded queue. Bytes read from
/// the socket travel inside the `Read` event itself, which keeps the
/// session's buffer exclusively owned by the dispatcher: a read-ready event
/// can never refer to bytes that are not yet visible.
pub(crate) enum Event {
    /// Bytes read from the socket, to be appended to the session buffer and
    /// driven through the read handler sequence.
    Read(Bytes),
    /// An outbound payload for the write handler sequence.
    Write(Payload),
    /// A socket read stalled past the configured deadline.
    Timeout,
    /// A fatal socket error. The dispatcher routes it through the error
    /// handler sequence and then closes the session.
    Error(Error),
}
