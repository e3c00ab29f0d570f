//! The session reader task.
//!
//! Loops on socket reads, bounded per call by the optional read deadline,
//! and reports outcomes to the dispatcher as events: data becomes `Read`,
//! a deadline expiry becomes `Timeout`, and any other error becomes a
//! terminal `Error` that ends the reader and, once the dispatcher has run
//! the error chain, the session. End-of-stream is a normal close request,
//! expressed by cancelling the session scope rather than raising an error.

use std::time::Duration;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadHalf},
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use super::event::Event;
use crate::error::Error;

/// Size of one socket read.
const READ_CHUNK: usize = 4096;

enum Outcome {
    Eof,
    Data(usize),
    TimedOut,
    Failed(std::io::Error),
}

pub(super) async fn read_loop<S>(
    mut half: ReadHalf<S>,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
    read_timeout: Option<Duration>,
) where
    S: AsyncRead + Send + 'static,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => return,
            outcome = next_read(&mut half, &mut chunk, read_timeout) => outcome,
        };
        match outcome {
            Outcome::Eof => {
                // Peer closed: a normal close request, not an error.
                cancel.cancel();
                return;
            }
            Outcome::Data(n) => {
                let bytes = Bytes::copy_from_slice(&chunk[..n]);
                if events.send(Event::Read(bytes)).await.is_err() {
                    return;
                }
            }
            Outcome::TimedOut => {
                if events.send(Event::Timeout).await.is_err() {
                    return;
                }
            }
            Outcome::Failed(error) => {
                tracing::debug!(error = %error, "session read failed");
                let _ = events.send(Event::Error(Error::Io(error))).await;
                return;
            }
        }
    }
}

async fn next_read<S>(
    half: &mut ReadHalf<S>,
    chunk: &mut [u8],
    deadline: Option<Duration>,
) -> Outcome
where
    S: AsyncRead + Send + 'static,
{
    let result = match deadline {
        Some(limit) => match timeout(limit, half.read(chunk)).await {
            Ok(result) => result,
            Err(_elapsed) => return Outcome::TimedOut,
        },
        None => half.read(chunk).await,
    };
    match result {
        Ok(0) => Outcome::Eof,
        Ok(n) => Outcome::Data(n),
        Err(error) => Outcome::Failed(error),
    }
}
