//! Transactional reads: a length-prefixed decoder rolls back on partial
//! frames and replays the buffered bytes once the rest arrives.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::{Duration, sleep},
};
use wirechain::{BoxError, Capabilities, Handler, Payload, SessionContext, TcpServer};

/// Decodes frames of the form `[len: u8][body: len bytes]` and echoes each
/// body back. Incomplete frames request a rollback so the prefix is
/// replayed against the refilled buffer.
struct FrameEcho;

#[async_trait::async_trait]
impl Handler for FrameEcho {
    fn capabilities(&self) -> Capabilities { Capabilities::READ }

    async fn on_read(
        &self,
        ctx: &mut SessionContext,
        input: Payload,
    ) -> Result<Payload, BoxError> {
        let data = ctx.buffer().data();
        let Some(&len) = data.first() else {
            ctx.rollback();
            return Ok(input);
        };
        let frame_len = 1 + usize::from(len);
        if data.len() < frame_len {
            ctx.rollback();
            return Ok(input);
        }
        let body = Bytes::copy_from_slice(&data[1..frame_len]);
        ctx.buffer_mut().consume(frame_len);
        ctx.write(body);
        Ok(input)
    }
}

async fn start_frame_server() -> TcpServer {
    let mut server = TcpServer::new();
    server.set_address("127.0.0.1:0");
    server
        .add_handler(Arc::new(FrameEcho))
        .expect("decoder declares READ");
    server.start().await.expect("bind ephemeral port");
    server
}

#[tokio::test]
async fn split_frame_is_replayed_after_rollback() {
    let mut server = start_frame_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    // First half: the length byte and one body byte.
    stream.write_all(&[4, b'p']).await.expect("send prefix");
    sleep(Duration::from_millis(50)).await;
    stream.write_all(b"ing").await.expect("send remainder");

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.expect("decoded body");
    assert_eq!(&reply, b"ping");

    server.stop();
    server.wait_for_done().await;
}

#[tokio::test]
async fn coalesced_frames_decode_in_one_delivery() {
    let mut server = start_frame_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    // Two complete frames in a single segment; the dispatcher re-runs the
    // chain until no further progress is made.
    stream.write_all(&[1, b'a', 2, b'b', b'c']).await.expect("send frames");

    let mut reply = [0u8; 3];
    stream.read_exact(&mut reply).await.expect("both bodies");
    assert_eq!(&reply, b"abc");

    server.stop();
    server.wait_for_done().await;
}

#[tokio::test]
async fn bare_length_byte_waits_for_body() {
    let mut server = start_frame_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(&[3]).await.expect("send length only");
    sleep(Duration::from_millis(50)).await;
    stream.write_all(b"x").await.expect("send partial body");
    sleep(Duration::from_millis(50)).await;
    stream.write_all(b"yz").await.expect("complete the body");

    let mut reply = [0u8; 3];
    stream.read_exact(&mut reply).await.expect("decoded body");
    assert_eq!(&reply, b"xyz");

    server.stop();
    server.wait_for_done().await;
}
