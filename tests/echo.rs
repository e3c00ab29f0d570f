//! End-to-end echo over plain TCP, exercising the full read/write path.

use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::mpsc,
};
use wirechain::{BoxError, Capabilities, Handler, Payload, SessionContext, TcpClient, TcpServer};

/// Consumes the whole buffered window and queues it straight back out.
struct Echo;

#[async_trait::async_trait]
impl Handler for Echo {
    fn capabilities(&self) -> Capabilities { Capabilities::READ }

    async fn on_read(
        &self,
        ctx: &mut SessionContext,
        input: Payload,
    ) -> Result<Payload, BoxError> {
        let data = Bytes::copy_from_slice(ctx.buffer().data());
        let len = data.len();
        ctx.buffer_mut().consume(len);
        ctx.write(data);
        Ok(input)
    }
}

/// Forwards everything the session receives to a channel.
struct Collector {
    received: mpsc::UnboundedSender<Bytes>,
}

#[async_trait::async_trait]
impl Handler for Collector {
    fn capabilities(&self) -> Capabilities { Capabilities::READ }

    async fn on_read(
        &self,
        ctx: &mut SessionContext,
        input: Payload,
    ) -> Result<Payload, BoxError> {
        let data = Bytes::copy_from_slice(ctx.buffer().data());
        let len = data.len();
        ctx.buffer_mut().consume(len);
        let _ = self.received.send(data);
        Ok(input)
    }
}

async fn start_echo_server() -> TcpServer {
    let mut server = TcpServer::new();
    server.set_address("127.0.0.1:0");
    server.add_handler(Arc::new(Echo)).expect("echo declares READ");
    server.start().await.expect("bind ephemeral port");
    server
}

#[tokio::test]
async fn raw_stream_round_trip() {
    let mut server = start_echo_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(b"ping").await.expect("send");

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply).await.expect("receive echo");
    assert_eq!(&reply, b"ping");

    server.stop();
    server.wait_for_done().await;
    assert!(server.error().is_none());
}

#[tokio::test]
async fn client_session_round_trip() {
    let mut server = start_echo_server().await;
    let addr = server.local_addr().expect("server is running");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = TcpClient::new();
    client.set_address(&addr.to_string());
    client
        .add_handler(Arc::new(Collector { received: tx }))
        .expect("collector declares READ");
    client.start().await.expect("dial");

    client.write(Bytes::from_static(b"hello")).await.expect("queue write");

    let reply = rx.recv().await.expect("echo arrives");
    assert_eq!(reply.as_ref(), b"hello");

    client.stop();
    client.wait_for_done().await;
    server.stop();
    server.wait_for_done().await;
}

#[tokio::test]
async fn sequential_messages_echo_in_order() {
    let mut server = start_echo_server().await;
    let addr = server.local_addr().expect("server is running");

    let mut stream = TcpStream::connect(addr).await.expect("connect");
    for message in [&b"one"[..], b"two", b"three"] {
        stream.write_all(message).await.expect("send");
        let mut reply = vec![0u8; message.len()];
        stream.read_exact(&mut reply).await.expect("receive echo");
        assert_eq!(reply, message);
    }

    server.stop();
    server.wait_for_done().await;
}
